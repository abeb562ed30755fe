//! Reader and writer for the `tc-result` document: the one-line file a
//! child writes to report its verdict.

use std::io::{BufRead, Write};

use atf_core::error::AtfError;
use atf_core::header::{self, HeaderEntry};
use atf_core::model::Tcr;

pub const MEDIA_TYPE: &str = "application/X-atf-tc";
pub const VERSION: u32 = 1;

/// Parse a `tc-result` document: headers, a blank line, then exactly one
/// body line of the form `passed`, `failed: <reason>` or
/// `skipped: <reason>`.
pub fn read_tc_result<R: BufRead>(reader: &mut R, doc_path: &str) -> Result<Tcr, AtfError> {
    let headers = header::read_headers(reader, doc_path)?;
    header::check_version(&headers, MEDIA_TYPE, VERSION, doc_path)?;

    let mut line = String::new();
    let n = reader
        .read_line(&mut line)
        .map_err(|e| AtfError::FsError(format!("{doc_path}: failed to read result body: {e}")))?;
    if n == 0 {
        return Err(AtfError::FormatError {
            path: doc_path.to_string(),
            line: 0,
            message: "missing result line".to_string(),
        });
    }
    let trimmed = line.trim_end_matches(['\n', '\r']);
    parse_body_line(trimmed, doc_path)
}

fn parse_body_line(line: &str, doc_path: &str) -> Result<Tcr, AtfError> {
    if line == "passed" {
        return Ok(Tcr::Passed);
    }
    if let Some(reason) = line.strip_prefix("failed:") {
        return Ok(Tcr::Failed(reason.trim().to_string()));
    }
    if let Some(reason) = line.strip_prefix("skipped:") {
        return Ok(Tcr::Skipped(reason.trim().to_string()));
    }
    Err(AtfError::FormatError {
        path: doc_path.to_string(),
        line: 1,
        message: format!("malformed test case result '{line}'"),
    })
}

/// Serialize `tcr` as a `tc-result` document.
pub fn write_tc_result<W: Write>(writer: &mut W, tcr: &Tcr) -> std::io::Result<()> {
    let headers = vec![HeaderEntry::new(
        "Content-Type",
        "application/X-atf-tc".to_string(),
    )
    .with_attr("version", VERSION.to_string())];
    header::write_headers(writer, &headers)?;

    match tcr {
        Tcr::Passed => writeln!(writer, "passed"),
        Tcr::Failed(reason) => writeln!(writer, "failed: {}", Tcr::sanitize_reason(reason)),
        Tcr::Skipped(reason) => writeln!(writer, "skipped: {}", Tcr::sanitize_reason(reason)),
    }
}
