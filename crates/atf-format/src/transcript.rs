//! Writer for the `tps` transcript: the stream a runner emits as it works
//! through a suite.
//!
//! Every event is flushed immediately so a runner that dies mid-suite still
//! leaves behind a transcript that is valid up to the point of the crash.

use std::io::{self, Write};

use atf_core::header::{self, HeaderEntry};
use atf_core::model::Tcr;

pub const MEDIA_TYPE: &str = "application/X-atf-tps";
pub const VERSION: u32 = 3;

/// Streaming writer for a `tps` transcript.
pub struct TranscriptWriter<W: Write> {
    inner: W,
}

impl<W: Write> TranscriptWriter<W> {
    /// Write the document's headers and return a writer ready for events.
    pub fn new(mut inner: W) -> io::Result<Self> {
        let headers = vec![
            HeaderEntry::new("Content-Type", MEDIA_TYPE).with_attr("version", VERSION.to_string()),
        ];
        header::write_headers(&mut inner, &headers)?;
        Ok(TranscriptWriter { inner })
    }

    /// `info: <key>, <value>` — out-of-band annotation, valid before the
    /// count or after the last `tp-end`.
    pub fn write_info(&mut self, key: &str, value: &str) -> io::Result<()> {
        writeln!(self.inner, "info: {key}, {value}")?;
        self.inner.flush()
    }

    /// `tps-count: <n>` — total number of test programs about to run.
    pub fn write_tps_count(&mut self, count: usize) -> io::Result<()> {
        writeln!(self.inner, "tps-count: {count}")?;
        self.inner.flush()
    }

    pub fn start_test_program(&mut self, path: &str, case_count: usize) -> io::Result<()> {
        writeln!(self.inner, "tp-start: {path}, {case_count}")?;
        self.inner.flush()
    }

    /// `reason` is set only when the program itself failed to run (bogus
    /// listing, crash before any test case started).
    pub fn end_test_program(&mut self, path: &str, reason: Option<&str>) -> io::Result<()> {
        match reason {
            Some(r) => writeln!(self.inner, "tp-end: {path}, {}", Tcr::sanitize_reason(r))?,
            None => writeln!(self.inner, "tp-end: {path}")?,
        }
        self.inner.flush()
    }

    pub fn start_test_case(&mut self, ident: &str) -> io::Result<()> {
        writeln!(self.inner, "tc-start: {ident}")?;
        self.inner.flush()
    }

    pub fn write_stdout_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.inner, "tc-so: {line}")?;
        self.inner.flush()
    }

    pub fn write_stderr_line(&mut self, line: &str) -> io::Result<()> {
        writeln!(self.inner, "tc-se: {line}")?;
        self.inner.flush()
    }

    pub fn end_test_case(&mut self, ident: &str, tcr: &Tcr) -> io::Result<()> {
        match tcr {
            Tcr::Passed => writeln!(self.inner, "tc-end: {ident}, passed")?,
            Tcr::Failed(reason) => writeln!(
                self.inner,
                "tc-end: {ident}, failed, {}",
                Tcr::sanitize_reason(reason)
            )?,
            Tcr::Skipped(reason) => writeln!(
                self.inner,
                "tc-end: {ident}, skipped, {}",
                Tcr::sanitize_reason(reason)
            )?,
        }
        self.inner.flush()
    }

    /// Release the underlying writer.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(buf: &[u8]) -> Vec<String> {
        String::from_utf8(buf.to_vec())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_header_written_on_construction() {
        let writer = TranscriptWriter::new(Vec::new()).unwrap();
        let buf = writer.into_inner();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.starts_with("Content-Type: application/X-atf-tps; version=3"));
    }

    #[test]
    fn test_full_sequence_one_case() {
        let mut writer = TranscriptWriter::new(Vec::new()).unwrap();
        writer.write_tps_count(1).unwrap();
        writer.start_test_program("/tmp/t", 1).unwrap();
        writer.start_test_case("a").unwrap();
        writer.write_stdout_line("hello").unwrap();
        writer.end_test_case("a", &Tcr::Passed).unwrap();
        writer.end_test_program("/tmp/t", None).unwrap();
        let buf = writer.into_inner();
        let ls = lines(&buf);
        assert!(ls.contains(&"tps-count: 1".to_string()));
        assert!(ls.contains(&"tp-start: /tmp/t, 1".to_string()));
        assert!(ls.contains(&"tc-start: a".to_string()));
        assert!(ls.contains(&"tc-so: hello".to_string()));
        assert!(ls.contains(&"tc-end: a, passed".to_string()));
        assert!(ls.contains(&"tp-end: /tmp/t".to_string()));
    }

    #[test]
    fn test_failed_case_includes_reason() {
        let mut writer = TranscriptWriter::new(Vec::new()).unwrap();
        writer
            .end_test_case("a", &Tcr::Failed("boom".to_string()))
            .unwrap();
        let buf = writer.into_inner();
        assert!(lines(&buf).contains(&"tc-end: a, failed, boom".to_string()));
    }

    #[test]
    fn test_skipped_case_includes_reason() {
        let mut writer = TranscriptWriter::new(Vec::new()).unwrap();
        writer
            .end_test_case("a", &Tcr::Skipped("not relevant here".to_string()))
            .unwrap();
        let buf = writer.into_inner();
        assert!(lines(&buf).contains(&"tc-end: a, skipped, not relevant here".to_string()));
    }

    #[test]
    fn test_embedded_newline_in_tp_end_reason_is_collapsed() {
        let mut writer = TranscriptWriter::new(Vec::new()).unwrap();
        writer
            .end_test_program("/tmp/t", Some("crashed\nhard"))
            .unwrap();
        let buf = writer.into_inner();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("<<NEWLINE UNEXPECTED>>"));
        assert_eq!(text.lines().filter(|l| l.starts_with("tp-end:")).count(), 1);
    }

    #[test]
    fn test_info_line_format() {
        let mut writer = TranscriptWriter::new(Vec::new()).unwrap();
        writer.write_info("time", "2026-01-01T00:00:00Z").unwrap();
        let buf = writer.into_inner();
        assert!(lines(&buf).contains(&"info: time, 2026-01-01T00:00:00Z".to_string()));
    }
}
