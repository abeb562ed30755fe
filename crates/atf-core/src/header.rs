//! The header codec shared by every framed document the runner touches:
//! `Name: value; attr="val"; …` lines terminated by a blank line.

use std::io::BufRead;

use crate::error::AtfError;

/// One header line: a name, a value, and an ordered set of attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub name: String,
    pub value: String,
    pub attrs: Vec<(String, String)>,
}

impl HeaderEntry {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        HeaderEntry {
            name: name.into(),
            value: value.into(),
            attrs: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Read headers from `reader` line by line until a blank line is found.
///
/// `doc_path` is used only to annotate [`AtfError::FormatError`].
pub fn read_headers<R: BufRead>(
    reader: &mut R,
    doc_path: &str,
) -> Result<Vec<HeaderEntry>, AtfError> {
    let mut headers = Vec::new();
    let mut line_no = 0usize;

    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(|e| AtfError::FsError(format!(
            "{doc_path}: failed to read header line: {e}"
        )))?;
        if n == 0 {
            return Err(AtfError::FormatError {
                path: doc_path.to_string(),
                line: line_no + 1,
                message: "unexpected end of file while reading headers".to_string(),
            });
        }
        line_no += 1;
        let trimmed = line.trim_end_matches(['\n', '\r']);

        if trimmed.is_empty() {
            break;
        }

        let entry = parse_header_line(trimmed, line_no, doc_path)?;
        headers.push(entry);
    }

    if headers.is_empty() {
        return Err(AtfError::FormatError {
            path: doc_path.to_string(),
            line: line_no,
            message: "document has no headers".to_string(),
        });
    }
    if headers[0].name != "Content-Type" {
        return Err(AtfError::FormatError {
            path: doc_path.to_string(),
            line: 1,
            message: format!(
                "first header must be 'Content-Type', found '{}'",
                headers[0].name
            ),
        });
    }

    Ok(headers)
}

/// Verify that `headers` declares the expected media type and format
/// version (the `version` attribute on `Content-Type`).
pub fn check_version(
    headers: &[HeaderEntry],
    expected_media_type: &str,
    expected_version: u32,
    doc_path: &str,
) -> Result<(), AtfError> {
    let ct = headers
        .iter()
        .find(|h| h.name == "Content-Type")
        .ok_or_else(|| AtfError::FormatError {
            path: doc_path.to_string(),
            line: 1,
            message: "missing Content-Type header".to_string(),
        })?;

    if ct.value != expected_media_type {
        return Err(AtfError::FormatError {
            path: doc_path.to_string(),
            line: 1,
            message: format!(
                "unexpected media type '{}', expected '{expected_media_type}'",
                ct.value
            ),
        });
    }

    let version = ct.attr("version").ok_or_else(|| AtfError::FormatError {
        path: doc_path.to_string(),
        line: 1,
        message: "Content-Type is missing a 'version' attribute".to_string(),
    })?;
    let parsed: u32 = version.parse().map_err(|_| AtfError::FormatError {
        path: doc_path.to_string(),
        line: 1,
        message: format!("version attribute '{version}' is not an integer"),
    })?;
    if parsed != expected_version {
        return Err(AtfError::FormatError {
            path: doc_path.to_string(),
            line: 1,
            message: format!(
                "unsupported format version {parsed}, expected {expected_version}"
            ),
        });
    }

    Ok(())
}

fn parse_header_line(line: &str, line_no: usize, doc_path: &str) -> Result<HeaderEntry, AtfError> {
    let colon = line.find(':').ok_or_else(|| AtfError::FormatError {
        path: doc_path.to_string(),
        line: line_no,
        message: format!("header line '{line}' has no ':' separator"),
    })?;

    let name = line[..colon].trim().to_string();
    if name.is_empty() {
        return Err(AtfError::FormatError {
            path: doc_path.to_string(),
            line: line_no,
            message: "header name is empty".to_string(),
        });
    }

    let rest = &line[colon + 1..];
    let segments = split_top_level(rest, ';').map_err(|message| AtfError::FormatError {
        path: doc_path.to_string(),
        line: line_no,
        message,
    })?;

    let mut segments = segments.into_iter();
    let value = segments.next().unwrap_or_default().trim().to_string();

    let mut attrs: Vec<(String, String)> = Vec::new();
    for seg in segments {
        let seg = seg.trim();
        let eq = seg.trim().find('=').ok_or_else(|| AtfError::FormatError {
            path: doc_path.to_string(),
            line: line_no,
            message: format!("attribute '{seg}' is missing '='"),
        })?;
        let attr_name = seg[..eq].trim().to_string();
        let raw_value = seg[eq + 1..].trim();
        let attr_value = unquote(raw_value).map_err(|message| AtfError::FormatError {
            path: doc_path.to_string(),
            line: line_no,
            message,
        })?;

        if attrs.iter().any(|(k, _)| *k == attr_name) {
            return Err(AtfError::FormatError {
                path: doc_path.to_string(),
                line: line_no,
                message: format!("duplicate attribute '{attr_name}'"),
            });
        }
        attrs.push((attr_name, attr_value));
    }

    Ok(HeaderEntry { name, value, attrs })
}

/// Split `s` on top-level occurrences of `delim`, treating `"..."` runs
/// (with `\"`/`\\` escapes) as opaque.
fn split_top_level(s: &str, delim: char) -> Result<Vec<String>, String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '\\' {
                match chars.peek().copied() {
                    Some(next @ ('"' | '\\')) => {
                        cur.push(c);
                        cur.push(next);
                        chars.next();
                    }
                    _ => cur.push(c),
                }
            } else if c == '"' {
                in_quotes = false;
                cur.push(c);
            } else {
                cur.push(c);
            }
        } else if c == '"' {
            in_quotes = true;
            cur.push(c);
        } else if c == delim {
            parts.push(std::mem::take(&mut cur));
        } else {
            cur.push(c);
        }
    }
    if in_quotes {
        return Err("unterminated quoted attribute value".to_string());
    }
    parts.push(cur);
    Ok(parts)
}

fn unquote(raw: &str) -> Result<String, String> {
    if !raw.starts_with('"') {
        return Ok(raw.to_string());
    }
    if raw.len() < 2 || !raw.ends_with('"') {
        return Err(format!("malformed quoted value '{raw}'"));
    }
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(n @ ('"' | '\\')) => out.push(n),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => return Err("dangling escape at end of quoted value".to_string()),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn needs_quoting(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_whitespace() || c == ';' || c == '=' || c == '"')
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Format `attrs` emission helper, used by both the attribute-value rule and
/// the value-position rule (values are never quoted, only attribute values
/// are).
fn format_attr_value(value: &str) -> String {
    if needs_quoting(value) {
        quote(value)
    } else {
        value.to_string()
    }
}

/// Write `headers` as `Name: value; attr="val"` lines followed by a blank
/// line. `Content-Type` is always written first, other headers follow in
/// their given order.
pub fn write_headers<W: std::io::Write>(
    writer: &mut W,
    headers: &[HeaderEntry],
) -> std::io::Result<()> {
    let (content_type, rest): (Vec<&HeaderEntry>, Vec<&HeaderEntry>) =
        headers.iter().partition(|h| h.name == "Content-Type");

    for h in content_type.into_iter().chain(rest) {
        write!(writer, "{}: {}", h.name, h.value)?;
        for (k, v) in &h.attrs {
            write!(writer, "; {k}={}", format_attr_value(v))?;
        }
        writeln!(writer)?;
    }
    writeln!(writer)?;
    Ok(())
}
