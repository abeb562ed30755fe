//! Reader for the `tp-list` document a test program emits when invoked with
//! its listing flag.

use std::io::BufRead;

use atf_core::error::AtfError;
use atf_core::header;
use atf_core::model::TestCaseMeta;

pub const MEDIA_TYPE: &str = "application/X-atf-tp-list";
pub const VERSION: u32 = 1;

const KNOWN_KEYS: &[&str] = &[
    "timeout",
    "has.cleanup",
    "descr",
    "require.arch",
    "require.machine",
    "require.config",
    "require.progs",
    "require.user",
];

/// Parse a `tp-list` document's body into zero or more [`TestCaseMeta`]
/// records. Aggregates as many per-line errors as possible instead of
/// bailing on the first one; the caller decides whether any errors are
/// fatal to the enclosing test program's listing.
pub fn read_tp_list<R: BufRead>(
    reader: &mut R,
    doc_path: &str,
) -> Result<Vec<TestCaseMeta>, Vec<AtfError>> {
    let headers = header::read_headers(reader, doc_path).map_err(|e| vec![e])?;
    header::check_version(&headers, MEDIA_TYPE, VERSION, doc_path).map_err(|e| vec![e])?;

    let mut cases = Vec::new();
    let mut errors: Vec<AtfError> = Vec::new();
    let mut current: Option<TestCaseMeta> = None;
    let mut skipping_record = false;
    let mut line_no = 0usize;

    loop {
        let mut line = String::new();
        let n = match reader.read_line(&mut line) {
            Ok(n) => n,
            Err(e) => {
                errors.push(AtfError::FsError(format!(
                    "{doc_path}: failed to read tp-list body: {e}"
                )));
                break;
            }
        };
        line_no += 1;
        if n == 0 {
            if let Some(meta) = current.take() {
                cases.push(meta);
            }
            break;
        }

        let trimmed = line.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            if let Some(meta) = current.take() {
                cases.push(meta);
            }
            skipping_record = false;
            continue;
        }
        if skipping_record {
            continue;
        }

        let (key, value) = match split_key_value(trimmed) {
            Some(kv) => kv,
            None => {
                errors.push(AtfError::FormatError {
                    path: doc_path.to_string(),
                    line: line_no,
                    message: format!("malformed tp-list line '{trimmed}'"),
                });
                skipping_record = true;
                continue;
            }
        };

        if current.is_none() {
            if key != "ident" {
                errors.push(AtfError::FormatError {
                    path: doc_path.to_string(),
                    line: line_no,
                    message: format!(
                        "first line of a test case record must be 'ident', found '{key}'"
                    ),
                });
                skipping_record = true;
                continue;
            }
            if !TestCaseMeta::is_valid_ident(value) {
                errors.push(AtfError::FormatError {
                    path: doc_path.to_string(),
                    line: line_no,
                    message: format!("invalid identifier '{value}'"),
                });
                skipping_record = true;
                continue;
            }
            current = Some(TestCaseMeta::new(value));
            continue;
        }

        let meta = current.as_mut().expect("checked above");
        if let Err(message) = apply_property(meta, key, value) {
            errors.push(AtfError::FormatError {
                path: doc_path.to_string(),
                line: line_no,
                message,
            });
        }
    }

    if errors.is_empty() {
        Ok(cases)
    } else {
        Err(errors)
    }
}

fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let colon = line.find(':')?;
    let key = line[..colon].trim();
    let value = line[colon + 1..].trim();
    if key.is_empty() {
        None
    } else {
        Some((key, value))
    }
}

fn apply_property(meta: &mut TestCaseMeta, key: &str, value: &str) -> Result<(), String> {
    if key.starts_with("X-") {
        meta.extra.insert(key.to_string(), value.to_string());
        return Ok(());
    }
    if !KNOWN_KEYS.contains(&key) {
        return Err(format!("unknown property '{key}'"));
    }

    match key {
        "timeout" => {
            meta.timeout = value
                .parse::<u64>()
                .map_err(|_| format!("'timeout' must be a non-negative integer, got '{value}'"))?;
        }
        "has.cleanup" => {
            meta.has_cleanup = parse_bool(value)
                .ok_or_else(|| format!("'has.cleanup' must be a boolean, got '{value}'"))?;
        }
        "descr" => meta.descr = Some(value.to_string()),
        "require.arch" => meta.require_arch = split_set(value),
        "require.machine" => meta.require_machine = split_set(value),
        "require.config" => meta.require_config = split_set(value),
        "require.progs" => meta.require_progs = split_set(value),
        "require.user" => meta.require_user = Some(value.to_string()),
        _ => unreachable!("checked against KNOWN_KEYS above"),
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "yes" => Some(true),
        "false" | "no" => Some(false),
        _ => None,
    }
}

fn split_set(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn doc(body: &str) -> String {
        format!("Content-Type: application/X-atf-tp-list; version=\"1\"\n\n{body}")
    }

    #[test]
    fn test_single_case_default_timeout() {
        let text = doc("ident: a\n\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let cases = read_tp_list(&mut cursor, "prog").unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].ident, "a");
        assert_eq!(cases[0].timeout, 300);
    }

    #[test]
    fn test_multiple_cases() {
        let text = doc("ident: a\ntimeout: 10\n\nident: b\nhas.cleanup: true\n\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let cases = read_tp_list(&mut cursor, "prog").unwrap();
        assert_eq!(cases.len(), 2);
        assert_eq!(cases[0].timeout, 10);
        assert!(cases[1].has_cleanup);
    }

    #[test]
    fn test_require_sets_are_space_separated() {
        let text = doc("ident: a\nrequire.arch: amd64 arm64\n\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let cases = read_tp_list(&mut cursor, "prog").unwrap();
        assert_eq!(cases[0].require_arch, vec!["amd64", "arm64"]);
    }

    #[test]
    fn test_custom_x_property_preserved() {
        let text = doc("ident: a\nX-Owner: me\n\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let cases = read_tp_list(&mut cursor, "prog").unwrap();
        assert_eq!(cases[0].extra.get("X-Owner").map(String::as_str), Some("me"));
    }

    #[test]
    fn test_unknown_property_is_an_error() {
        let text = doc("ident: a\nbogus: v\n\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let errors = read_tp_list(&mut cursor, "prog").unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], AtfError::FormatError { .. }));
    }

    #[test]
    fn test_bad_timeout_is_an_error() {
        let text = doc("ident: a\ntimeout: notanumber\n\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let errors = read_tp_list(&mut cursor, "prog").unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_record_must_start_with_ident() {
        let text = doc("timeout: 10\n\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let errors = read_tp_list(&mut cursor, "prog").unwrap_err();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn test_errors_accumulate_across_multiple_records() {
        let text = doc("ident: a\nbogus: v\n\nident: b\nanother.bogus: v\n\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let errors = read_tp_list(&mut cursor, "prog").unwrap_err();
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_no_trailing_blank_line_still_closes_last_record() {
        let text = doc("ident: a\ntimeout: 5");
        let mut cursor = Cursor::new(text.into_bytes());
        let cases = read_tp_list(&mut cursor, "prog").unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].timeout, 5);
    }
}
