//! Reader for the per-directory `Atffile` manifest.

use std::io::BufRead;

use atf_core::config::Config;
use atf_core::error::AtfError;
use atf_core::header;

pub const MEDIA_TYPE: &str = "application/X-atf-atffile";
pub const VERSION: u32 = 1;

/// One `tp:`/`tp-glob:` entry from the manifest body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpSpec {
    /// `tp: <name>` — a literal test-program name.
    Literal(String),
    /// `tp-glob: <pattern>` — a pattern resolved against executable
    /// entries in the same directory.
    Glob(String),
}

/// The parsed contents of an `Atffile`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    /// Suite-scoped configuration variables declared with `conf:`.
    pub conf: Config,
    /// Suite properties declared with `prop:`, including `test-suite`.
    pub test_suite: Option<String>,
    pub tps: Vec<TpSpec>,
}

pub fn read_manifest<R: BufRead>(
    reader: &mut R,
    doc_path: &str,
) -> Result<Manifest, Vec<AtfError>> {
    let headers = header::read_headers(reader, doc_path).map_err(|e| vec![e])?;
    header::check_version(&headers, MEDIA_TYPE, VERSION, doc_path).map_err(|e| vec![e])?;

    let mut manifest = Manifest::default();
    let mut errors: Vec<AtfError> = Vec::new();
    let mut line_no = 0usize;

    loop {
        let mut line = String::new();
        let n = match reader.read_line(&mut line) {
            Ok(n) => n,
            Err(e) => {
                errors.push(AtfError::FsError(format!(
                    "{doc_path}: failed to read manifest body: {e}"
                )));
                break;
            }
        };
        if n == 0 {
            break;
        }
        line_no += 1;
        let trimmed = line.trim_end_matches(['\n', '\r']);
        let trimmed_ws = trimmed.trim();

        if trimmed_ws.is_empty() || trimmed_ws.starts_with('#') {
            continue;
        }

        if let Err(message) = apply_line(&mut manifest, trimmed_ws) {
            errors.push(AtfError::FormatError {
                path: doc_path.to_string(),
                line: line_no,
                message,
            });
        }
    }

    if manifest.test_suite.is_none() {
        errors.push(AtfError::ConfigError(format!(
            "{doc_path}: missing mandatory 'test-suite' property"
        )));
    }

    if errors.is_empty() {
        Ok(manifest)
    } else {
        Err(errors)
    }
}

fn apply_line(manifest: &mut Manifest, line: &str) -> Result<(), String> {
    let (directive, rest) = line
        .split_once(':')
        .ok_or_else(|| format!("malformed manifest line '{line}'"))?;
    let directive = directive.trim();
    let rest = rest.trim();

    match directive {
        "conf" => {
            let (name, value) = split_assignment(rest)?;
            manifest.conf.set(name, value);
            Ok(())
        }
        "prop" => {
            let (name, value) = split_assignment(rest)?;
            if name == "test-suite" {
                manifest.test_suite = Some(value.to_string());
            }
            Ok(())
        }
        "tp" => {
            if rest.is_empty() {
                return Err("'tp:' requires a name".to_string());
            }
            manifest.tps.push(TpSpec::Literal(rest.to_string()));
            Ok(())
        }
        "tp-glob" => {
            if rest.is_empty() {
                return Err("'tp-glob:' requires a pattern".to_string());
            }
            manifest.tps.push(TpSpec::Glob(rest.to_string()));
            Ok(())
        }
        other => Err(format!("unknown manifest directive '{other}'")),
    }
}

fn split_assignment(rest: &str) -> Result<(&str, &str), String> {
    let (name, value) = rest
        .split_once('=')
        .ok_or_else(|| format!("malformed assignment '{rest}', expected 'name = value'"))?;
    let name = name.trim();
    let value = value.trim();
    if name.is_empty() {
        return Err("assignment has an empty name".to_string());
    }
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn doc(body: &str) -> String {
        format!("Content-Type: application/X-atf-atffile; version=\"1\"\n\n{body}")
    }

    #[test]
    fn test_plain_manifest() {
        let text = doc("prop: test-suite = s\ntp: t\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let manifest = read_manifest(&mut cursor, "Atffile").unwrap();
        assert_eq!(manifest.test_suite.as_deref(), Some("s"));
        assert_eq!(manifest.tps, vec![TpSpec::Literal("t".to_string())]);
    }

    #[test]
    fn test_comments_and_blanks_ignored() {
        let text = doc("# a comment\n\nprop: test-suite = s\n\ntp: t\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let manifest = read_manifest(&mut cursor, "Atffile").unwrap();
        assert_eq!(manifest.tps.len(), 1);
    }

    #[test]
    fn test_conf_vars_collected() {
        let text = doc("prop: test-suite = s\nconf: foo = bar\ntp: t\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let manifest = read_manifest(&mut cursor, "Atffile").unwrap();
        assert_eq!(manifest.conf.get("foo"), Some("bar"));
    }

    #[test]
    fn test_tp_glob_entry() {
        let text = doc("prop: test-suite = s\ntp-glob: t_*\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let manifest = read_manifest(&mut cursor, "Atffile").unwrap();
        assert_eq!(manifest.tps, vec![TpSpec::Glob("t_*".to_string())]);
    }

    #[test]
    fn test_missing_test_suite_is_config_error() {
        let text = doc("tp: t\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let errors = read_manifest(&mut cursor, "Atffile").unwrap_err();
        assert!(errors.iter().any(|e| matches!(e, AtfError::ConfigError(_))));
    }

    #[test]
    fn test_unknown_directive_is_format_error() {
        let text = doc("prop: test-suite = s\nbogus: x\n");
        let mut cursor = Cursor::new(text.into_bytes());
        let errors = read_manifest(&mut cursor, "Atffile").unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, AtfError::FormatError { .. })));
    }

    #[test]
    fn test_round_trip_reparse_stable() {
        let text = doc("prop: test-suite = s\nconf: a = 1\ntp: t1\ntp: t2\n");
        let mut cursor = Cursor::new(text.clone().into_bytes());
        let first = read_manifest(&mut cursor, "Atffile").unwrap();
        let mut cursor2 = Cursor::new(text.into_bytes());
        let second = read_manifest(&mut cursor2, "Atffile").unwrap();
        assert_eq!(first, second);
    }
}
