//! The shared data model: test case metadata, results, exit dispositions and
//! test-program references.

use std::collections::BTreeMap;

use crate::path::Path;

/// `root` or `unprivileged`, the two values `require.user` may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequireUser {
    Root,
    Unprivileged,
}

impl RequireUser {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "root" => Some(RequireUser::Root),
            "unprivileged" => Some(RequireUser::Unprivileged),
            _ => None,
        }
    }
}

/// Metadata for one test case, as parsed from a `tp-list` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCaseMeta {
    pub ident: String,
    pub timeout: u64,
    pub has_cleanup: bool,
    pub descr: Option<String>,
    pub require_arch: Vec<String>,
    pub require_machine: Vec<String>,
    pub require_config: Vec<String>,
    pub require_progs: Vec<String>,
    pub require_user: Option<String>,
    /// Custom `X-*` properties, surfaced in the transcript but otherwise
    /// ignored by the runner.
    pub extra: BTreeMap<String, String>,
}

pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

impl TestCaseMeta {
    pub fn new(ident: impl Into<String>) -> Self {
        TestCaseMeta {
            ident: ident.into(),
            timeout: DEFAULT_TIMEOUT_SECS,
            has_cleanup: false,
            descr: None,
            require_arch: Vec::new(),
            require_machine: Vec::new(),
            require_config: Vec::new(),
            require_progs: Vec::new(),
            require_user: None,
            extra: BTreeMap::new(),
        }
    }

    pub fn is_valid_ident(s: &str) -> bool {
        !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

/// A test case's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tcr {
    Passed,
    Failed(String),
    Skipped(String),
}

impl Tcr {
    pub fn is_passed(&self) -> bool {
        matches!(self, Tcr::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Tcr::Failed(_))
    }

    /// Collapse any embedded newline in a reason to one line with the
    /// documented marker.
    pub fn sanitize_reason(reason: &str) -> String {
        if reason.contains('\n') {
            format!(
                "{} <<NEWLINE UNEXPECTED>>",
                reason.replace('\n', " ").trim()
            )
        } else {
            reason.to_string()
        }
    }
}

/// How a child process actually terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDisposition {
    Exited(i32),
    Signaled { signo: i32, coredump: bool },
    TimedOut,
}

/// The per-case outcome visible to the parent: verdict plus how the body
/// phase's process actually exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatus {
    pub tcr: Tcr,
    pub disposition: ExitDisposition,
}

/// A reference to a test program, either a concrete executable file or a
/// directory holding a nested manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestProgramRef {
    pub path: Path,
    pub declared_in_manifest: bool,
}

impl TestProgramRef {
    pub fn new(path: Path, declared_in_manifest: bool) -> Self {
        TestProgramRef {
            path,
            declared_in_manifest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_timeout() {
        let meta = TestCaseMeta::new("a");
        assert_eq!(meta.timeout, 300);
        assert!(!meta.has_cleanup);
    }

    #[test]
    fn test_valid_ident() {
        assert!(TestCaseMeta::is_valid_ident("test_1"));
        assert!(!TestCaseMeta::is_valid_ident(""));
        assert!(!TestCaseMeta::is_valid_ident("bad-name"));
        assert!(!TestCaseMeta::is_valid_ident("bad name"));
    }

    #[test]
    fn test_sanitize_reason_no_newline() {
        assert_eq!(Tcr::sanitize_reason("plain reason"), "plain reason");
    }

    #[test]
    fn test_sanitize_reason_with_newline() {
        let sanitized = Tcr::sanitize_reason("line one\nline two");
        assert_eq!(sanitized, "line one line two <<NEWLINE UNEXPECTED>>");
    }

    #[test]
    fn test_require_user_parse() {
        assert_eq!(RequireUser::parse("root"), Some(RequireUser::Root));
        assert_eq!(
            RequireUser::parse("unprivileged"),
            Some(RequireUser::Unprivileged)
        );
        assert_eq!(RequireUser::parse("bogus"), None);
    }

    #[test]
    fn test_tcr_predicates() {
        assert!(Tcr::Passed.is_passed());
        assert!(!Tcr::Passed.is_failed());
        assert!(Tcr::Failed("x".into()).is_failed());
    }
}
