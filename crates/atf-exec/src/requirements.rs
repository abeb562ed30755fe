//! Pre-check of a test case's `require.*` metadata against the host and
//! merged configuration.

use atf_core::config::Config;
use atf_core::fs::{is_executable, search_path};
use atf_core::model::{RequireUser, TestCaseMeta, Tcr};
use atf_core::Path;

/// Evaluate every `require.*` field. Returns `Some(tcr)` when a requirement
/// is not met (the case must be reported as `Skipped` or `Failed` without
/// ever spawning the body), or `None` when all requirements hold.
pub fn check(meta: &TestCaseMeta, config: &Config) -> Option<Tcr> {
    if !meta.require_arch.is_empty() {
        let arch = config.get("atf_arch").unwrap_or("");
        if !meta.require_arch.iter().any(|a| a == arch) {
            return Some(Tcr::Skipped(format!(
                "Requires one of the '{}' architectures",
                meta.require_arch.join(" ")
            )));
        }
    }

    if !meta.require_machine.is_empty() {
        let machine = config.get("atf_machine").unwrap_or("");
        if !meta.require_machine.iter().any(|m| m == machine) {
            return Some(Tcr::Skipped(format!(
                "Requires one of the '{}' machine types",
                meta.require_machine.join(" ")
            )));
        }
    }

    for name in &meta.require_config {
        if !config.contains(name) {
            return Some(Tcr::Skipped(format!(
                "Required configuration variable {name} not defined"
            )));
        }
    }

    for prog in &meta.require_progs {
        if !program_available(prog, config) {
            return Some(Tcr::Skipped(format!(
                "The required program {prog} could not be found in the PATH"
            )));
        }
    }

    if let Some(raw) = &meta.require_user {
        match RequireUser::parse(raw) {
            Some(RequireUser::Root) => {
                // SAFETY: geteuid takes no arguments and cannot fail.
                if unsafe { libc::geteuid() } != 0 {
                    return Some(Tcr::Skipped("Requires root privileges".to_string()));
                }
            }
            Some(RequireUser::Unprivileged) => {
                // SAFETY: geteuid takes no arguments and cannot fail.
                if unsafe { libc::geteuid() } == 0 {
                    return Some(Tcr::Skipped("Requires unprivileged user".to_string()));
                }
            }
            None => {
                return Some(Tcr::Failed(format!("Invalid value for require.user: {raw}")));
            }
        }
    }

    None
}

fn program_available(prog: &str, config: &Config) -> bool {
    if prog.starts_with('/') {
        let path = match Path::new(prog) {
            Ok(p) => p,
            Err(_) => return false,
        };
        return is_executable(&path).unwrap_or(false);
    }

    let path_var = match config.get("PATH") {
        Some(v) => v.to_string(),
        None => std::env::var("PATH").unwrap_or_default(),
    };
    if path_var.is_empty() {
        return false;
    }
    matches!(search_path(&path_var, prog), Ok(Some(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> TestCaseMeta {
        TestCaseMeta::new("t")
    }

    #[test]
    fn test_no_requirements_passes() {
        assert!(check(&meta(), &Config::new()).is_none());
    }

    #[test]
    fn test_require_arch_mismatch_is_skipped() {
        let mut m = meta();
        m.require_arch = vec!["sparc64".to_string()];
        let mut c = Config::new();
        c.set("atf_arch", "amd64");
        let result = check(&m, &c);
        assert!(matches!(result, Some(Tcr::Skipped(_))));
    }

    #[test]
    fn test_require_arch_match_passes() {
        let mut m = meta();
        m.require_arch = vec!["amd64".to_string(), "arm64".to_string()];
        let mut c = Config::new();
        c.set("atf_arch", "amd64");
        assert!(check(&m, &c).is_none());
    }

    #[test]
    fn test_require_config_missing_is_skipped() {
        let mut m = meta();
        m.require_config = vec!["some.flag".to_string()];
        let result = check(&m, &Config::new());
        assert!(matches!(result, Some(Tcr::Skipped(_))));
    }

    #[test]
    fn test_require_config_present_passes() {
        let mut m = meta();
        m.require_config = vec!["some.flag".to_string()];
        let mut c = Config::new();
        c.set("some.flag", "1");
        assert!(check(&m, &c).is_none());
    }

    #[test]
    fn test_require_progs_absolute_missing_is_skipped() {
        let mut m = meta();
        m.require_progs = vec!["/does/not/exist".to_string()];
        let result = check(&m, &Config::new());
        assert!(matches!(result, Some(Tcr::Skipped(_))));
    }

    #[test]
    fn test_require_progs_absolute_present_passes() {
        let mut m = meta();
        m.require_progs = vec!["/bin/sh".to_string()];
        assert!(check(&m, &Config::new()).is_none());
    }

    #[test]
    fn test_require_user_invalid_value_fails() {
        let mut m = meta();
        m.require_user = Some("bogus".to_string());
        let result = check(&m, &Config::new());
        assert!(matches!(result, Some(Tcr::Failed(_))));
    }
}
