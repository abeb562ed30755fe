#[derive(thiserror::Error, Debug)]
pub enum AtfError {
    #[error("path must not be empty")]
    EmptyPath,

    #[error("{path}:{line}: {message}")]
    FormatError {
        path: String,
        line: usize,
        message: String,
    },

    #[error("{0}")]
    FsError(String),

    #[error("failed to spawn '{program}': {message}")]
    SpawnError { program: String, message: String },

    #[error("Test case timed out after {0} seconds")]
    TimedOut(u64),

    #[error("{0}")]
    ExitStatusMismatch(String),

    #[error("{0}")]
    KillTreeError(String),

    #[error("{0}")]
    ConfigError(String),

    #[error("{0}")]
    UsageError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_empty_path() {
        assert_eq!(AtfError::EmptyPath.to_string(), "path must not be empty");
    }

    #[test]
    fn test_display_format_error() {
        let err = AtfError::FormatError {
            path: "Atffile".into(),
            line: 3,
            message: "unexpected token".into(),
        };
        assert_eq!(err.to_string(), "Atffile:3: unexpected token");
    }

    #[test]
    fn test_display_fs_error() {
        let err = AtfError::FsError("Could not create work directory".into());
        assert_eq!(err.to_string(), "Could not create work directory");
    }

    #[test]
    fn test_display_spawn_error() {
        let err = AtfError::SpawnError {
            program: "/tmp/t".into(),
            message: "Permission denied".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to spawn '/tmp/t': Permission denied"
        );
    }

    #[test]
    fn test_display_timed_out() {
        let err = AtfError::TimedOut(300);
        assert_eq!(err.to_string(), "Test case timed out after 300 seconds");
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AtfError>();
    }
}
