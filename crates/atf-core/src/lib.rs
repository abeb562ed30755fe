//! Foundational types shared across the runner: canonical paths, temp
//! directories, the header codec, the merged configuration mapping, the
//! crate-wide error type and the test-case data model.

pub mod cancel;
pub mod config;
pub mod error;
pub mod fs;
pub mod header;
pub mod model;
pub mod path;
pub mod tempdir;

pub use cancel::{cancel_pair, CancelHandle, CancelToken};
pub use config::Config;
pub use error::AtfError;
pub use model::{ExitDisposition, RequireUser, RunStatus, Tcr, TestCaseMeta, TestProgramRef};
pub use path::Path;
pub use tempdir::TempDir;
