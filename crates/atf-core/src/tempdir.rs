//! Ownership-scoped temporary directories with recursive removal on drop.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

use tracing::warn;

use crate::error::AtfError;
use crate::path::Path;

/// An owned, freshly created unique directory.
///
/// Created from a template ending in six `X` placeholders (as `mkdtemp(3)`
/// requires), with mode `0700`. On drop, the whole tree is recursively
/// removed on a best-effort basis: a failure to remove one entry is logged
/// and does not stop the removal of its siblings.
#[derive(Debug)]
pub struct TempDir {
    path: Path,
}

impl TempDir {
    /// Create a new unique directory from `template`, which must end in
    /// `XXXXXX`.
    pub fn new(template: &str) -> Result<Self, AtfError> {
        if !template.ends_with("XXXXXX") {
            return Err(AtfError::FsError(format!(
                "temp dir template '{template}' must end in six 'X' characters"
            )));
        }

        let c_template =
            CString::new(template).map_err(|_| AtfError::FsError("NUL in template".into()))?;
        let mut buf = c_template.into_bytes_with_nul();

        // SAFETY: `buf` is a mutable, NUL-terminated, writable byte buffer
        // exactly the right length for `mkdtemp` to rewrite the trailing
        // `XXXXXX` in place.
        let ret = unsafe { libc::mkdtemp(buf.as_mut_ptr() as *mut libc::c_char) };
        if ret.is_null() {
            return Err(AtfError::FsError(format!(
                "mkdtemp('{template}') failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        // Drop the trailing NUL before turning the buffer back into a string.
        buf.pop();
        let created = String::from_utf8(buf)
            .map_err(|_| AtfError::FsError("mkdtemp produced non-UTF-8 path".into()))?;

        let path = Path::new(created)?;

        // mkdtemp(3) creates the directory with mode 0700 masked by umask;
        // pin it down explicitly so the mode is 0700 regardless of the
        // caller's umask.
        let c_path = CString::new(path.as_std_path().as_os_str().as_bytes())
            .map_err(|_| AtfError::FsError("NUL in path".into()))?;
        // SAFETY: `c_path` names the directory just created by this call.
        unsafe {
            libc::chmod(c_path.as_ptr(), 0o700);
        }

        Ok(TempDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        remove_tree_best_effort(self.path.as_std_path());
    }
}

fn dev_of(path: &std::path::Path) -> Option<u64> {
    std::fs::symlink_metadata(path)
        .ok()
        .map(|m| std::os::unix::fs::MetadataExt::dev(&m))
}

/// Recursively remove `root`, logging (not propagating) any per-entry
/// failure. Entries whose device id differs from their parent's (i.e. a
/// separate mount was bound inside the tree) get a best-effort unmount
/// attempt before their removal is retried.
fn remove_tree_best_effort(root: &std::path::Path) {
    let Some(root_dev) = dev_of(root) else {
        // Already gone, or inaccessible; nothing to do.
        return;
    };
    remove_tree_inner(root, root_dev);
}

fn remove_tree_inner(dir: &std::path::Path, parent_dev: u64) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to read directory during cleanup");
            return;
        }
    };

    for entry in entries.flatten() {
        let entry_path = entry.path();
        let entry_dev = dev_of(&entry_path);

        if let Some(dev) = entry_dev {
            if dev != parent_dev {
                try_unmount(&entry_path);
            }
        }

        let is_dir = entry
            .file_type()
            .map(|ft| ft.is_dir() && !ft.is_symlink())
            .unwrap_or(false);

        if is_dir {
            remove_tree_inner(&entry_path, entry_dev.unwrap_or(parent_dev));
            if let Err(e) = std::fs::remove_dir(&entry_path) {
                warn!(path = %entry_path.display(), error = %e, "failed to remove directory during cleanup");
            }
        } else if let Err(e) = std::fs::remove_file(&entry_path) {
            warn!(path = %entry_path.display(), error = %e, "failed to remove entry during cleanup");
        }
    }

    if let Err(e) = std::fs::remove_dir(dir) {
        warn!(path = %dir.display(), error = %e, "failed to remove directory during cleanup");
    }
}

#[cfg(target_os = "linux")]
fn try_unmount(path: &std::path::Path) {
    if let Ok(c) = CString::new(path.as_os_str().as_bytes()) {
        // SAFETY: `c` is a valid NUL-terminated path. Failure is expected
        // and ignored when the entry was never a separate mount point.
        unsafe {
            libc::umount2(c.as_ptr(), libc::MNT_DETACH);
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn try_unmount(_path: &std::path::Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_template() {
        let err = TempDir::new("/tmp/atf-bad").unwrap_err();
        assert!(matches!(err, AtfError::FsError(_)));
    }

    #[test]
    fn test_creates_unique_directory_with_mode_0700() {
        let tmp = TempDir::new("/tmp/atf-test-XXXXXX").unwrap();
        let meta = std::fs::metadata(tmp.path().as_std_path()).unwrap();
        assert!(meta.is_dir());
        let mode = std::os::unix::fs::PermissionsExt::mode(&meta.permissions());
        assert_eq!(mode & 0o777, 0o700);
    }

    #[test]
    fn test_removed_on_drop() {
        let path_copy;
        {
            let tmp = TempDir::new("/tmp/atf-test-XXXXXX").unwrap();
            path_copy = tmp.path().as_std_path().to_path_buf();
            assert!(path_copy.exists());
        }
        assert!(!path_copy.exists());
    }

    #[test]
    fn test_removes_nested_contents() {
        let path_copy;
        {
            let tmp = TempDir::new("/tmp/atf-test-XXXXXX").unwrap();
            let nested = tmp.path().as_std_path().join("a/b/c");
            std::fs::create_dir_all(&nested).unwrap();
            std::fs::write(nested.join("file.txt"), b"data").unwrap();
            path_copy = tmp.path().as_std_path().to_path_buf();
        }
        assert!(!path_copy.exists());
    }

    #[test]
    fn test_two_tempdirs_are_distinct() {
        let a = TempDir::new("/tmp/atf-test-XXXXXX").unwrap();
        let b = TempDir::new("/tmp/atf-test-XXXXXX").unwrap();
        assert_ne!(a.path(), b.path());
    }
}
