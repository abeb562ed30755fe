//! Filesystem primitives: existence checks, file-type introspection and the
//! "effective access" executability test a test program must pass.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;

use crate::error::AtfError;
use crate::path::Path;

/// File type as derived from a single `stat(2)` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    Fifo,
    Socket,
    Block,
    Char,
    Whiteout,
    Unknown,
}

fn to_cstring(p: &Path) -> Result<CString, AtfError> {
    CString::new(p.as_std_path().as_os_str().as_bytes())
        .map_err(|_| AtfError::FsError(format!("path '{p}' contains an embedded NUL")))
}

/// `true` iff the path exists, per `access(2)` with `F_OK`.
///
/// Any errno other than `ENOENT`/`ENOTDIR` is surfaced as an [`AtfError`]
/// rather than silently mapped to `false`.
pub fn exists(p: &Path) -> Result<bool, AtfError> {
    let c = to_cstring(p)?;
    // SAFETY: `c` is a valid NUL-terminated string for the lifetime of the call.
    let ret = unsafe { libc::access(c.as_ptr(), libc::F_OK) };
    if ret == 0 {
        return Ok(true);
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ENOENT) | Some(libc::ENOTDIR) => Ok(false),
        _ => Err(AtfError::FsError(format!(
            "access('{p}', F_OK) failed: {}",
            std::io::Error::last_os_error()
        ))),
    }
}

/// Derive the [`FileKind`] of `p` via `lstat(2)` (symlinks are reported as
/// `Symlink`, not followed).
pub fn file_kind(p: &Path) -> Result<FileKind, AtfError> {
    let c = to_cstring(p)?;
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    // SAFETY: `c` is valid and `st` is a correctly sized, zeroed buffer.
    let ret = unsafe { libc::lstat(c.as_ptr(), &mut st) };
    if ret != 0 {
        return Err(AtfError::FsError(format!(
            "lstat('{p}') failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    let mode = st.st_mode & libc::S_IFMT;
    Ok(match mode {
        libc::S_IFREG => FileKind::Regular,
        libc::S_IFDIR => FileKind::Directory,
        libc::S_IFLNK => FileKind::Symlink,
        libc::S_IFIFO => FileKind::Fifo,
        libc::S_IFSOCK => FileKind::Socket,
        libc::S_IFBLK => FileKind::Block,
        libc::S_IFCHR => FileKind::Char,
        _ => FileKind::Unknown,
    })
}

/// "Effective access" executability test.
///
/// Honors the effective uid, including the rule that root is treated as
/// executable iff *any* execute bit is set (root bypasses the normal
/// owner/group/other access check but not an all-zero mode). Returns
/// `Ok(false)` cleanly for `ENOENT`/`EACCES`; propagates other errors.
pub fn is_executable(p: &Path) -> Result<bool, AtfError> {
    let c = to_cstring(p)?;
    // SAFETY: `c` is valid for the duration of the call.
    let euid = unsafe { libc::geteuid() };
    if euid == 0 {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: `c` is valid, `st` is zeroed and correctly sized.
        let ret = unsafe { libc::stat(c.as_ptr(), &mut st) };
        if ret != 0 {
            return match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::ENOENT) | Some(libc::EACCES) | Some(libc::ENOTDIR) => Ok(false),
                _ => Err(AtfError::FsError(format!(
                    "stat('{p}') failed: {}",
                    std::io::Error::last_os_error()
                ))),
            };
        }
        let any_exec_bit = st.st_mode & 0o111;
        return Ok(any_exec_bit != 0);
    }

    // SAFETY: `c` is a valid NUL-terminated path.
    let ret = unsafe { libc::access(c.as_ptr(), libc::X_OK) };
    if ret == 0 {
        return Ok(true);
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::ENOENT) | Some(libc::EACCES) | Some(libc::ENOTDIR) => Ok(false),
        _ => Err(AtfError::FsError(format!(
            "access('{p}', X_OK) failed: {}",
            std::io::Error::last_os_error()
        ))),
    }
}

/// Search `path_var` (a colon-separated `PATH`-like string) for the first
/// executable entry named `name`. Returns the absolute [`Path`] of the first
/// hit.
pub fn search_path(path_var: &str, name: &str) -> Result<Option<Path>, AtfError> {
    for dir in path_var.split(':') {
        if dir.is_empty() {
            continue;
        }
        let dir = Path::new(dir)?;
        let candidate = dir.join(name)?;
        if exists(&candidate)? && is_executable(&candidate)? {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exists_true_for_tempdir() {
        let dir = tempfile::tempdir().unwrap();
        let p = Path::new(dir.path().to_string_lossy().into_owned()).unwrap();
        assert!(exists(&p).unwrap());
    }

    #[test]
    fn test_exists_false_for_missing() {
        let p = Path::new("/definitely/does/not/exist/xyz").unwrap();
        assert!(!exists(&p).unwrap());
    }

    #[test]
    fn test_file_kind_directory() {
        let dir = tempfile::tempdir().unwrap();
        let p = Path::new(dir.path().to_string_lossy().into_owned()).unwrap();
        assert_eq!(file_kind(&p).unwrap(), FileKind::Directory);
    }

    #[test]
    fn test_file_kind_regular() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f");
        std::fs::write(&file_path, b"hi").unwrap();
        let p = Path::new(file_path.to_string_lossy().into_owned()).unwrap();
        assert_eq!(file_kind(&p).unwrap(), FileKind::Regular);
    }

    #[test]
    fn test_is_executable_for_non_exec_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f");
        std::fs::write(&file_path, b"hi").unwrap();
        let mut perms = std::fs::metadata(&file_path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o644);
        std::fs::set_permissions(&file_path, perms).unwrap();
        let p = Path::new(file_path.to_string_lossy().into_owned()).unwrap();
        // Root bypasses the permission bits but not an all-zero exec mask,
        // so this assertion only holds when not running as root.
        if unsafe { libc::geteuid() } != 0 {
            assert!(!is_executable(&p).unwrap());
        }
    }

    #[test]
    fn test_is_executable_for_exec_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("f");
        std::fs::write(&file_path, b"#!/bin/sh\n").unwrap();
        let mut perms = std::fs::metadata(&file_path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&file_path, perms).unwrap();
        let p = Path::new(file_path.to_string_lossy().into_owned()).unwrap();
        assert!(is_executable(&p).unwrap());
    }

    #[test]
    fn test_is_executable_missing_file_returns_false() {
        let p = Path::new("/does/not/exist").unwrap();
        assert!(!is_executable(&p).unwrap());
    }

    #[test]
    fn test_search_path_finds_executable() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("mytool");
        std::fs::write(&file_path, b"#!/bin/sh\n").unwrap();
        let mut perms = std::fs::metadata(&file_path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
        std::fs::set_permissions(&file_path, perms).unwrap();

        let path_var = dir.path().to_string_lossy().into_owned();
        let found = search_path(&path_var, "mytool").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_search_path_misses_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let path_var = dir.path().to_string_lossy().into_owned();
        let found = search_path(&path_var, "nope-not-here").unwrap();
        assert!(found.is_none());
    }
}
