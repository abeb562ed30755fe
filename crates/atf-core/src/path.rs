//! Canonical POSIX path handling.
//!
//! Mirrors `atf::fs::path` from the original C++ sources: a path is always
//! non-empty, has no run of consecutive separators, and has no trailing
//! separator except for the root itself.

use std::fmt;

use crate::error::AtfError;

/// A canonical, non-empty POSIX path.
///
/// Equality is byte-exact on the canonical form; there is no notion of
/// "equivalent" paths beyond the canonicalization rules applied in [`Path::new`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Path {
    inner: String,
}

impl Path {
    /// Build a canonical path from an arbitrary string.
    ///
    /// Collapses runs of `/` into one, and strips a trailing `/` unless the
    /// whole path is the root.
    pub fn new(s: impl AsRef<str>) -> Result<Self, AtfError> {
        let s = s.as_ref();
        if s.is_empty() {
            return Err(AtfError::EmptyPath);
        }

        let mut out = String::with_capacity(s.len());
        let mut last_was_sep = false;
        for ch in s.chars() {
            if ch == '/' {
                if !last_was_sep {
                    out.push('/');
                }
                last_was_sep = true;
            } else {
                out.push(ch);
                last_was_sep = false;
            }
        }

        if out.len() > 1 && out.ends_with('/') {
            out.pop();
        }

        if out.is_empty() {
            // Input was made entirely of separators, e.g. "//" -> "/".
            out.push('/');
        }

        Ok(Path { inner: out })
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.starts_with('/')
    }

    pub fn is_root(&self) -> bool {
        self.inner == "/"
    }

    /// The leaf (final path component), or the whole path if there is no
    /// separator.
    pub fn leaf(&self) -> &str {
        match self.inner.rfind('/') {
            Some(idx) => &self.inner[idx + 1..],
            None => &self.inner,
        }
    }

    /// The parent path.
    ///
    /// - A bare name (`"foo"`) has parent `"."`.
    /// - A path with a single leading separator and no other separator
    ///   (`"/foo"`) has parent `"/"`.
    /// - Otherwise, everything before the last separator.
    pub fn parent(&self) -> Path {
        match self.inner.rfind('/') {
            None => Path {
                inner: ".".to_string(),
            },
            Some(0) => Path {
                inner: "/".to_string(),
            },
            Some(idx) => Path {
                inner: self.inner[..idx].to_string(),
            },
        }
    }

    /// Join `self` with `other`, canonicalizing the result.
    ///
    /// If `other` is absolute, its leading separators are folded into the
    /// join point rather than treated as an override (unlike
    /// [`std::path::Path::join`]).
    pub fn join(&self, other: impl AsRef<str>) -> Result<Path, AtfError> {
        let other = other.as_ref();
        if other.is_empty() {
            return Path::new(self.inner.clone());
        }
        let trimmed = other.trim_start_matches('/');
        if self.is_root() {
            Path::new(format!("/{trimmed}"))
        } else {
            Path::new(format!("{}/{trimmed}", self.inner))
        }
    }

    /// Resolve to an absolute path against `cwd`. If already absolute, this
    /// is the identity (after canonicalization).
    pub fn to_absolute_against(&self, cwd: &Path) -> Result<Path, AtfError> {
        if self.is_absolute() {
            Path::new(self.inner.clone())
        } else {
            cwd.join(&self.inner)
        }
    }

    /// Resolve to an absolute path against the process's current working
    /// directory.
    pub fn to_absolute(&self) -> Result<Path, AtfError> {
        if self.is_absolute() {
            return Path::new(self.inner.clone());
        }
        let cwd = std::env::current_dir()
            .map_err(|e| AtfError::FsError(format!("cannot determine current directory: {e}")))?;
        let cwd = Path::new(cwd.to_string_lossy().into_owned())?;
        cwd.join(&self.inner)
    }

    pub fn as_std_path(&self) -> &std::path::Path {
        std::path::Path::new(&self.inner)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner)
    }
}

impl AsRef<std::path::Path> for Path {
    fn as_ref(&self) -> &std::path::Path {
        self.as_std_path()
    }
}
