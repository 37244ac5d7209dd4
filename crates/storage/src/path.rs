//! Relative locations inside the cache directory.

use crate::error::{ErrorKind, Result};
use derive_more::Display;
use std::path::{Component, Path, PathBuf};

/// A normalised path relative to the cache root.
///
/// Construction resolves `.` and `..` segments and drops repeated or
/// trailing separators; anything that would climb out of the root, names the
/// root itself, or smuggles a NUL byte into a syscall is refused with
/// [`InvalidPath`](ErrorKind::InvalidPath). Backslashes are not separators
/// on Unix and are kept as part of the file name.
///
/// ```
/// use staticpub_storage::CachePath;
/// assert_eq!(CachePath::parse("blog//./2024/../post.html/").unwrap().to_string(), "blog/post.html");
/// assert!(CachePath::parse("blog/../../etc/passwd").is_err());
/// ```
#[derive(Debug, Clone, Display, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{}", _0.display())]
pub struct CachePath(PathBuf);
impl CachePath {
    pub fn parse(raw: impl AsRef<Path>) -> Result<Self> {
        let raw = raw.as_ref();
        let invalid = || ErrorKind::InvalidPath(raw.to_path_buf());
        let mut segments = Vec::new();
        for component in raw.components() {
            match component {
                Component::Normal(segment) if segment.as_encoded_bytes().contains(&0) => exn::bail!(invalid()),
                Component::Normal(segment) => segments.push(segment),
                Component::ParentDir if segments.pop().is_none() => exn::bail!(invalid()),
                Component::ParentDir | Component::CurDir | Component::RootDir => {},
                Component::Prefix(_) => exn::bail!(invalid()),
            }
        }
        if segments.is_empty() {
            exn::bail!(invalid());
        }
        Ok(Self(segments.into_iter().collect()))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Name of the file, without the directories leading up to it.
    pub fn file_name(&self) -> &str {
        self.0.file_name().and_then(|name| name.to_str()).unwrap_or_default()
    }
}
impl AsRef<Path> for CachePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
impl From<CachePath> for PathBuf {
    fn from(path: CachePath) -> Self {
        path.0
    }
}
