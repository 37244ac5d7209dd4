use derive_more::{Display, Error};
use std::io::Error as IoError;
use std::path::PathBuf;

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The cache file asked for is not there.
    #[display("no such cache file: {}", _0.display())]
    Missing(#[error(not(source))] PathBuf),
    #[display("access to {} was refused", _0.display())]
    Denied(#[error(not(source))] PathBuf),
    /// Relative path that is empty or climbs out of the cache root, or a
    /// root that cannot hold a cache.
    #[display("invalid cache path: {}", _0.display())]
    InvalidPath(#[error(not(source))] PathBuf),
    /// A directory walk turned up something outside the cache root.
    #[display("{} is outside the cache root", _0.display())]
    OutsideRoot(#[error(not(source))] PathBuf),
    /// The blocking write task was cancelled or panicked.
    #[display("write of {} did not complete", _0.display())]
    WriteAborted(#[error(not(source))] PathBuf),
    #[display("I/O error: {_0}")]
    Io(IoError),
}

impl ErrorKind {
    pub(crate) fn from_io(err: IoError, path: impl Into<PathBuf>) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::Missing(path.into()),
            std::io::ErrorKind::PermissionDenied => Self::Denied(path.into()),
            _ => Self::Io(err),
        }
    }

    /// Disk pressure and interrupted writes may clear up by themselves; a
    /// bad path or a permission problem will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Io(_) | Self::WriteAborted(_))
    }
}
