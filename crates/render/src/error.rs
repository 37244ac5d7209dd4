//! Render Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction.

use derive_more::{Display, Error};

/// A render error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for render operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The configured front-controller executable could not be found.
    #[display("render command `{_0}` not found")]
    CommandNotFound(#[error(not(source))] String),
    #[display("cannot render `{_0}`: not an absolute http(s) URL")]
    InvalidUrl(#[error(not(source))] String),
    #[display("render command timed out")]
    Timeout,
    /// The command exited with a non-zero exit code (or was killed by a
    /// signal, reported as `-1`).
    #[display("render command exited with code: {_0}")]
    Failed(#[error(not(source))] i32),
    /// The command's output was not a CGI response.
    #[display("malformed render output: {_0}")]
    MalformedOutput(#[error(not(source))] String),
    #[display("I/O error while rendering")]
    Io,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Failed(_) | Self::Io)
    }
}
