//! URL Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction, in the same shape as every other crate in the workspace.

use derive_more::{Display, Error};

/// A URL error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for URL operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The URL could not be parsed, or cannot be represented as a cache file
    /// (for example it carries a query string).
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// The configured base URL is not an absolute http(s) URL.
    #[display("invalid base URL: {_0}")]
    InvalidBase(#[error(not(source))] String),
    /// A cache path could not be mapped back onto a URL.
    #[display("invalid cache path: {_0}")]
    InvalidPath(#[error(not(source))] String),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    ///
    /// Bad input stays bad input, no matter how many times you ask.
    pub fn is_retryable(&self) -> bool {
        false
    }
}
