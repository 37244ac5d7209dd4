//! Library Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Errors raised by the other workspace
//! crates (queue, storage, render, urls) are wrapped into one of these kinds
//! with `or_raise`, so the original cause stays in the tree.

use crate::content::NodeId;
use derive_more::{Display, Error};

/// A library error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Classifies a publishing failure by what the caller should do about it.
///
/// ### Per-URL Errors
/// Recorded against the URL; the job carries on with the next one.
/// - [`ErrorKind::InvalidUrl`]
/// - [`ErrorKind::RenderFailure`]
/// - [`ErrorKind::WriteFailure`]
/// - [`ErrorKind::LockContention`]
///
/// ### Fatal Errors
/// Abort the current iteration; persisted state is resumed on the next run.
/// - [`ErrorKind::Queue`]
/// - [`ErrorKind::Configuration`]
/// - [`ErrorKind::AliasCycle`]
/// - [`ErrorKind::NodeNotFound`]
/// - [`ErrorKind::Template`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The URL cannot be represented as a cache file.
    #[display("invalid URL: {_0}")]
    InvalidUrl(#[error(not(source))] String),
    /// The page could not be rendered, or rendered with a 5xx status.
    #[display("failed to render {_0}")]
    RenderFailure(#[error(not(source))] String),
    /// Cache artifacts for the URL could not be written or removed.
    #[display("failed to write cache artifacts for {_0}")]
    WriteFailure(#[error(not(source))] String),
    /// Another worker holds the resource.
    #[display("held by another worker: {_0}")]
    LockContention(#[error(not(source))] String),
    #[display("invalid configuration")]
    Configuration,
    /// The durable queue could not be read or written.
    #[display("queue storage failure")]
    Queue,
    #[display("content node {_0} aliases itself")]
    AliasCycle(#[error(not(source))] NodeId),
    #[display("content node {_0} does not exist")]
    NodeNotFound(#[error(not(source))] NodeId),
    #[display("failed to render artifact template")]
    Template,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RenderFailure(_) | Self::WriteFailure(_) | Self::LockContention(_) | Self::Queue)
    }
}
