//! The render collaborator: produce the full response for a URL as if it
//! had been requested over HTTP, without going over the network.

mod cgi;
mod command;
pub mod error;
#[cfg(feature = "mock")]
mod fixed;
mod response;

pub use crate::command::CommandRenderer;
use crate::error::Result;
#[cfg(feature = "mock")]
pub use crate::fixed::StaticRenderer;
pub use crate::response::{DEFAULT_CONTENT_TYPE, Response};
use async_trait::async_trait;

/// Turns an absolute URL into a [`Response`].
///
/// Implementations may block for as long as the page takes to build; callers
/// process one URL at a time.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, url: &str) -> Result<Response>;
}
