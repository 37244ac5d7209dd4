//! Canned responses for testing.

use crate::error::{ErrorKind, Result};
use crate::{Renderer, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Renderer serving canned responses keyed by URL.
///
/// Unknown URLs render as `404 Not Found`. Individual URLs can be made to
/// fail a number of times before succeeding, to exercise retry handling.
///
/// # Examples
///
/// ```
/// use staticpub_render::{Renderer, StaticRenderer};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let renderer = StaticRenderer::new().with_page("https://example.com/", "<h1>Home</h1>");
/// let response = renderer.render("https://example.com/").await?;
/// assert_eq!(response.status, 200);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct StaticRenderer {
    responses: HashMap<String, Response>,
    failures: Mutex<HashMap<String, usize>>,
    calls: Mutex<Vec<String>>,
}
impl StaticRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        self.with_response(url, Response::new(200, body))
    }

    pub fn with_redirect(self, url: impl Into<String>, status: u16, location: impl Into<String>) -> Self {
        self.with_response(url, Response::new(status, "").with_header("Location", location))
    }

    pub fn with_response(mut self, url: impl Into<String>, response: Response) -> Self {
        self.responses.insert(url.into(), response);
        self
    }

    /// Fail the next `times` renders of `url` as if the front controller crashed.
    pub fn fail(&self, url: impl Into<String>, times: usize) {
        self.failures.lock().unwrap_or_else(|e| e.into_inner()).insert(url.into(), times);
    }

    /// Every URL rendered so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Renderer for StaticRenderer {
    async fn render(&self, url: &str) -> Result<Response> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(url.to_string());
        {
            let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(remaining) = failures.get_mut(url)
                && *remaining > 0
            {
                *remaining -= 1;
                exn::bail!(ErrorKind::Failed(255));
            }
        }
        Ok(self.responses.get(url).cloned().unwrap_or_else(|| Response::new(404, "Not Found")))
    }
}
