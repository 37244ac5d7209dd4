//! Writing rendered pages into the static cache directory.
//!
//! Each URL owns up to three files, named after its
//! [cache path](staticpub_urls::PathMapper):
//!
//! - `<path>.html`: the rendered body (or a meta-refresh page for redirects),
//! - `<path>.php`: a PHP front replaying status and headers (optional),
//! - `<path>.stale.html`: a copy with the stale notice shown, served while
//!   the page is being regenerated (only for pages carrying the marker).
//!
//! Every write goes through [`CacheStore::put`](staticpub_storage::CacheStore::put),
//! so a reader never sees a half-written file.

mod artifact;
mod assets;

use self::artifact::{Artifacts, replace_all};
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::TryStreamExt;
use staticpub_config::OutputConfig;
use staticpub_render::{Renderer, Response};
use staticpub_storage::{ArtifactKind, CachePath, StoreHandle};
use staticpub_urls::PathMapper;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use time::UtcDateTime;
use tracing::{debug, instrument, warn};

/// Result of publishing one URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// The page rendered with a non-error status (2xx or 3xx).
    pub success: bool,
    pub status: u16,
    /// Files written, relative to the cache root.
    pub published: Vec<PathBuf>,
    pub bytes: u64,
}

pub struct FilesystemPublisher {
    storage: StoreHandle,
    renderer: Option<Arc<dyn Renderer>>,
    mapper: PathMapper,
    artifacts: Artifacts,
    options: OutputConfig,
}
impl FilesystemPublisher {
    pub fn new(
        storage: StoreHandle,
        renderer: Arc<dyn Renderer>,
        mapper: PathMapper,
        options: OutputConfig,
    ) -> Result<Self> {
        Ok(Self { storage, renderer: Some(renderer), mapper, artifacts: Artifacts::load()?, options })
    }

    /// A publisher without a renderer, for purging and inspecting the cache.
    /// Publishing with it fails with [`ErrorKind::Configuration`].
    pub fn purge_only(storage: StoreHandle, mapper: PathMapper, options: OutputConfig) -> Result<Self> {
        Ok(Self { storage, renderer: None, mapper, artifacts: Artifacts::load()?, options })
    }

    pub fn mapper(&self) -> &PathMapper {
        &self.mapper
    }

    pub fn options(&self) -> &OutputConfig {
        &self.options
    }

    /// Render `url` and write its cache artifacts.
    ///
    /// - 5xx responses, and failures of the renderer itself, are
    ///   [`ErrorKind::RenderFailure`]; nothing is written.
    /// - 3xx responses write a redirect page (and PHP redirect).
    /// - 3xx responses without a `Location` are [`ErrorKind::RenderFailure`].
    /// - other responses below 400 write the body, the PHP front and the
    ///   stale copy. A stale copy left by an earlier render is removed when
    ///   the body no longer carries the marker.
    /// - 4xx responses write nothing unless `force` is set and PHP output is
    ///   enabled, in which case they are written like any other page so the
    ///   error status is served from cache too.
    #[instrument(skip(self), fields(backend = self.storage.name()))]
    pub async fn publish_url(&self, url: &str, force: bool) -> Result<PublishOutcome> {
        let path = self.path(url)?;
        let Some(renderer) = &self.renderer else {
            exn::bail!(ErrorKind::Configuration);
        };
        let response = renderer.render(url).await.or_raise(|| ErrorKind::RenderFailure(url.to_string()))?;
        if response.is_server_error() {
            warn!(status = response.status, "render returned a server error");
            exn::bail!(ErrorKind::RenderFailure(url.to_string()));
        }

        let mut outcome =
            PublishOutcome { success: response.status < 400, status: response.status, ..Default::default() };
        if response.is_redirect() {
            let Some(location) = response.location() else {
                warn!(status = response.status, "redirect without a location");
                exn::bail!(ErrorKind::RenderFailure(url.to_string()));
            };
            let page = self.artifacts.redirect_html(location)?;
            self.write(url, &mut outcome, &path, ArtifactKind::Page, &page).await?;
            if self.options.php {
                let php = self.artifacts.redirect_php(response.status, location)?;
                self.write(url, &mut outcome, &path, ArtifactKind::Php, &php).await?;
            }
            self.remove(url, &path, ArtifactKind::Stale).await?;
        } else if response.status < 400 || (force && self.options.php) {
            self.write(url, &mut outcome, &path, ArtifactKind::Page, &response.body).await?;
            if self.options.php {
                self.write_php(url, &mut outcome, &path, &response).await?;
            }
            match self.stale_copy(&response.body) {
                Some(stale) => self.write(url, &mut outcome, &path, ArtifactKind::Stale, &stale).await?,
                None => {
                    self.remove(url, &path, ArtifactKind::Stale).await?;
                },
            }
        } else {
            debug!(status = response.status, "not caching error response");
        }
        Ok(outcome)
    }

    /// Remove every artifact of `url`. Artifacts that do not exist are
    /// skipped; returns the files actually removed.
    #[instrument(skip(self), fields(backend = self.storage.name()))]
    pub async fn purge_url(&self, url: &str) -> Result<Vec<PathBuf>> {
        let path = self.path(url)?;
        let mut removed = Vec::new();
        for kind in ArtifactKind::ALL {
            if let Some(file) = self.remove(url, &path, kind).await? {
                removed.push(file);
            }
        }
        Ok(removed)
    }

    /// Remove every artifact in the cache. Returns the number of files removed.
    #[instrument(skip(self), fields(backend = self.storage.name()))]
    pub async fn purge_all(&self) -> Result<usize> {
        let files = self.storage.all_files().await.or_raise(|| ErrorKind::WriteFailure("*".to_string()))?;
        let mut removed = 0;
        for file in files.into_iter().filter(|f| f.kind().is_some()) {
            if self.storage.remove(&file.path).await.or_raise(|| ErrorKind::WriteFailure(file.path.to_string()))? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Every URL that currently has a cached page.
    #[instrument(skip(self), fields(backend = self.storage.name()))]
    pub async fn published_urls(&self) -> Result<BTreeSet<String>> {
        let mut urls = BTreeSet::new();
        let mut files = self.storage.files();
        while let Some(file) = files.try_next().await.or_raise(|| ErrorKind::WriteFailure("*".to_string()))? {
            if file.kind() != Some(ArtifactKind::Page) {
                continue;
            }
            match self.mapper.path_to_url(file.path.as_path()) {
                Ok(url) => {
                    urls.insert(url);
                },
                Err(e) => warn!(path = %file.path, error = %e, "ignoring unmappable cache file"),
            }
        }
        Ok(urls)
    }

    fn path(&self, url: &str) -> Result<String> {
        self.mapper.url_to_path(url).or_raise(|| ErrorKind::InvalidUrl(url.to_string()))
    }

    fn stale_copy(&self, body: &[u8]) -> Option<Vec<u8>> {
        let marker = self.options.stale_marker.as_bytes();
        if marker.is_empty() || !body.windows(marker.len()).any(|w| w == marker) {
            return None;
        }
        Some(replace_all(body, marker, self.options.stale_notice.as_bytes()))
    }

    async fn write_php(&self, url: &str, outcome: &mut PublishOutcome, path: &str, response: &Response) -> Result<()> {
        let php = self.artifacts.php_wrapper(response, self.options.max_age, UtcDateTime::now())?;
        self.write(url, outcome, path, ArtifactKind::Php, &php).await
    }

    fn locate(&self, url: &str, path: &str, kind: ArtifactKind) -> Result<CachePath> {
        kind.locate(path).or_raise(|| ErrorKind::InvalidUrl(url.to_string()))
    }

    async fn write(
        &self,
        url: &str,
        outcome: &mut PublishOutcome,
        path: &str,
        kind: ArtifactKind,
        data: &[u8],
    ) -> Result<()> {
        let file = self.locate(url, path, kind)?;
        self.storage.put(&file, data).await.or_raise(|| ErrorKind::WriteFailure(url.to_string()))?;
        outcome.bytes += data.len() as u64;
        outcome.published.push(file.into());
        Ok(())
    }

    async fn remove(&self, url: &str, path: &str, kind: ArtifactKind) -> Result<Option<PathBuf>> {
        let file = self.locate(url, path, kind)?;
        match self.storage.remove(&file).await.or_raise(|| ErrorKind::WriteFailure(url.to_string()))? {
            true => Ok(Some(file.into())),
            false => Ok(None),
        }
    }
}
