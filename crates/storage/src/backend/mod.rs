//! Where the cache directory physically lives.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::{CachePath, CachedFile};
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::pin::Pin;

pub type CachedFileStream<'a> = Pin<Box<dyn Stream<Item = Result<CachedFile>> + Send + 'a>>;

/// Operations the publisher performs on the cache directory.
///
/// A web server reads from the same directory while workers write to it, so
/// [`put()`](Self::put) must replace files atomically: a request sees the old
/// page or the new page, never a truncated one.
///
/// ```
/// use staticpub_storage::{ArtifactKind, CacheStore, error::Result};
///
/// async fn republish(store: &dyn CacheStore, body: &[u8]) -> Result<()> {
///     store.put(&ArtifactKind::Page.locate("about/team")?, body).await?;
///     store.remove(&ArtifactKind::Stale.locate("about/team")?).await?;
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Label for log fields.
    fn name(&self) -> &str;

    /// Walk every file in the cache, in no particular order.
    fn files(&self) -> CachedFileStream<'_>;

    async fn all_files(&self) -> Result<Vec<CachedFile>> {
        self.files().try_collect().await
    }

    /// Fails with [`Missing`](crate::error::ErrorKind::Missing) when there
    /// is no such file.
    async fn read(&self, path: &CachePath) -> Result<Vec<u8>>;

    /// Create or atomically replace a file, creating directories on the way.
    async fn put(&self, path: &CachePath, data: &[u8]) -> Result<()>;

    /// Delete a file. Returns `false` if it was already gone.
    async fn remove(&self, path: &CachePath) -> Result<bool>;
}
