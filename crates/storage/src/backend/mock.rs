use crate::backend::{CacheStore, CachedFileStream};
use crate::error::{ErrorKind, Result};
use crate::{CachePath, CachedFile};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;

/// A cache directory held in memory, for tests of code that publishes.
///
/// ```
/// use staticpub_storage::backend::MockBackend;
/// use staticpub_storage::{CachePath, CacheStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let cache = MockBackend::with_files([("about.html", "<h1>About</h1>")]);
/// assert!(cache.remove(&CachePath::parse("about.html")?).await?);
/// assert!(cache.paths().await.is_empty());
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct MockBackend {
    files: RwLock<BTreeMap<CachePath, (OffsetDateTime, Vec<u8>)>>,
    disk_full: AtomicBool,
}

impl MockBackend {
    /// Panics on a path that [`CachePath::parse`] refuses; a broken test
    /// setup should not get as far as the assertions.
    pub fn with_files(files: impl IntoIterator<Item = (impl AsRef<str>, impl Into<Vec<u8>>)>) -> Self {
        let now = OffsetDateTime::now_utc();
        let files = files
            .into_iter()
            .map(|(path, data)| match CachePath::parse(path.as_ref()) {
                Ok(path) => (path, (now, data.into())),
                Err(e) => panic!("MockBackend::with_files: {e}"),
            })
            .collect();
        Self { files: RwLock::new(files), disk_full: AtomicBool::new(false) }
    }

    /// While set, every [`put()`](CacheStore::put) fails with a retryable
    /// I/O error and leaves the stored file alone.
    pub fn fail_writes(&self, fail: bool) {
        self.disk_full.store(fail, Ordering::SeqCst);
    }

    /// Every stored path, sorted.
    pub async fn paths(&self) -> Vec<PathBuf> {
        self.files.read().await.keys().cloned().map(PathBuf::from).collect()
    }
}

#[async_trait]
impl CacheStore for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn files(&self) -> CachedFileStream<'_> {
        Box::pin(async_stream::stream! {
            // Snapshot, so the lock is not held across yields.
            let snapshot: Vec<CachedFile> = self
                .files
                .read()
                .await
                .iter()
                .map(|(path, (modified, data))| CachedFile { path: path.clone(), size: data.len() as u64, modified: *modified })
                .collect();
            for file in snapshot {
                yield Ok(file);
            }
        })
    }

    async fn read(&self, path: &CachePath) -> Result<Vec<u8>> {
        match self.files.read().await.get(path) {
            Some((_, data)) => Ok(data.clone()),
            None => exn::bail!(ErrorKind::Missing(path.clone().into())),
        }
    }

    async fn put(&self, path: &CachePath, data: &[u8]) -> Result<()> {
        if self.disk_full.load(Ordering::SeqCst) {
            exn::bail!(ErrorKind::Io(std::io::Error::new(std::io::ErrorKind::StorageFull, "mock disk is full")));
        }
        self.files.write().await.insert(path.clone(), (OffsetDateTime::now_utc(), data.to_vec()));
        Ok(())
    }

    async fn remove(&self, path: &CachePath) -> Result<bool> {
        Ok(self.files.write().await.remove(path).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(path: &str) -> CachePath {
        CachePath::parse(path).unwrap()
    }

    #[tokio::test]
    async fn test_full_disk_keeps_previous_page() {
        let cache = MockBackend::with_files([("index.html", "old")]);
        cache.fail_writes(true);
        let err = cache.put(&at("index.html"), b"new").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(cache.read(&at("index.html")).await.unwrap(), b"old");

        cache.fail_writes(false);
        cache.put(&at("index.html"), b"new").await.unwrap();
        assert_eq!(cache.read(&at("index.html")).await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_files_lists_everything() {
        let cache = MockBackend::with_files([("blog/post.html", "ab"), ("robots.txt", "abc")]);
        let sizes: Vec<_> = cache.all_files().await.unwrap().into_iter().map(|f| (f.path.to_string(), f.size)).collect();
        assert_eq!(sizes, [("blog/post.html".to_string(), 2), ("robots.txt".to_string(), 3)]);
        let err = cache.read(&at("missing.html")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Missing(_)));
    }

    #[test]
    #[should_panic(expected = "invalid cache path")]
    fn test_with_files_refuses_escaping_paths() {
        MockBackend::with_files([("../outside.html", "x")]);
    }
}
