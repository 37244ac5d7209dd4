//! Cache directory on the local filesystem.

use crate::backend::{CacheStore, CachedFileStream};
use crate::error::{ErrorKind, Result};
use crate::{CachePath, CachedFile};
use async_stream::stream;
use async_trait::async_trait;
use exn::ResultExt;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::fs;

/// In-flight writes are named `.staticpub-XXXXXX.part` and never listed.
const PART_PREFIX: &str = ".staticpub-";
const PART_SUFFIX: &str = ".part";

/// Fill a temporary file next to `target`, then rename it over `target`.
///
/// Same directory means same filesystem, so the rename is atomic. When
/// anything fails the temporary file is dropped and `target` is untouched.
fn replace_file(target: &Path, data: &[u8]) -> std::io::Result<()> {
    let dir = target
        .parent()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "cache file has no directory"))?;
    let mut part = tempfile::Builder::new();
    part.prefix(PART_PREFIX).suffix(PART_SUFFIX);
    // The web server usually runs as another user.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        part.permissions(std::fs::Permissions::from_mode(0o644));
    }
    let mut part = part.tempfile_in(dir)?;
    part.as_file_mut().write_all(data)?;
    part.as_file().sync_all()?;
    part.persist(target).map_err(|e| e.error)?;
    Ok(())
}

fn is_part(name: &str) -> bool {
    name.starts_with(PART_PREFIX) && name.ends_with(PART_SUFFIX)
}

/// A cache directory on local disk, typically the document root of a web
/// server.
#[derive(Debug, Clone)]
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}
impl LocalBackend {
    /// Open the cache at `root`, creating the directory if needed. The path
    /// must be absolute.
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() || (root.exists() && !root.is_dir()) {
            exn::bail!(ErrorKind::InvalidPath(root));
        }
        // Once at startup; not worth an async constructor.
        std::fs::create_dir_all(&root).map_err(|e| ErrorKind::from_io(e, &root))?;
        Ok(Self { name: name.into(), root })
    }

    fn on_disk(&self, path: &CachePath) -> PathBuf {
        self.root.join(path)
    }

    /// Turn one directory entry into a listed file, a directory to visit, or
    /// nothing.
    async fn inspect(&self, entry: fs::DirEntry) -> Result<(Option<CachedFile>, Option<PathBuf>)> {
        let found = entry.path();
        let metadata = entry.metadata().await.map_err(|e| ErrorKind::from_io(e, &found))?;
        if metadata.is_dir() {
            return Ok((None, Some(found)));
        }
        if !metadata.is_file() || entry.file_name().to_str().is_some_and(is_part) {
            return Ok((None, None));
        }
        let relative = found.strip_prefix(&self.root).or_raise(|| ErrorKind::OutsideRoot(found.clone()))?;
        let file = CachedFile {
            path: CachePath::parse(relative)?,
            size: metadata.len(),
            modified: metadata.modified().map_err(ErrorKind::Io)?.into(),
        };
        Ok((Some(file), None))
    }
}

#[async_trait]
impl CacheStore for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn files(&self) -> CachedFileStream<'_> {
        let mut pending = vec![self.root.clone()];
        Box::pin(stream! {
            while let Some(dir) = pending.pop() {
                let mut entries = match fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    // Removed by a purge since it was queued.
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => {
                        yield Err(exn::Exn::from(ErrorKind::from_io(e, &dir)));
                        continue;
                    },
                };
                loop {
                    match entries.next_entry().await {
                        Ok(Some(entry)) => match self.inspect(entry).await {
                            Ok((Some(file), _)) => yield Ok(file),
                            Ok((None, Some(subdir))) => pending.push(subdir),
                            Ok((None, None)) => {},
                            Err(e) => yield Err(e),
                        },
                        Ok(None) => break,
                        Err(e) => {
                            yield Err(exn::Exn::from(ErrorKind::from_io(e, &dir)));
                            break;
                        },
                    }
                }
            }
        })
    }

    async fn read(&self, path: &CachePath) -> Result<Vec<u8>> {
        Ok(fs::read(self.on_disk(path)).await.map_err(|e| ErrorKind::from_io(e, path.as_path()))?)
    }

    #[tracing::instrument(level = "debug", skip(self, path, data), fields(path = %path, bytes = data.len()))]
    async fn put(&self, path: &CachePath, data: &[u8]) -> Result<()> {
        let target = self.on_disk(path);
        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).await.map_err(|e| ErrorKind::from_io(e, path.as_path()))?;
        }
        let data = data.to_vec();
        // tempfile is synchronous, and the fsync may take a while.
        let written = tokio::task::spawn_blocking(move || replace_file(&target, &data))
            .await
            .or_raise(|| ErrorKind::WriteAborted(path.clone().into()))?;
        Ok(written.map_err(|e| ErrorKind::from_io(e, path.as_path()))?)
    }

    async fn remove(&self, path: &CachePath) -> Result<bool> {
        match fs::remove_file(self.on_disk(path)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => exn::bail!(ErrorKind::from_io(e, path.as_path())),
        }
    }
}
