//! Heartbeat lock file.
//!
//! The file holds the owner's pid and the time of its last heartbeat. A lock
//! whose heartbeat is older than the threshold is considered dead and may be
//! taken over. Reading and rewriting the file are separate steps, so two
//! processes that find a dead lock at the same moment can both take it: the
//! lock only works for workers on a single host that start at different
//! times. Use the job engine for anything else.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::UtcDateTime;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Heartbeat {
    pid: u32,
    beat_at: i64,
}

#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
}
impl PidLock {
    /// Take the lock for this process.
    pub async fn acquire(path: impl Into<PathBuf>, threshold: Duration) -> Result<Self> {
        Self::acquire_as(path.into(), std::process::id(), threshold, UtcDateTime::now()).await
    }

    async fn acquire_as(path: PathBuf, pid: u32, threshold: Duration, now: UtcDateTime) -> Result<Self> {
        let contended = || ErrorKind::LockContention(path.display().to_string());
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<Heartbeat>(&bytes) {
                Ok(held) if held.pid != pid && is_fresh(held, threshold, now) => {
                    debug!(owner = held.pid, path = %path.display(), "lock is held");
                    exn::bail!(contended());
                },
                Ok(held) if held.pid != pid => {
                    warn!(owner = held.pid, path = %path.display(), "taking over dead lock");
                },
                Ok(_) => {},
                Err(e) => warn!(path = %path.display(), error = %e, "taking over unreadable lock"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(e).or_raise(contended),
        }
        let lock = Self { path, pid };
        lock.write(now).await?;
        Ok(lock)
    }

    /// Refresh the heartbeat.
    pub async fn beat(&self) -> Result<()> {
        self.write(UtcDateTime::now()).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write(&self, now: UtcDateTime) -> Result<()> {
        let contended = || ErrorKind::LockContention(self.path.display().to_string());
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.or_raise(contended)?;
        }
        let heartbeat = Heartbeat { pid: self.pid, beat_at: now.unix_timestamp() };
        let json = serde_json::to_vec(&heartbeat).or_raise(contended)?;
        tokio::fs::write(&self.path, json).await.or_raise(contended)
    }
}
impl Drop for PidLock {
    fn drop(&mut self) {
        let ours = std::fs::read(&self.path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<Heartbeat>(&bytes).ok())
            .is_some_and(|held| held.pid == self.pid);
        if ours && let Err(e) = std::fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "could not remove lock file");
        }
    }
}

fn is_fresh(held: Heartbeat, threshold: Duration, now: UtcDateTime) -> bool {
    let age = now.unix_timestamp().saturating_sub(held.beat_at);
    age < i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX)
}
