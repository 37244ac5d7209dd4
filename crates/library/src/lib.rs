//! Static publishing: work out which cached pages a content change affects,
//! queue them, and regenerate or purge them.
//!
//! - [`resolve`] turns one content mutation into the set of pages to update
//!   and delete.
//! - [`trigger`] records those sets during a transaction and persists them as
//!   queue entries and batched jobs.
//! - [`job`] drains the job queue, one chunk of URLs at a time.
//! - [`publish`] renders pages and writes (or removes) their cache files.
//! - [`legacy`] drains queue entries directly under a heartbeat lock file,
//!   for single-host setups that do not use jobs.

pub mod content;
pub mod error;
pub mod job;
pub mod legacy;
pub mod publish;
pub mod resolve;
pub mod trigger;

#[cfg(test)]
pub(crate) mod fixtures;

use crate::content::{ContentTree, Publishable};
use crate::error::Result;
use crate::publish::FilesystemPublisher;
use staticpub_config::Config;
use staticpub_queue::{EntryRepository, JobRepository};
use staticpub_urls::Sanitiser;
use std::collections::BTreeSet;
use std::time::Duration;

/// Tunables for draining the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// URLs processed per job step (`0` means the whole job in one step).
    pub chunk_size: usize,
    /// Failed attempts after which a URL is given up on.
    pub max_url_attempts: u32,
    /// Cache error responses too, when PHP output is enabled.
    pub force_publish: bool,
    /// How long a daemon sleeps when there is nothing to do.
    pub poll_interval: Duration,
}
impl Default for Settings {
    fn default() -> Self {
        Self { chunk_size: 200, max_url_attempts: 3, force_publish: true, poll_interval: Duration::from_secs(1) }
    }
}
impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        Self {
            chunk_size: config.chunk_size,
            max_url_attempts: config.max_url_attempts.max(1),
            force_publish: config.output.force_publish,
            poll_interval: config.poll_interval(),
        }
    }
}

/// Everything a worker needs to process queued work.
pub struct Context {
    pub tree: Box<dyn ContentTree>,
    pub publisher: FilesystemPublisher,
    pub entries: EntryRepository,
    pub jobs: JobRepository,
    pub sanitiser: Sanitiser,
    pub settings: Settings,
}
impl Context {
    /// Normalised URLs of every live node.
    pub fn live_urls(&self) -> BTreeSet<String> {
        self.tree
            .live_nodes()
            .into_iter()
            .flat_map(|node| node.urls_to_cache().into_keys())
            .filter_map(|url| self.sanitiser.normalize(&url).ok())
            .collect()
    }

    /// Cached pages that no live node produces.
    pub async fn orphans(&self) -> Result<BTreeSet<String>> {
        let live = self.live_urls();
        let published = self.publisher.published_urls().await?;
        Ok(published.into_iter().filter(|url| !live.contains(url)).collect())
    }
}
