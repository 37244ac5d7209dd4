//! Turning content changes into durable work.
//!
//! A [`PublishQueue`] is created per triggering transaction: each content
//! mutation is [recorded](PublishQueue::record) into it, and at the end of
//! the transaction [`flush()`](PublishQueue::flush) writes queue entries and
//! batched jobs in one go. Nothing is persisted for a mutation that is never
//! flushed.

use crate::error::{ErrorKind, Result};
use crate::resolve::{AffectedSet, Mutation, Resolver};
use exn::ResultExt;
use staticpub_queue::{EntryAction, EntryRepository, Enqueued, JobKind, JobPayload, JobRepository, QueuedUrl};
use staticpub_urls::{BatchedUrl, Sanitiser, UrlBundler};
use time::UtcDateTime;
use tracing::{info, instrument};

/// Jobs and URLs written by one [`PublishQueue::flush`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub created: Vec<i64>,
    /// Identical work was already pending or running.
    pub duplicates: Vec<i64>,
    pub urls_to_update: usize,
    pub urls_to_delete: usize,
}
impl FlushReport {
    fn push(&mut self, enqueued: Enqueued) {
        match enqueued {
            Enqueued::Created(id) => self.created.push(id),
            Enqueued::Duplicate(id) => self.duplicates.push(id),
        }
    }
}

/// Accumulates the URLs to regenerate and purge for one transaction.
pub struct PublishQueue {
    update: UrlBundler,
    delete: UrlBundler,
    urls_per_job: usize,
    chunk_size: usize,
}
impl PublishQueue {
    pub fn new(sanitiser: Sanitiser, urls_per_job: usize, chunk_size: usize) -> Self {
        Self { update: UrlBundler::new(sanitiser), delete: UrlBundler::new(sanitiser), urls_per_job, chunk_size }
    }

    /// Add both sides of a resolved change.
    pub fn record(&mut self, affected: &AffectedSet) -> Result<()> {
        for (url, priority) in affected.update_urls() {
            self.update.add_url_with_priority(&url, priority).or_raise(|| ErrorKind::InvalidUrl(url.clone()))?;
        }
        for (url, priority) in affected.delete_urls() {
            self.delete.add_url_with_priority(&url, priority).or_raise(|| ErrorKind::InvalidUrl(url.clone()))?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.update.is_empty() && self.delete.is_empty()
    }

    /// Persist everything recorded so far and start over.
    ///
    /// Every URL gets a queue entry, and every batch of `urls_per_job` URLs a
    /// job. A URL recorded on both sides is only regenerated.
    #[instrument(skip_all, fields(update = self.update.len(), delete = self.delete.len()))]
    pub async fn flush(
        &mut self,
        entries: &EntryRepository,
        jobs: &JobRepository,
        now: UtcDateTime,
    ) -> Result<FlushReport> {
        let update = &self.update;
        self.delete.retain(|u| !update.contains(&u.url));

        let mut report = FlushReport {
            urls_to_update: self.update.len(),
            urls_to_delete: self.delete.len(),
            ..Default::default()
        };
        for (kind, action, bundler) in [
            (JobKind::Generate, EntryAction::Publish, &self.update),
            (JobKind::Delete, EntryAction::Purge, &self.delete),
        ] {
            if bundler.is_empty() {
                continue;
            }
            let urls = bundler.urls();
            let urls: Vec<(&str, i64)> = urls.iter().map(|u| (u.url.as_str(), u.priority)).collect();
            entries.enqueue_many(urls, action, now).await.or_raise(|| ErrorKind::Queue)?;
            for batch in bundler.batches(self.urls_per_job) {
                let queued: Vec<QueuedUrl> = batch.into_iter().map(queued_url).collect();
                report.push(enqueue_job(jobs, kind, queued, self.chunk_size, now).await?);
            }
        }
        self.update.clear();
        self.delete.clear();
        info!(created = report.created.len(), duplicates = report.duplicates.len(), "flushed publish queue");
        Ok(report)
    }
}

fn queued_url(batched: BatchedUrl) -> QueuedUrl {
    QueuedUrl { url: batched.url, priority: batched.priority, ordinal: batched.ordinal }
}

async fn enqueue_job(
    jobs: &JobRepository,
    kind: JobKind,
    urls: Vec<QueuedUrl>,
    chunk_size: usize,
    now: UtcDateTime,
) -> Result<Enqueued> {
    let signature = signature(kind, &urls);
    let steps = total_steps(urls.len(), chunk_size);
    let payload = JobPayload::new(urls);
    jobs.enqueue(kind, &signature, &payload, steps, now).await.or_raise(|| ErrorKind::Queue)
}

/// Queue a job regenerating every live page and purging everything else.
///
/// The URL list is built when the job first runs, so a rebuild queued while
/// another is still pending is a duplicate.
pub async fn enqueue_full_rebuild(jobs: &JobRepository, now: UtcDateTime) -> Result<Enqueued> {
    enqueue_job(jobs, JobKind::FullRebuild, Vec::new(), 0, now).await
}

/// Identity of a job: its kind and the set of URLs it covers.
pub(crate) fn signature(kind: JobKind, urls: &[QueuedUrl]) -> String {
    let mut keys: Vec<&str> = urls.iter().map(|u| u.url.as_str()).collect();
    keys.sort_unstable();
    let mut hasher = blake3::Hasher::new();
    hasher.update(kind.as_str().as_bytes());
    for key in keys {
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

/// Number of chunks needed to process `urls` (`0` chunk size means one chunk).
pub(crate) fn total_steps(urls: usize, chunk_size: usize) -> u32 {
    let steps = match chunk_size {
        0 => usize::from(urls > 0),
        n => urls.div_ceil(n),
    };
    u32::try_from(steps).unwrap_or(u32::MAX)
}

/// What a publishable content type owns to take part in static publishing.
///
/// Call [`after_publish`](Self::after_publish) or
/// [`after_unpublish`](Self::after_unpublish) once the CMS has committed the
/// change, then flush the queue when the transaction ends.
pub struct StaticPublishingTrigger {
    resolver: Resolver,
}
impl StaticPublishingTrigger {
    pub fn new(resolver: Resolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn after_publish(&self, queue: &mut PublishQueue, mutation: Mutation<'_>) -> Result<AffectedSet> {
        self.record(queue, mutation)
    }

    pub fn after_unpublish(&self, queue: &mut PublishQueue, mutation: Mutation<'_>) -> Result<AffectedSet> {
        self.record(queue, mutation)
    }

    #[instrument(level = "debug", skip_all, fields(node = mutation.node))]
    fn record(&self, queue: &mut PublishQueue, mutation: Mutation<'_>) -> Result<AffectedSet> {
        let affected = self.resolver.resolve(&mutation)?;
        queue.record(&affected)?;
        Ok(affected)
    }

    /// Convenience for a single-node change: resolve, record and flush.
    pub async fn trigger(
        &self,
        mutation: Mutation<'_>,
        queue: &mut PublishQueue,
        entries: &EntryRepository,
        jobs: &JobRepository,
    ) -> Result<FlushReport> {
        self.record(queue, mutation)?;
        queue.flush(entries, jobs, UtcDateTime::now()).await
    }
}
