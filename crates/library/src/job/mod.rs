//! Publishing jobs: batches of URLs processed in resumable chunks.
//!
//! A [`Job`] wraps a persisted [`JobRecord`]. All of its progress lives in
//! the record's payload and is saved after every URL, so a worker that dies
//! mid-chunk loses at most the URL it was working on; the next worker to
//! claim the job carries on from there.
//!
//! Before a URL is processed its queue entry is claimed. A URL whose entry is
//! held by someone else (another worker, or an error quarantine that has not
//! expired yet) is skipped for the rest of this invocation without counting
//! as an attempt.

mod worker;

pub use self::worker::{RunSummary, Worker, WorkerEvent};
use crate::Context;
use crate::content::Publishable;
use crate::error::{ErrorKind, Result};
use crate::trigger::total_steps;
use exn::ResultExt;
use staticpub_queue::{Completion, EntryAction, JobKind, JobRecord, JobStatus, QueueEntry, QueuedUrl};
use staticpub_urls::{DEFAULT_PRIORITY, UrlBundler};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use time::UtcDateTime;
use tracing::{debug, info, instrument, warn};

/// A URL that was published or purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlReport {
    pub url: String,
    pub action: EntryAction,
    /// Status the page rendered with; `None` for purges.
    pub status: Option<u16>,
    pub bytes: u64,
    /// Files written or removed.
    pub files: usize,
    pub elapsed: Duration,
}

/// A URL whose processing failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlFailure {
    pub url: String,
    pub action: EntryAction,
    pub reason: String,
    pub attempts: u32,
    /// No further attempts will be made by this job.
    pub given_up: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlResult {
    Processed(UrlReport),
    Failed(UrlFailure),
    /// Claimed by someone else; left for a later invocation.
    Skipped(String),
}

/// Publish or purge a single URL.
pub(crate) async fn execute(ctx: &Context, url: &str, action: EntryAction) -> Result<UrlReport> {
    let started = Instant::now();
    let (status, bytes, files) = match action {
        EntryAction::Publish => {
            let outcome = ctx.publisher.publish_url(url, ctx.settings.force_publish).await?;
            (Some(outcome.status), outcome.bytes, outcome.published.len())
        },
        EntryAction::Purge => (None, 0, ctx.publisher.purge_url(url).await?.len()),
    };
    Ok(UrlReport { url: url.to_string(), action, status, bytes, files, elapsed: started.elapsed() })
}

/// Quarantine an entry after a fatal error, without masking that error.
pub(crate) async fn abandon(ctx: &Context, entry: &QueueEntry) {
    if let Err(e) = ctx.entries.mark_error(entry, UtcDateTime::now()).await {
        warn!(url = %entry.url, error = ?e, "could not quarantine in-flight URL");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Process,
    CleanUp,
}

pub struct Job {
    record: JobRecord,
    /// URLs not to retry during this invocation.
    skipped: BTreeSet<String>,
}
impl From<JobRecord> for Job {
    fn from(record: JobRecord) -> Self {
        Self { record, skipped: BTreeSet::new() }
    }
}
impl Job {
    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn kind(&self) -> JobKind {
        self.record.kind
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    /// URLs still to process or clean up.
    pub fn remaining(&self) -> usize {
        self.record.payload.urls_to_process.len() + self.record.payload.urls_to_clean_up.len()
    }

    /// Nothing left to do.
    pub fn is_finished(&self) -> bool {
        let payload = &self.record.payload;
        payload.setup_done && payload.is_drained() && (self.kind() != JobKind::FullRebuild || payload.cleanup_computed)
    }

    /// Work is left, but every remaining URL was skipped during this
    /// invocation.
    pub fn is_stalled(&self) -> bool {
        if self.is_finished() {
            return false;
        }
        match self.phase() {
            Some(Phase::Process) => self.record.payload.urls_to_process.iter().all(|u| self.skipped.contains(&u.url)),
            Some(Phase::CleanUp) => self.record.payload.urls_to_clean_up.iter().all(|u| self.skipped.contains(u)),
            None => false,
        }
    }

    /// Status to record once finished.
    pub fn final_status(&self) -> JobStatus {
        match self.record.payload.failed_urls.is_empty() {
            true => JobStatus::Complete,
            false => JobStatus::Failed,
        }
    }

    /// `None` while setup or clean-up planning is still due.
    fn phase(&self) -> Option<Phase> {
        let payload = &self.record.payload;
        if !payload.setup_done {
            None
        } else if !payload.urls_to_process.is_empty() {
            Some(Phase::Process)
        } else if self.kind() == JobKind::FullRebuild && !payload.cleanup_computed {
            None
        } else {
            Some(Phase::CleanUp)
        }
    }

    fn action(&self, phase: Phase) -> EntryAction {
        match (phase, self.kind()) {
            (Phase::CleanUp, _) | (Phase::Process, JobKind::Delete) => EntryAction::Purge,
            (Phase::Process, JobKind::Generate | JobKind::FullRebuild) => EntryAction::Publish,
        }
    }

    /// First-run preparation. A full rebuild collects the URLs of every live
    /// node here rather than when it is queued.
    #[instrument(skip_all, fields(job = self.record.id, kind = %self.record.kind))]
    pub async fn setup(&mut self, ctx: &Context) -> Result<()> {
        if self.record.payload.setup_done {
            return Ok(());
        }
        if self.kind() == JobKind::FullRebuild {
            let mut bundler = UrlBundler::new(ctx.sanitiser);
            for node in ctx.tree.live_nodes() {
                for (url, priority) in node.urls_to_cache() {
                    if let Err(e) = bundler.add_url_with_priority(&url, priority) {
                        warn!(%url, error = ?e, "skipping unpublishable URL");
                    }
                }
            }
            self.record.payload.urls_to_process = bundler
                .batches(0)
                .into_iter()
                .flatten()
                .map(|u| QueuedUrl { url: u.url, priority: u.priority, ordinal: u.ordinal })
                .collect();
        }
        self.record.total_steps = total_steps(self.record.payload.urls_to_process.len(), ctx.settings.chunk_size);
        self.record.payload.setup_done = true;
        info!(urls = self.record.payload.urls_to_process.len(), steps = self.record.total_steps, "job set up");
        self.save(ctx).await
    }

    /// Run one step: up to `chunk_size` URLs.
    ///
    /// Per-URL failures are recorded and reported, never returned. An `Err`
    /// means the queue itself failed and the job must be handed back.
    #[instrument(skip_all, fields(job = self.record.id, step = self.record.current_step))]
    pub async fn process(&mut self, ctx: &Context) -> Result<Vec<UrlResult>> {
        let phase = match self.phase() {
            Some(phase) => phase,
            None if !self.record.payload.setup_done => {
                self.setup(ctx).await?;
                return Ok(Vec::new());
            },
            None => {
                self.plan_clean_up(ctx).await?;
                return Ok(Vec::new());
            },
        };
        let limit = match ctx.settings.chunk_size {
            0 => usize::MAX,
            n => n,
        };
        let payload = &self.record.payload;
        let chunk: Vec<(String, i64)> = match phase {
            Phase::Process => payload
                .urls_to_process
                .iter()
                .filter(|u| !self.skipped.contains(&u.url))
                .take(limit)
                .map(|u| (u.url.clone(), u.priority))
                .collect(),
            Phase::CleanUp => payload
                .urls_to_clean_up
                .iter()
                .filter(|u| !self.skipped.contains(*u))
                .take(limit)
                .map(|u| (u.clone(), DEFAULT_PRIORITY))
                .collect(),
        };

        let action = self.action(phase);
        let mut results = Vec::with_capacity(chunk.len());
        for (url, priority) in chunk {
            results.push(self.process_url(ctx, &url, priority, action, phase).await?);
            self.save(ctx).await?;
        }
        if results.iter().any(|r| !matches!(r, UrlResult::Skipped(_))) {
            self.record.current_step = self.record.current_step.saturating_add(1);
            self.record.total_steps = self.record.total_steps.max(self.record.current_step);
            self.save(ctx).await?;
        }
        Ok(results)
    }

    async fn process_url(
        &mut self,
        ctx: &Context,
        url: &str,
        priority: i64,
        action: EntryAction,
        phase: Phase,
    ) -> Result<UrlResult> {
        let claimed =
            ctx.entries.claim_url(url, priority, action, UtcDateTime::now()).await.or_raise(|| ErrorKind::Queue)?;
        let Some(entry) = claimed else {
            debug!(%url, "URL held elsewhere, skipping");
            self.skipped.insert(url.to_string());
            return Ok(UrlResult::Skipped(url.to_string()));
        };

        match execute(ctx, url, action).await {
            Ok(report) => {
                let completion = match ctx.entries.complete(&entry, UtcDateTime::now()).await {
                    Ok(completion) => completion,
                    Err(e) => {
                        abandon(ctx, &entry).await;
                        return Err(e).or_raise(|| ErrorKind::Queue);
                    },
                };
                match completion {
                    // Changed again while rendering: stays in the job for another pass.
                    Completion::Requeued => debug!(%url, "URL enqueued again while processing"),
                    Completion::Removed => {
                        self.take(url, phase);
                        if phase == Phase::Process {
                            self.record.payload.processed_urls.insert(url.to_string(), priority);
                        }
                    },
                }
                Ok(UrlResult::Processed(report))
            },
            Err(err) => {
                ctx.entries.mark_error(&entry, UtcDateTime::now()).await.or_raise(|| ErrorKind::Queue)?;
                let attempts = self.record.payload.attempts.get(url).copied().unwrap_or(0) + 1;
                let given_up = !err.is_retryable() || attempts >= ctx.settings.max_url_attempts;
                let reason = err.to_string();
                warn!(%url, attempts, given_up, error = ?err, "failed to process URL");
                if given_up {
                    self.take(url, phase);
                    self.record.payload.failed_urls.insert(url.to_string(), reason.clone());
                } else {
                    self.record.payload.attempts.insert(url.to_string(), attempts);
                }
                Ok(UrlResult::Failed(UrlFailure { url: url.to_string(), action, reason, attempts, given_up }))
            },
        }
    }

    /// Everything cached before the rebuild that the rebuild did not
    /// produce is purged afterwards.
    async fn plan_clean_up(&mut self, ctx: &Context) -> Result<()> {
        let payload = &self.record.payload;
        let orphans: Vec<String> = ctx
            .publisher
            .published_urls()
            .await?
            .into_iter()
            .filter(|url| !payload.processed_urls.contains_key(url) && !payload.failed_urls.contains_key(url))
            .collect();
        info!(job = self.record.id, orphans = orphans.len(), "planned clean-up");
        self.record.total_steps += total_steps(orphans.len(), ctx.settings.chunk_size);
        self.record.payload.urls_to_clean_up = orphans;
        self.record.payload.cleanup_computed = true;
        self.save(ctx).await
    }

    fn take(&mut self, url: &str, phase: Phase) {
        let payload = &mut self.record.payload;
        match phase {
            Phase::Process => payload.urls_to_process.retain(|u| u.url != url),
            Phase::CleanUp => payload.urls_to_clean_up.retain(|u| u != url),
        }
        payload.attempts.remove(url);
    }

    async fn save(&self, ctx: &Context) -> Result<()> {
        ctx.jobs.save_progress(&self.record, UtcDateTime::now()).await.or_raise(|| ErrorKind::Queue)
    }
}
