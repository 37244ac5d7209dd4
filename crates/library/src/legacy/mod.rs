//! Single-process queue draining without jobs.
//!
//! Entries are taken straight off the queue, highest priority first, while a
//! [`PidLock`] keeps other legacy workers on the same host away.

mod lock;

pub use self::lock::PidLock;
use crate::Context;
use crate::error::{ErrorKind, Result};
use crate::job::{RunSummary, UrlFailure, WorkerEvent, abandon, execute};
use async_stream::stream;
use exn::ResultExt;
use futures::Stream;
use std::collections::BTreeSet;
use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;
use time::UtcDateTime;
use tracing::{info, warn};

pub struct LegacyWorker<'a> {
    ctx: &'a Context,
    lock_path: PathBuf,
    heartbeat_threshold: Duration,
}
impl<'a> LegacyWorker<'a> {
    pub fn new(ctx: &'a Context, lock_path: impl Into<PathBuf>, heartbeat_threshold: Duration) -> Self {
        Self { ctx, lock_path: lock_path.into(), heartbeat_threshold }
    }

    /// Drain the queue and stop.
    ///
    /// An entry that fails is quarantined and not retried by the same run.
    pub fn run_once(&self) -> impl Stream<Item = Result<WorkerEvent>> + 'a {
        self.run(None::<std::future::Pending<()>>)
    }

    /// Drain the queue until `shutdown` resolves, polling while it is empty.
    pub fn run_daemon(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'a,
    ) -> impl Stream<Item = Result<WorkerEvent>> + 'a {
        self.run(Some(shutdown))
    }

    fn run(
        &self,
        shutdown: Option<impl Future<Output = ()> + Send + 'a>,
    ) -> impl Stream<Item = Result<WorkerEvent>> + 'a {
        let ctx = self.ctx;
        let lock_path = self.lock_path.clone();
        let threshold = self.heartbeat_threshold;
        let daemon = shutdown.is_some();
        let mut shutdown = shutdown.map(Box::pin);
        stream! {
            let lock = match PidLock::acquire(lock_path, threshold).await {
                Ok(lock) => lock,
                Err(e) => {
                    yield Err(e);
                    return;
                },
            };
            yield Ok(WorkerEvent::Started);
            let mut summary = RunSummary::default();
            let mut failed_this_run = BTreeSet::new();

            'run: loop {
                let claimed = ctx.entries.claim_next(UtcDateTime::now()).await.or_raise(|| ErrorKind::Queue);
                let entry = match claimed {
                    Ok(Some(entry)) => entry,
                    Ok(None) => {
                        let Some(signal) = shutdown.as_mut() else {
                            break 'run;
                        };
                        yield Ok(WorkerEvent::Idle);
                        tokio::select! {
                            () = signal.as_mut() => break 'run,
                            () = tokio::time::sleep(ctx.settings.poll_interval) => continue 'run,
                        }
                    },
                    Err(e) => {
                        yield Err(e);
                        if !daemon {
                            break 'run;
                        }
                        tokio::time::sleep(ctx.settings.poll_interval).await;
                        continue 'run;
                    },
                };

                // Come back to it once the quarantine expires, not in a tight loop.
                if !daemon && failed_this_run.contains(&entry.url) {
                    abandon(ctx, &entry).await;
                    break 'run;
                }
                if let Err(e) = lock.beat().await {
                    warn!(error = ?e, "could not refresh heartbeat");
                }

                match execute(ctx, &entry.url, entry.action).await {
                    Ok(report) => match ctx.entries.complete(&entry, UtcDateTime::now()).await {
                        Ok(_) => {
                            summary.processed += 1;
                            yield Ok(WorkerEvent::UrlProcessed(report));
                        },
                        Err(e) => {
                            abandon(ctx, &entry).await;
                            yield Err(e.raise(ErrorKind::Queue));
                            if !daemon {
                                break 'run;
                            }
                        },
                    },
                    Err(err) => {
                        warn!(url = %entry.url, error = ?err, "failed to process URL");
                        if let Err(e) = ctx.entries.mark_error(&entry, UtcDateTime::now()).await {
                            yield Err(e.raise(ErrorKind::Queue));
                            if !daemon {
                                break 'run;
                            }
                            continue 'run;
                        }
                        let given_up = !err.is_retryable();
                        summary.failed += 1;
                        if given_up {
                            summary.given_up += 1;
                        }
                        failed_this_run.insert(entry.url.clone());
                        yield Ok(WorkerEvent::UrlFailed(UrlFailure {
                            url: entry.url.clone(),
                            action: entry.action,
                            reason: err.to_string(),
                            attempts: 1,
                            given_up,
                        }));
                    },
                }

                if shutdown.as_mut().is_some_and(|signal| futures::FutureExt::now_or_never(signal.as_mut()).is_some()) {
                    break 'run;
                }
            }

            info!(processed = summary.processed, failed = summary.failed, "legacy run finished");
            drop(lock);
            yield Ok(WorkerEvent::Complete(summary));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Fixture, page};
    use futures::TryStreamExt;
    use staticpub_queue::{EntryAction, Freshness};
    use tempfile::TempDir;

    async fn run_once(fixture: &Fixture, dir: &TempDir) -> Vec<WorkerEvent> {
        LegacyWorker::new(&fixture.ctx, dir.path().join("legacy.lock"), Duration::from_secs(30))
            .run_once()
            .try_collect()
            .await
            .unwrap()
    }

    fn urls(events: &[WorkerEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                WorkerEvent::UrlProcessed(report) => Some(report.url.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_drains_by_priority() {
        let fixture = Fixture::builder().file("old.html", "x").build().await;
        let dir = TempDir::new().unwrap();
        let now = UtcDateTime::now();
        let entries = &fixture.ctx.entries;
        entries.enqueue(&page("a"), 1, EntryAction::Publish, now).await.unwrap();
        entries.enqueue(&page("a/b"), 10, EntryAction::Publish, now).await.unwrap();
        entries.enqueue(&page("old"), 5, EntryAction::Purge, now).await.unwrap();

        let events = run_once(&fixture, &dir).await;
        assert_eq!(urls(&events), vec![page("a/b"), page("old"), page("a")]);
        assert_eq!(entries.counts().await.unwrap().total(), 0);
        assert!(!fixture.storage.paths().await.contains(&"old.html".into()));
        // The lock is released when the run ends.
        assert!(!dir.path().join("legacy.lock").exists());
    }

    #[tokio::test]
    async fn test_failure_is_quarantined_once_per_run() {
        let fixture = Fixture::builder().build().await;
        let dir = TempDir::new().unwrap();
        fixture.renderer.fail(page("a"), 10);
        fixture.ctx.entries.enqueue(&page("a"), 0, EntryAction::Publish, UtcDateTime::now()).await.unwrap();

        let events = run_once(&fixture, &dir).await;
        let failures: Vec<_> = events.iter().filter(|e| matches!(e, WorkerEvent::UrlFailed(_))).collect();
        assert_eq!(failures.len(), 1);
        let entry = fixture.ctx.entries.get(&page("a")).await.unwrap().unwrap();
        assert_eq!(entry.freshness, Freshness::Error);
        match events.last() {
            Some(WorkerEvent::Complete(summary)) => assert_eq!(summary.failed, 1),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_held_lock_stops_run() {
        let fixture = Fixture::builder().build().await;
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.lock");
        let other = serde_json::json!({ "pid": std::process::id().wrapping_add(1), "beat_at": UtcDateTime::now().unix_timestamp() });
        std::fs::write(&path, other.to_string()).unwrap();

        let worker = LegacyWorker::new(&fixture.ctx, &path, Duration::from_secs(30));
        let err = worker.run_once().try_collect::<Vec<_>>().await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::LockContention(_)));
    }
}
