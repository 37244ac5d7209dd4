//! Draining the job queue.
//!
//! A [`Worker`] claims jobs one at a time and works through them chunk by
//! chunk, reporting progress as a stream of [`WorkerEvent`]s. Queue failures
//! are yielded as `Err` items: the job in hand is handed back, and a one-shot
//! run stops there while a daemon sleeps and carries on.
//!
//! A job whose remaining URLs are all held elsewhere is kept claimed (so the
//! same run does not pick it straight back up) and handed back once the
//! queue has nothing else to offer.

use super::{Job, UrlFailure, UrlReport, UrlResult};
use crate::Context;
use crate::error::{ErrorKind, Result};
use async_stream::stream;
use exn::ResultExt;
use futures::{FutureExt, Stream};
use staticpub_queue::{JobKind, JobStatus};
use std::future::Future;
use std::pin::Pin;
use time::UtcDateTime;
use tracing::{info, instrument, warn};

type Shutdown<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Started,
    JobClaimed { id: i64, kind: JobKind, remaining: usize },
    UrlProcessed(UrlReport),
    UrlFailed(UrlFailure),
    JobFinished { id: i64, status: JobStatus, processed: usize, failed: usize },
    /// Handed back unfinished; every remaining URL was held elsewhere.
    JobDeferred { id: i64, remaining: usize },
    /// Nothing to do; a daemon is about to sleep.
    Idle,
    Complete(RunSummary),
}

/// Totals for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub jobs: usize,
    pub processed: usize,
    pub failed: usize,
    /// Failures after which no further attempts will be made.
    pub given_up: usize,
    pub skipped: usize,
    pub deferred: usize,
}
impl RunSummary {
    fn record(&mut self, result: &UrlResult) {
        match result {
            UrlResult::Processed(_) => self.processed += 1,
            UrlResult::Failed(failure) => {
                self.failed += 1;
                if failure.given_up {
                    self.given_up += 1;
                }
            },
            UrlResult::Skipped(_) => self.skipped += 1,
        }
    }

    /// Every URL seen was eventually published or purged.
    pub fn is_clean(&self) -> bool {
        self.given_up == 0
    }
}

pub struct Worker<'a> {
    ctx: &'a Context,
}
impl<'a> Worker<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Process jobs until the queue is empty.
    pub fn run_once(&self) -> impl Stream<Item = Result<WorkerEvent>> + 'a {
        run(self.ctx, None)
    }

    /// Process jobs until `shutdown` resolves, sleeping between polls when
    /// the queue is empty. Shutdown is honoured between chunks; the job in
    /// hand is handed back for the next worker.
    pub fn run_daemon(
        &self,
        shutdown: impl Future<Output = ()> + Send + 'a,
    ) -> impl Stream<Item = Result<WorkerEvent>> + 'a {
        run(self.ctx, Some(Box::pin(shutdown)))
    }
}

fn run<'a>(ctx: &'a Context, mut shutdown: Option<Shutdown<'a>>) -> impl Stream<Item = Result<WorkerEvent>> + 'a {
    let daemon = shutdown.is_some();
    stream! {
        yield Ok(WorkerEvent::Started);
        let mut summary = RunSummary::default();
        let mut deferred: Vec<Job> = Vec::new();

        'run: loop {
            let claimed = ctx.jobs.claim_next(UtcDateTime::now()).await.or_raise(|| ErrorKind::Queue);
            let record = match claimed {
                Ok(Some(record)) => record,
                Ok(None) => {
                    for job in deferred.drain(..) {
                        hand_back(ctx, &job).await;
                        summary.deferred += 1;
                        yield Ok(WorkerEvent::JobDeferred { id: job.id(), remaining: job.remaining() });
                    }
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

            let mut job = Job::from(record);
            summary.jobs += 1;
            info!(job = job.id(), kind = %job.kind(), "claimed job");
            yield Ok(WorkerEvent::JobClaimed { id: job.id(), kind: job.kind(), remaining: job.remaining() });

            let mut stopping = false;
            let mut failure = None;
            while !job.is_finished() && !job.is_stalled() {
                match job.process(ctx).await {
                    Ok(results) => {
                        for result in results {
                            summary.record(&result);
                            match result {
                                UrlResult::Processed(report) => {
                                    yield Ok(WorkerEvent::UrlProcessed(report));
                                },
                                UrlResult::Failed(failure) => {
                                    yield Ok(WorkerEvent::UrlFailed(failure));
                                },
                                UrlResult::Skipped(_) => {},
                            }
                        }
                    },
                    Err(e) => {
                        failure = Some(e);
                        break;
                    },
                }
                if shutdown.as_mut().is_some_and(|signal| signal.as_mut().now_or_never().is_some()) {
                    stopping = true;
                    break;
                }
            }

            if let Some(e) = failure {
                hand_back(ctx, &job).await;
                yield Err(e);
                if daemon {
                    continue 'run;
                }
                break 'run;
            }
            if job.is_finished() {
                match finish(ctx, &job).await {
                    Ok(event) => {
                        yield Ok(event);
                    },
                    Err(e) => {
                        hand_back(ctx, &job).await;
                        yield Err(e);
                        if !daemon {
                            break 'run;
                        }
                    },
                }
            } else if stopping {
                hand_back(ctx, &job).await;
                summary.deferred += 1;
                yield Ok(WorkerEvent::JobDeferred { id: job.id(), remaining: job.remaining() });
            } else {
                deferred.push(job);
            }
            if stopping {
                break 'run;
            }
        }

        for job in deferred.drain(..) {
            hand_back(ctx, &job).await;
            summary.deferred += 1;
            yield Ok(WorkerEvent::JobDeferred { id: job.id(), remaining: job.remaining() });
        }
        yield Ok(WorkerEvent::Complete(summary));
    }
}

#[instrument(skip_all, fields(job = job.id()))]
async fn finish(ctx: &Context, job: &Job) -> Result<WorkerEvent> {
    let status = job.final_status();
    ctx.jobs.finish(job.record(), status, UtcDateTime::now()).await.or_raise(|| ErrorKind::Queue)?;
    let payload = &job.record().payload;
    info!(%status, processed = payload.processed_urls.len(), failed = payload.failed_urls.len(), "job finished");
    Ok(WorkerEvent::JobFinished {
        id: job.id(),
        status,
        processed: payload.processed_urls.len(),
        failed: payload.failed_urls.len(),
    })
}

async fn hand_back(ctx: &Context, job: &Job) {
    if let Err(e) = ctx.jobs.release(job.id()).await {
        warn!(job = job.id(), error = ?e, "could not release job; it will be reclaimed once its claim expires");
    }
}
