//! `process` and `legacy`: draining the queue, once or as a daemon.

use crate::app::App;
use crate::cli::RunArgs;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use futures::{Stream, StreamExt};
use staticpub_library::job::{RunSummary, UrlFailure, UrlReport, Worker, WorkerEvent};
use staticpub_library::legacy::LegacyWorker;
use std::process::ExitCode;
use tracing::{error, info, warn};

pub async fn process(app: &App, args: RunArgs) -> Result<ExitCode> {
    let ctx = app.context(true).await?;
    let worker = Worker::new(&ctx);
    let summary = match args.daemon {
        true => drain(worker.run_daemon(shutdown()), args.verbose).await?,
        false => drain(worker.run_once(), args.verbose).await?,
    };
    println!("{}", describe(&summary));
    Ok(if summary.is_clean() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

pub async fn legacy(app: &App, args: RunArgs) -> Result<ExitCode> {
    let ctx = app.context(true).await?;
    let lock_path = app.config.lock_file_path().or_raise(|| ErrorKind::Config)?;
    let worker = LegacyWorker::new(&ctx, lock_path, app.config.heartbeat_threshold());
    let summary = match args.daemon {
        true => drain(worker.run_daemon(shutdown()), args.verbose).await?,
        false => drain(worker.run_once(), args.verbose).await?,
    };
    println!("{}", describe(&summary));
    Ok(if summary.failed == 0 { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn shutdown() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupted; finishing the current chunk"),
        Err(e) => {
            warn!(error = %e, "cannot listen for interrupts; stop the process to exit");
            std::future::pending::<()>().await;
        },
    }
}

/// Consume worker events until the run completes. A run that ends on an
/// error, without completing, is an error.
async fn drain(
    events: impl Stream<Item = staticpub_library::error::Result<WorkerEvent>>,
    verbose: bool,
) -> Result<RunSummary> {
    let mut events = std::pin::pin!(events);
    let mut last_error = None;
    while let Some(event) = events.next().await {
        match event {
            Ok(WorkerEvent::UrlProcessed(report)) if verbose => println!("{}", processed_line(&report)),
            Ok(WorkerEvent::UrlFailed(failure)) if verbose => println!("{}", failed_line(&failure)),
            Ok(WorkerEvent::JobFinished { id, status, processed, failed }) if verbose => {
                println!("job {id} {status}: {processed} processed, {failed} failed");
            },
            Ok(WorkerEvent::JobDeferred { id, remaining }) if verbose => {
                println!("job {id} deferred with {remaining} URL(s) left");
            },
            Ok(WorkerEvent::Complete(summary)) => return Ok(summary),
            Ok(_) => {},
            Err(e) => {
                error!(error = ?e, "worker error");
                last_error = Some(e);
            },
        }
    }
    match last_error {
        Some(e) => Err(e.raise(ErrorKind::Publishing)),
        None => Ok(RunSummary::default()),
    }
}

fn processed_line(report: &UrlReport) -> String {
    let status = report.status.map_or_else(|| "purged".to_string(), |status| status.to_string());
    format!(
        "{:>9.1}ms {status:>6} {:>9}B {:>2} file(s) {}",
        report.elapsed.as_secs_f64() * 1000.0,
        report.bytes,
        report.files,
        report.url,
    )
}

fn failed_line(failure: &UrlFailure) -> String {
    let outcome = if failure.given_up { "gave up" } else { "will retry" };
    format!("{:>11} {:>6} {} (attempt {}, {outcome}): {}", "", "FAILED", failure.url, failure.attempts, failure.reason)
}

fn describe(summary: &RunSummary) -> String {
    format!(
        "{} job(s): {} URL(s) processed, {} failed ({} given up), {} skipped, {} job(s) deferred",
        summary.jobs, summary.processed, summary.failed, summary.given_up, summary.skipped, summary.deferred
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use staticpub_queue::EntryAction;
    use std::time::Duration;

    #[test]
    fn test_processed_line() {
        let report = UrlReport {
            url: "https://example.com/a/".to_string(),
            action: EntryAction::Publish,
            status: Some(200),
            bytes: 1234,
            files: 2,
            elapsed: Duration::from_micros(12_340),
        };
        assert_eq!(processed_line(&report), "     12.3ms    200      1234B  2 file(s) https://example.com/a/");

        let purge = UrlReport { status: None, bytes: 0, files: 1, action: EntryAction::Purge, ..report };
        assert!(processed_line(&purge).contains("purged"));
    }

    #[test]
    fn test_failed_line() {
        let failure = UrlFailure {
            url: "https://example.com/a/".to_string(),
            action: EntryAction::Publish,
            reason: "boom".to_string(),
            attempts: 3,
            given_up: true,
        };
        assert!(failed_line(&failure).ends_with("FAILED https://example.com/a/ (attempt 3, gave up): boom"));
    }

    #[tokio::test]
    async fn test_drain_returns_summary() {
        let summary = RunSummary { jobs: 1, processed: 2, ..RunSummary::default() };
        let events = futures::stream::iter([Ok(WorkerEvent::Started), Ok(WorkerEvent::Complete(summary.clone()))]);
        assert_eq!(drain(events, false).await.unwrap(), summary);
    }

    #[tokio::test]
    async fn test_drain_without_completion_is_error() {
        let err = staticpub_library::error::Error::from(staticpub_library::error::ErrorKind::Queue);
        let events = futures::stream::iter([Ok(WorkerEvent::Started), Err(err)]);
        let err = drain(events, false).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Publishing));
    }
}
