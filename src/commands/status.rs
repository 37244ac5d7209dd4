use crate::app::App;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use staticpub_queue::{EntryCounts, JobCounts, JobRecord, QueueEntry};
use std::process::ExitCode;

pub async fn run(app: &App, json: bool, limit: usize) -> Result<ExitCode> {
    let entries = app.entries()?;
    let jobs = app.jobs()?;
    let entry_counts = entries.counts().await.or_raise(|| ErrorKind::Queue)?;
    let job_counts = jobs.counts().await.or_raise(|| ErrorKind::Queue)?;
    let (next, recent) = match limit {
        0 => (Vec::new(), Vec::new()),
        limit => (
            entries.list(limit).await.or_raise(|| ErrorKind::Queue)?,
            jobs.list(limit).await.or_raise(|| ErrorKind::Queue)?,
        ),
    };

    if json {
        let next: Vec<_> = next
            .iter()
            .map(|e| {
                serde_json::json!({
                    "url": e.url,
                    "action": e.action,
                    "priority": e.priority,
                    "freshness": e.freshness,
                })
            })
            .collect();
        let recent: Vec<_> = recent
            .iter()
            .map(|j| {
                serde_json::json!({
                    "id": j.id,
                    "kind": j.kind,
                    "status": j.status,
                    "step": j.current_step,
                    "steps": j.total_steps,
                    "remaining": j.payload.urls_to_process.len(),
                    "failed": j.payload.failed_urls.len(),
                })
            })
            .collect();
        let value = serde_json::json!({ "entries": entry_counts, "jobs": job_counts, "next": next, "recent": recent });
        println!("{}", serde_json::to_string_pretty(&value).or_raise(|| ErrorKind::Output)?);
    } else {
        println!("{}", describe(&entry_counts, &job_counts));
        for entry in &next {
            println!("{}", entry_line(entry));
        }
        for job in &recent {
            println!("{}", job_line(job));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn describe(entries: &EntryCounts, jobs: &JobCounts) -> String {
    format!(
        "entries: {} stale, {} regenerating, {} error\njobs:    {} pending, {} running, {} complete, {} failed",
        entries.stale, entries.regenerating, entries.error, jobs.pending, jobs.running, jobs.complete, jobs.failed,
    )
}

fn entry_line(entry: &QueueEntry) -> String {
    format!("  {:>6} {:<7} {:<12} {}", entry.priority, entry.action, entry.freshness, entry.url)
}

fn job_line(job: &JobRecord) -> String {
    format!(
        "  #{:<5} {:<12} {:<8} step {}/{}, {} left, {} failed",
        job.id,
        job.kind,
        job.status,
        job.current_step,
        job.total_steps,
        job.payload.urls_to_process.len(),
        job.payload.failed_urls.len(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use staticpub_queue::{EntryAction, Freshness, JobKind, JobPayload, JobStatus, QueuedUrl};
    use time::UtcDateTime;

    #[test]
    fn test_describe() {
        let entries = EntryCounts { stale: 3, regenerating: 1, error: 0 };
        let jobs = JobCounts { pending: 2, running: 1, complete: 9, failed: 1 };
        assert_eq!(
            describe(&entries, &jobs),
            "entries: 3 stale, 1 regenerating, 0 error\njobs:    2 pending, 1 running, 9 complete, 1 failed"
        );
    }

    #[test]
    fn test_listing_lines() {
        let now = UtcDateTime::now();
        let entry = QueueEntry {
            id: 1,
            url: "https://example.com/a/".to_string(),
            priority: 10,
            freshness: Freshness::Error,
            action: EntryAction::Purge,
            generation: 0,
            created_at: now,
            last_edited_at: now,
        };
        assert!(entry_line(&entry).ends_with("https://example.com/a/"));
        assert!(entry_line(&entry).contains(&Freshness::Error.to_string()));

        let payload = JobPayload {
            urls_to_process: vec![QueuedUrl { url: "https://example.com/b/".to_string(), priority: 0, ordinal: 0 }],
            ..JobPayload::default()
        };
        let job = JobRecord {
            id: 7,
            kind: JobKind::Generate,
            signature: String::new(),
            status: JobStatus::Running,
            payload,
            current_step: 1,
            total_steps: 2,
            created_at: now,
            claimed_at: Some(now),
            finished_at: None,
        };
        assert!(job_line(&job).starts_with("  #7 "));
        assert!(job_line(&job).ends_with("step 1/2, 1 left, 0 failed"));
    }
}
