//! Repository for publishing jobs.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{JobCounts, JobKind, JobPayload, JobRecord, JobRow, JobStatus};
use exn::ResultExt;
use sqlx::SqlitePool;
use time::{Duration, UtcDateTime};
use tracing::instrument;

/// Outcome of enqueueing a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Created(i64),
    /// A pending or running job with the same signature already exists.
    Duplicate(i64),
}
impl Enqueued {
    pub fn id(&self) -> i64 {
        match self {
            Self::Created(id) | Self::Duplicate(id) => *id,
        }
    }
}

/// Repository for managing [`JobRecord`] rows.
///
/// A running job refreshes its claim every time it saves progress. One whose
/// claim is older than the reclaim window belongs to a worker that died and
/// is handed to the next worker that asks.
#[derive(Debug, Clone)]
pub struct JobRepository {
    pool: SqlitePool,
    reclaim_window: Duration,
}
impl From<&Database> for JobRepository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone(), Self::DEFAULT_RECLAIM_WINDOW)
    }
}
impl JobRepository {
    pub const DEFAULT_RECLAIM_WINDOW: Duration = Duration::minutes(10);

    pub fn new(pool: SqlitePool, reclaim_window: Duration) -> Self {
        Self { pool, reclaim_window }
    }

    pub fn with_reclaim_window(mut self, window: Duration) -> Self {
        self.reclaim_window = window;
        self
    }

    /// Persist a new pending job unless identical work is already in flight.
    #[instrument(level = "debug", skip(self, payload, now), fields(urls = payload.urls_to_process.len()))]
    pub async fn enqueue(
        &self,
        kind: JobKind,
        signature: &str,
        payload: &JobPayload,
        total_steps: u32,
        now: UtcDateTime,
    ) -> Result<Enqueued> {
        let json = payload.to_json()?;
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let created: Option<i64> = sqlx::query_scalar(include_str!("../queries/insert_job.sql"))
            .bind(kind.as_str())
            .bind(signature)
            .bind(json)
            .bind(i64::from(total_steps))
            .bind(now.unix_timestamp())
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let enqueued = match created {
            Some(id) => Enqueued::Created(id),
            None => {
                let id: i64 = sqlx::query_scalar(include_str!("../queries/get_in_flight_job_by_signature.sql"))
                    .bind(signature)
                    .fetch_one(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
                Enqueued::Duplicate(id)
            },
        };
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(enqueued)
    }

    /// Claim the oldest pending job, or a running job whose worker stopped
    /// reporting progress.
    pub async fn claim_next(&self, now: UtcDateTime) -> Result<Option<JobRecord>> {
        let row: Option<JobRow> = sqlx::query_as(include_str!("../queries/claim_next_job.sql"))
            .bind(now.unix_timestamp())
            .bind((now - self.reclaim_window).unix_timestamp())
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(JobRecord::try_from).transpose()
    }

    /// Save processing state of a running job, refreshing its claim.
    pub async fn save_progress(&self, job: &JobRecord, now: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/save_job_progress.sql"))
            .bind(job.payload.to_json()?)
            .bind(i64::from(job.current_step))
            .bind(i64::from(job.total_steps))
            .bind(now.unix_timestamp())
            .bind(job.id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Record the final state of a job.
    pub async fn finish(&self, job: &JobRecord, status: JobStatus, now: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/finish_job.sql"))
            .bind(status.as_str())
            .bind(job.payload.to_json()?)
            .bind(i64::from(job.current_step))
            .bind(i64::from(job.total_steps))
            .bind(now.unix_timestamp())
            .bind(job.id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Hand a running job back to the queue so the next worker resumes it.
    pub async fn release(&self, id: i64) -> Result<()> {
        sqlx::query(include_str!("../queries/release_job.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn get(&self, id: i64) -> Result<Option<JobRecord>> {
        let row: Option<JobRow> = sqlx::query_as(include_str!("../queries/get_job.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(JobRecord::try_from).transpose()
    }

    /// Most recent jobs first.
    pub async fn list(&self, limit: usize) -> Result<Vec<JobRecord>> {
        let limit = i64::try_from(limit).or_raise(|| ErrorKind::InvalidData("limit"))?;
        let rows: Vec<JobRow> = sqlx::query_as(include_str!("../queries/list_jobs.sql"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(JobRecord::try_from).collect()
    }

    pub async fn counts(&self) -> Result<JobCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(include_str!("../queries/count_jobs.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut counts = JobCounts::default();
        for (status, total) in rows {
            counts.add(&status, total)?;
        }
        Ok(counts)
    }
}
