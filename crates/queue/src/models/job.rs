use crate::error::{Error, ErrorKind};
use crate::models::timestamp;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::UtcDateTime;

/// The operation a job performs on each of its URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Render and write cache artifacts.
    Generate,
    /// Remove cache artifacts.
    Delete,
    /// Regenerate every live URL, then purge whatever was cached before and
    /// is no longer produced.
    FullRebuild,
}
column_enum!(JobKind, "job kind" {
    Generate => "generate",
    Delete => "delete",
    FullRebuild => "full_rebuild",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Complete,
    /// Finished, but some URLs were given up on.
    Failed,
}
column_enum!(JobStatus, "job status" {
    Pending => "pending",
    Running => "running",
    Complete => "complete",
    Failed => "failed",
});

/// A URL waiting to be processed by a job.
///
/// `ordinal` is the position within the batch the job was created from and
/// breaks ties between equal priorities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedUrl {
    pub url: String,
    pub priority: i64,
    pub ordinal: usize,
}

/// Everything a job needs to resume after a crash.
///
/// This is the *entire* recovery state: a worker picking up a job has no
/// memory of what any previous worker was doing beyond what is stored here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPayload {
    /// In processing order.
    pub urls_to_process: Vec<QueuedUrl>,
    pub processed_urls: BTreeMap<String, i64>,
    /// Full rebuilds only: previously cached URLs no longer produced.
    pub urls_to_clean_up: Vec<String>,
    /// URL to the reason it was given up on.
    pub failed_urls: BTreeMap<String, String>,
    /// Failed attempts per URL still in `urls_to_process`.
    pub attempts: BTreeMap<String, u32>,
    pub setup_done: bool,
    pub cleanup_computed: bool,
}
impl JobPayload {
    pub fn new(urls: impl IntoIterator<Item = QueuedUrl>) -> Self {
        Self { urls_to_process: urls.into_iter().collect(), ..Default::default() }
    }

    /// Nothing left to process or clean up.
    pub fn is_drained(&self) -> bool {
        self.urls_to_process.is_empty() && self.urls_to_clean_up.is_empty()
    }

    pub(crate) fn to_json(&self) -> crate::error::Result<String> {
        serde_json::to_string(self).or_raise(|| ErrorKind::InvalidData("job payload"))
    }

    pub(crate) fn from_json(json: &str) -> crate::error::Result<Self> {
        serde_json::from_str(json).or_raise(|| ErrorKind::InvalidData("job payload"))
    }
}

/// A persisted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: i64,
    pub kind: JobKind,
    pub signature: String,
    pub status: JobStatus,
    pub payload: JobPayload,
    pub current_step: u32,
    pub total_steps: u32,
    pub created_at: UtcDateTime,
    pub claimed_at: Option<UtcDateTime>,
    pub finished_at: Option<UtcDateTime>,
}

#[derive(sqlx::FromRow)]
pub(crate) struct JobRow {
    id: i64,
    kind: String,
    signature: String,
    status: String,
    payload: String,
    current_step: i64,
    total_steps: i64,
    created_at: i64,
    #[sqlx(default)]
    claimed_at: Option<i64>,
    #[sqlx(default)]
    finished_at: Option<i64>,
}
impl TryFrom<JobRow> for JobRecord {
    type Error = Error;
    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            kind: row.kind.parse()?,
            signature: row.signature,
            status: row.status.parse()?,
            payload: JobPayload::from_json(&row.payload)?,
            current_step: u32::try_from(row.current_step).or_raise(|| ErrorKind::InvalidData("current step"))?,
            total_steps: u32::try_from(row.total_steps).or_raise(|| ErrorKind::InvalidData("total steps"))?,
            created_at: timestamp(row.created_at, "job creation date")?,
            claimed_at: row.claimed_at.map(|t| timestamp(t, "job claim date")).transpose()?,
            finished_at: row.finished_at.map(|t| timestamp(t, "job finish date")).transpose()?,
        })
    }
}

/// Number of jobs per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub pending: u64,
    pub running: u64,
    pub complete: u64,
    pub failed: u64,
}
impl JobCounts {
    pub(crate) fn add(&mut self, status: &str, count: i64) -> Result<(), Error> {
        let count = u64::try_from(count).or_raise(|| ErrorKind::InvalidData("job count"))?;
        match status.parse::<JobStatus>()? {
            JobStatus::Pending => self.pending += count,
            JobStatus::Running => self.running += count,
            JobStatus::Complete => self.complete += count,
            JobStatus::Failed => self.failed += count,
        }
        Ok(())
    }

    /// Jobs that still have work to do.
    pub fn in_flight(&self) -> u64 {
        self.pending + self.running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued(url: &str, priority: i64, ordinal: usize) -> QueuedUrl {
        QueuedUrl { url: url.to_string(), priority, ordinal }
    }

    #[test]
    fn test_payload_survives_storage() {
        let mut payload = JobPayload::new([queued("https://example.com/a/", 2, 0), queued("https://example.com/b/", 1, 1)]);
        payload.processed_urls.insert("https://example.com/".to_string(), 5);
        payload.attempts.insert("https://example.com/a/".to_string(), 2);
        let json = payload.to_json().unwrap();
        assert_eq!(JobPayload::from_json(&json).unwrap(), payload);
    }

    #[test]
    fn test_payload_missing_fields_default() {
        let payload = JobPayload::from_json(r#"{"urls_to_process":[]}"#).unwrap();
        assert!(payload.is_drained());
        assert!(!payload.setup_done);
    }

    #[test]
    fn test_row_to_model() {
        let now = UtcDateTime::now();
        let row = JobRow {
            id: 1,
            kind: "full_rebuild".to_string(),
            signature: "abc".to_string(),
            status: "running".to_string(),
            payload: JobPayload::default().to_json().unwrap(),
            current_step: 1,
            total_steps: 4,
            created_at: now.unix_timestamp(),
            claimed_at: Some(now.unix_timestamp()),
            finished_at: None,
        };
        let job = JobRecord::try_from(row).unwrap();
        assert_eq!(job.kind, JobKind::FullRebuild);
        assert_eq!(job.status, JobStatus::Running);
        assert!(job.finished_at.is_none());
    }

    #[test]
    fn test_negative_step_is_invalid() {
        let row = JobRow {
            id: 1,
            kind: "generate".to_string(),
            signature: "abc".to_string(),
            status: "pending".to_string(),
            payload: "{}".to_string(),
            current_step: -1,
            total_steps: 0,
            created_at: 0,
            claimed_at: None,
            finished_at: None,
        };
        let err = JobRecord::try_from(row).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidData("current step")));
    }
}
