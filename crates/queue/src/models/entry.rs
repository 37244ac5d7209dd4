use crate::error::{Error, ErrorKind};
use crate::models::timestamp;
use exn::ResultExt;
use serde::{Deserialize, Serialize};
use time::UtcDateTime;

/// Where a queue entry is in its lifecycle.
///
/// `Stale` on enqueue, `Regenerating` once claimed, `Error` after a failed
/// attempt. Successfully processed entries are deleted rather than given a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Stale,
    Regenerating,
    Error,
}
column_enum!(Freshness, "freshness" {
    Stale => "stale",
    Regenerating => "regenerating",
    Error => "error",
});

/// What should happen to the cached artifacts of an entry's URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryAction {
    Publish,
    Purge,
}
column_enum!(EntryAction, "entry action" {
    Publish => "publish",
    Purge => "purge",
});

/// One URL waiting to be (re)generated or purged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub url: String,
    pub priority: i64,
    pub freshness: Freshness,
    pub action: EntryAction,
    pub generation: i64,
    pub created_at: UtcDateTime,
    pub last_edited_at: UtcDateTime,
}

#[derive(sqlx::FromRow)]
pub(crate) struct EntryRow {
    id: i64,
    url: String,
    priority: i64,
    freshness: String,
    action: String,
    generation: i64,
    created_at: i64,
    last_edited_at: i64,
}
impl TryFrom<EntryRow> for QueueEntry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            url: row.url,
            priority: row.priority,
            freshness: row.freshness.parse()?,
            action: row.action.parse()?,
            generation: row.generation,
            created_at: timestamp(row.created_at, "entry creation date")?,
            last_edited_at: timestamp(row.last_edited_at, "entry edit date")?,
        })
    }
}

/// Number of queue entries per freshness state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EntryCounts {
    pub stale: u64,
    pub regenerating: u64,
    pub error: u64,
}
impl EntryCounts {
    pub fn total(&self) -> u64 {
        self.stale + self.regenerating + self.error
    }

    pub(crate) fn add(&mut self, freshness: &str, count: i64) -> Result<(), Error> {
        let count = u64::try_from(count).or_raise(|| ErrorKind::InvalidData("entry count"))?;
        match freshness.parse::<Freshness>()? {
            Freshness::Stale => self.stale += count,
            Freshness::Regenerating => self.regenerating += count,
            Freshness::Error => self.error += count,
        }
        Ok(())
    }
}
