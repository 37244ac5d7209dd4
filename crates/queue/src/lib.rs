//! Durable publish queue.
//!
//! Two tables back the publishing pipeline:
//! - **Queue entries**: one row per URL waiting to be regenerated or purged,
//!   with its priority and freshness (`stale`, `regenerating`, `error`).
//!   Entries are claimed with a single conditional update so no two workers
//!   ever process the same URL at the same time.
//! - **Jobs**: batches of URLs plus everything needed to resume processing
//!   after a crash. Identical in-flight jobs are detected by signature.
//!
//! Every repository method that depends on the clock takes `now` explicitly.

mod db;
mod entries;
pub mod error;
mod jobs;
mod models;

pub use crate::db::Database;
pub use crate::entries::{Completion, EntryRepository};
pub use crate::jobs::{Enqueued, JobRepository};
pub use crate::models::{
    EntryAction, EntryCounts, Freshness, JobCounts, JobKind, JobPayload, JobRecord, JobStatus, QueueEntry, QueuedUrl,
};
