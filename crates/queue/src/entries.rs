//! Repository for queue entries.
//!
//! Every state transition is a single conditional statement, so concurrent
//! workers (threads or processes) sharing the database can never both claim
//! the same URL.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{EntryAction, EntryCounts, EntryRow, QueueEntry};
use exn::ResultExt;
use sqlx::SqlitePool;
use time::{Duration, UtcDateTime};
use tracing::instrument;

/// Outcome of completing a claimed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The entry was deleted: nothing changed since it was claimed.
    Removed,
    /// The URL was enqueued again while it was being processed; the entry
    /// went back to `Stale` so that change is not lost.
    Requeued,
}

/// Repository for managing [`QueueEntry`] rows.
///
/// Entries in `Regenerating` or `Error` whose `last_edited_at` is older than
/// the regeneration window are treated as abandoned and become claimable
/// again, exactly like `Stale` entries.
#[derive(Debug, Clone)]
pub struct EntryRepository {
    pool: SqlitePool,
    regeneration_window: Duration,
}
impl From<&Database> for EntryRepository {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone(), Self::DEFAULT_REGENERATION_WINDOW)
    }
}
impl EntryRepository {
    pub const DEFAULT_REGENERATION_WINDOW: Duration = Duration::minutes(10);

    pub fn new(pool: SqlitePool, regeneration_window: Duration) -> Self {
        Self { pool, regeneration_window }
    }

    pub fn with_regeneration_window(mut self, window: Duration) -> Self {
        self.regeneration_window = window;
        self
    }

    fn stale_before(&self, now: UtcDateTime) -> i64 {
        (now - self.regeneration_window).unix_timestamp()
    }

    // =========================================================================
    // Enqueue
    // =========================================================================

    /// Add a URL to the queue, or merge it into the existing entry.
    ///
    /// An existing entry keeps its id and creation date and takes the higher
    /// of the two priorities. The later action wins.
    #[instrument(level = "debug", skip(self, now))]
    pub async fn enqueue(&self, url: &str, priority: i64, action: EntryAction, now: UtcDateTime) -> Result<QueueEntry> {
        let row: EntryRow = sqlx::query_as(include_str!("../queries/upsert_entry.sql"))
            .bind(url)
            .bind(priority)
            .bind(action.as_str())
            .bind(now.unix_timestamp())
            .bind(now.unix_timestamp())
            .fetch_one(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.try_into()
    }

    /// Enqueue many URLs in a single transaction.
    ///
    /// Returns the number of URLs enqueued.
    pub async fn enqueue_many<'a>(
        &self,
        urls: impl IntoIterator<Item = (&'a str, i64)>,
        action: EntryAction,
        now: UtcDateTime,
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let mut count = 0;
        for (url, priority) in urls {
            sqlx::query(include_str!("../queries/upsert_entry.sql"))
                .bind(url)
                .bind(priority)
                .bind(action.as_str())
                .bind(now.unix_timestamp())
                .bind(now.unix_timestamp())
                .execute(&mut *tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
            count += 1;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(count)
    }

    // =========================================================================
    // Claim
    // =========================================================================

    /// Claim the next claimable entry: highest priority first, oldest first
    /// among equal priorities.
    ///
    /// Returns `None` when nothing is claimable.
    pub async fn claim_next(&self, now: UtcDateTime) -> Result<Option<QueueEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/claim_next_entry.sql"))
            .bind(now.unix_timestamp())
            .bind(self.stale_before(now))
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(QueueEntry::try_from).transpose()
    }

    /// Claim the entry for a specific URL, creating it first if the URL is
    /// not queued yet.
    ///
    /// Returns `None` if another worker holds a fresh claim on the URL.
    #[instrument(level = "debug", skip(self, now))]
    pub async fn claim_url(
        &self,
        url: &str,
        priority: i64,
        action: EntryAction,
        now: UtcDateTime,
    ) -> Result<Option<QueueEntry>> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/insert_entry_if_missing.sql"))
            .bind(url)
            .bind(priority)
            .bind(action.as_str())
            .bind(now.unix_timestamp())
            .bind(now.unix_timestamp())
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/claim_entry_by_url.sql"))
            .bind(now.unix_timestamp())
            .bind(url)
            .bind(self.stale_before(now))
            .fetch_optional(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        row.map(QueueEntry::try_from).transpose()
    }

    // =========================================================================
    // Finish
    // =========================================================================

    /// Finish a successfully processed entry.
    pub async fn complete(&self, entry: &QueueEntry, now: UtcDateTime) -> Result<Completion> {
        let deleted = sqlx::query(include_str!("../queries/delete_entry_if_unchanged.sql"))
            .bind(entry.id)
            .bind(entry.generation)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        if deleted.rows_affected() > 0 {
            return Ok(Completion::Removed);
        }
        let requeued = sqlx::query(include_str!("../queries/requeue_entry.sql"))
            .bind(now.unix_timestamp())
            .bind(entry.id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        // Gone entirely (e.g. purged by hand): nothing left to do either way.
        Ok(if requeued.rows_affected() > 0 { Completion::Requeued } else { Completion::Removed })
    }

    /// Quarantine an entry after a failed attempt.
    ///
    /// It becomes claimable again once the regeneration window has elapsed.
    pub async fn mark_error(&self, entry: &QueueEntry, now: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/mark_entry_error.sql"))
            .bind(now.unix_timestamp())
            .bind(entry.id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Inspect
    // =========================================================================

    pub async fn get(&self, url: &str) -> Result<Option<QueueEntry>> {
        let row: Option<EntryRow> = sqlx::query_as(include_str!("../queries/get_entry_by_url.sql"))
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(QueueEntry::try_from).transpose()
    }

    /// List entries in the order they would be claimed (ignoring freshness).
    pub async fn list(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let limit = i64::try_from(limit).or_raise(|| ErrorKind::InvalidData("limit"))?;
        let rows: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/list_entries.sql"))
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(QueueEntry::try_from).collect()
    }

    pub async fn counts(&self) -> Result<EntryCounts> {
        let rows: Vec<(String, i64)> = sqlx::query_as(include_str!("../queries/count_entries.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let mut counts = EntryCounts::default();
        for (freshness, total) in rows {
            counts.add(&freshness, total)?;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Freshness;
    use rstest::rstest;

    async fn repository() -> EntryRepository {
        let db = Database::connect_in_memory().await.unwrap();
        EntryRepository::from(&db)
    }

    #[tokio::test]
    async fn test_enqueue_creates_stale_entry() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        let entry = repo.enqueue("https://example.com/a/", 1, EntryAction::Publish, now).await.unwrap();
        assert_eq!(entry.freshness, Freshness::Stale);
        assert_eq!(entry.generation, 0);
        assert_eq!(entry.priority, 1);
    }

    #[tokio::test]
    async fn test_duplicates_collapse_keeping_highest_priority() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        let first = repo.enqueue("a", 1, EntryAction::Publish, now).await.unwrap();
        repo.enqueue("a", 10, EntryAction::Publish, now + Duration::seconds(1)).await.unwrap();
        let last = repo.enqueue("a", 1, EntryAction::Publish, now + Duration::seconds(2)).await.unwrap();
        assert_eq!(last.id, first.id);
        assert_eq!(last.priority, 10);
        assert_eq!(last.created_at, first.created_at);
        assert_eq!(repo.counts().await.unwrap().total(), 1);
    }

    #[tokio::test]
    async fn test_later_action_wins() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        repo.enqueue("a", 1, EntryAction::Publish, now).await.unwrap();
        let entry = repo.enqueue("a", 1, EntryAction::Purge, now).await.unwrap();
        assert_eq!(entry.action, EntryAction::Purge);
    }

    #[tokio::test]
    async fn test_claims_highest_priority_first() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        repo.enqueue("monkey", 1, EntryAction::Publish, now).await.unwrap();
        repo.enqueue("stool", 10, EntryAction::Publish, now).await.unwrap();
        let first = repo.claim_next(now).await.unwrap().unwrap();
        assert_eq!(first.url, "stool");
        assert_eq!(first.freshness, Freshness::Regenerating);
        let second = repo.claim_next(now).await.unwrap().unwrap();
        assert_eq!(second.url, "monkey");
        assert!(repo.claim_next(now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_equal_priority_claims_oldest_first() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        repo.enqueue("newer", 5, EntryAction::Publish, now).await.unwrap();
        repo.enqueue("older", 5, EntryAction::Publish, now - Duration::minutes(1)).await.unwrap();
        assert_eq!(repo.claim_next(now).await.unwrap().unwrap().url, "older");
    }

    #[rstest]
    #[case::past_window(11, "stuck")]
    #[case::within_window(5, "fresh")]
    #[tokio::test]
    async fn test_abandoned_claim_is_reclaimed_after_window(#[case] minutes_ago: i64, #[case] expected: &str) {
        let repo = repository().await;
        let now = UtcDateTime::now();
        let then = now - Duration::minutes(minutes_ago);
        repo.enqueue("stuck", 10, EntryAction::Publish, then).await.unwrap();
        let claimed = repo.claim_next(then).await.unwrap().unwrap();
        assert_eq!(claimed.url, "stuck");
        repo.enqueue("fresh", 1, EntryAction::Publish, now).await.unwrap();
        let next = repo.claim_next(now).await.unwrap().unwrap();
        assert_eq!(next.url, expected);
    }

    #[tokio::test]
    async fn test_claim_url_creates_missing_entry() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        let entry = repo.claim_url("new", 3, EntryAction::Publish, now).await.unwrap().unwrap();
        assert_eq!(entry.freshness, Freshness::Regenerating);
        assert_eq!(entry.priority, 3);
    }

    #[tokio::test]
    async fn test_claim_url_contention() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        repo.claim_url("a", 0, EntryAction::Publish, now).await.unwrap().unwrap();
        // A second worker is turned away while the first claim is fresh...
        assert!(repo.claim_url("a", 0, EntryAction::Publish, now).await.unwrap().is_none());
        // ...but not once the claim has been abandoned for long enough.
        let later = now + Duration::minutes(11);
        assert!(repo.claim_url("a", 0, EntryAction::Publish, later).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_complete_removes_unchanged_entry() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        repo.enqueue("a", 0, EntryAction::Publish, now).await.unwrap();
        let claimed = repo.claim_next(now).await.unwrap().unwrap();
        assert_eq!(repo.complete(&claimed, now).await.unwrap(), Completion::Removed);
        assert!(repo.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reenqueue_during_regeneration_is_not_lost() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        repo.enqueue("a", 1, EntryAction::Publish, now).await.unwrap();
        let claimed = repo.claim_next(now).await.unwrap().unwrap();
        // Content changes again while the page is being rendered.
        let during = repo.enqueue("a", 4, EntryAction::Publish, now).await.unwrap();
        assert_eq!(during.freshness, Freshness::Regenerating);
        assert_eq!(repo.complete(&claimed, now).await.unwrap(), Completion::Requeued);
        let entry = repo.get("a").await.unwrap().unwrap();
        assert_eq!(entry.freshness, Freshness::Stale);
        assert_eq!(entry.priority, 4);
    }

    #[tokio::test]
    async fn test_error_entries_wait_for_window() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        repo.enqueue("a", 0, EntryAction::Publish, now).await.unwrap();
        let claimed = repo.claim_next(now).await.unwrap().unwrap();
        repo.mark_error(&claimed, now).await.unwrap();
        assert_eq!(repo.get("a").await.unwrap().unwrap().freshness, Freshness::Error);
        assert!(repo.claim_next(now + Duration::minutes(1)).await.unwrap().is_none());
        assert!(repo.claim_next(now + Duration::minutes(10)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reenqueue_resets_error_entry() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        repo.enqueue("a", 0, EntryAction::Publish, now).await.unwrap();
        let claimed = repo.claim_next(now).await.unwrap().unwrap();
        repo.mark_error(&claimed, now).await.unwrap();
        let entry = repo.enqueue("a", 0, EntryAction::Publish, now).await.unwrap();
        assert_eq!(entry.freshness, Freshness::Stale);
        assert!(repo.claim_next(now).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_enqueue_many_and_counts() {
        let repo = repository().await;
        let now = UtcDateTime::now();
        let urls = [("a", 1), ("b", 2), ("a", 3)];
        assert_eq!(repo.enqueue_many(urls, EntryAction::Publish, now).await.unwrap(), 3);
        repo.claim_next(now).await.unwrap().unwrap();
        let counts = repo.counts().await.unwrap();
        assert_eq!(counts, EntryCounts { stale: 1, regenerating: 1, error: 0 });
        let listed = repo.list(10).await.unwrap();
        assert_eq!(listed.iter().map(|e| e.url.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
