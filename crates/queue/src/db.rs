use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::sqlite::{
    SqliteAutoVacuum, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

static SCHEMA: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Claims and completions are single short statements; a few connections
/// cover a worker plus the status command reading alongside it.
const POOL_SIZE: u32 = 5;
/// How long a statement waits on another worker process's write lock before
/// failing with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_millis(1500);
/// Settings with no typed equivalent on [`SqliteConnectOptions`]. They are
/// per connection, so they run for every connection the pool opens.
const CONNECTION_PRAGMAS: &str = "
    PRAGMA wal_autocheckpoint = 800;
    PRAGMA cache_size = -8192;
    PRAGMA temp_store = MEMORY;
";

/// The queue database shared by every worker on a host.
///
/// Repositories are built from it with `From<&Database>` and share its pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open the queue file at `path`, creating it and its directory on first
    /// use, and bring the schema up to date.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).or_raise(|| ErrorKind::Database)?;
        }
        Self::open(Self::options().filename(path).create_if_missing(true), POOL_SIZE).await
    }

    /// A private queue that lives as long as the pool. Not test-only, so that
    /// crates depending on this one can use it in their own tests.
    pub async fn connect_in_memory() -> Result<Self> {
        // Every connection to `:memory:` is a separate database.
        Self::open(Self::options().filename(":memory:"), 1).await
    }

    fn options() -> SqliteConnectOptions {
        SqliteConnectOptions::new()
            // Status readers and polling workers are not blocked by a writer.
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT)
            .auto_vacuum(SqliteAutoVacuum::None)
    }

    async fn open(options: SqliteConnectOptions, connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(connections)
            .after_connect(|conn, _| {
                Box::pin(async move { sqlx::query(CONNECTION_PRAGMAS).execute(conn).await.map(|_| ()) })
            })
            .connect_with(options)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    #[instrument(skip(self))]
    async fn migrate(&self) -> Result<()> {
        SCHEMA.run(&self.pool).await.or_raise(|| ErrorKind::Migration)?;
        debug!("queue schema is up to date");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Wait for checked-out connections to come back, then close the pool.
    pub async fn close(&self) {
        // Refresh planner statistics while we still have a connection.
        _ = sqlx::query("PRAGMA optimize").execute(&self.pool).await;
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn count_tables(db: &Database) -> i64 {
        let (tables,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '\\_%' ESCAPE '\\'")
                .fetch_one(db.pool())
                .await
                .unwrap();
        tables
    }

    #[tokio::test]
    async fn test_in_memory_queues_are_isolated() {
        let first = Database::connect_in_memory().await.unwrap();
        let second = Database::connect_in_memory().await.unwrap();
        sqlx::query("CREATE TABLE scratch (id INTEGER)").execute(first.pool()).await.unwrap();
        assert_eq!(count_tables(&first).await, count_tables(&second).await + 1);
    }

    #[tokio::test]
    async fn test_every_connection_gets_pragmas() {
        let db = Database::connect_in_memory().await.unwrap();
        let (foreign_keys,): (i64,) = sqlx::query_as("PRAGMA foreign_keys").fetch_one(db.pool()).await.unwrap();
        let (checkpoint,): (i64,) = sqlx::query_as("PRAGMA wal_autocheckpoint").fetch_one(db.pool()).await.unwrap();
        assert_eq!((foreign_keys, checkpoint), (1, 800));
    }

    #[tokio::test]
    async fn test_reopening_file_keeps_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("var").join("queue.sqlite");
        let db = Database::connect(&path).await.unwrap();
        let tables = count_tables(&db).await;
        db.close().await;
        assert!(path.is_file());

        let db = Database::connect(&path).await.unwrap();
        assert_eq!(count_tables(&db).await, tables);
        db.close().await;
    }
}
