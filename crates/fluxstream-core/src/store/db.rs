//! SQLite-backed status and queue database.
//!
//! Handles connection, migrations, and timestamp helpers. Record CRUD lives in
//! `records`, queue operations in `queue`.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::QueueConfig;

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite database holding content records and the job queue.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct FluxDb {
    pub(crate) pool: Pool<Sqlite>,
    pub(crate) queue_block: Duration,
    pub(crate) poll_interval: Duration,
}

impl FluxDb {
    fn from_pool(pool: Pool<Sqlite>) -> Self {
        let q = QueueConfig::default();
        Self {
            pool,
            queue_block: Duration::from_secs(q.block_secs),
            poll_interval: Duration::from_millis(q.poll_interval_ms),
        }
    }

    /// Open (or create) the database at `path` and run migrations. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let db = FluxDb::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// Open a private in-memory database (single connection). Used by tests and dry runs.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let db = FluxDb::from_pool(pool);
        db.migrate().await?;
        Ok(db)
    }

    /// Override how long `consume` blocks and how often it polls while idle.
    pub fn with_queue_timing(mut self, block: Duration, poll_interval: Duration) -> Self {
        self.queue_block = block;
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    async fn migrate(&self) -> Result<()> {
        // - `artifact_path` is '' until the record reaches `downloaded`.
        // - `deleted` is a logical flag; rows are never removed.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_records (
                id TEXT PRIMARY KEY NOT NULL,
                content_ref TEXT NOT NULL,
                status TEXT NOT NULL,
                artifact_path TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // `consumer` is NULL until first delivery; acked rows are kept for auditing.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS job_queue (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                content_ref TEXT NOT NULL,
                consumer TEXT,
                deliveries INTEGER NOT NULL DEFAULT 0,
                published_at INTEGER NOT NULL,
                delivered_at INTEGER,
                acked_at INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One row per running pipeline; `expires_at` is pushed forward while it runs.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS runner_leases (
                holder TEXT PRIMARY KEY NOT NULL,
                acquired_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS job_queue_unacked
            ON job_queue (acked_at, consumer, entry_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
