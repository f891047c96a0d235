//! Runner leases: a running pipeline keeps a row here fresh so other
//! processes sharing the database know its in-flight jobs are owned.

use anyhow::Result;
use sqlx::Row;
use std::time::Duration;

use super::db::{unix_timestamp, FluxDb};

impl FluxDb {
    /// Create or extend `holder`'s lease to expire `ttl` from now.
    pub async fn upsert_lease(&self, holder: &str, ttl: Duration) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO runner_leases (holder, acquired_at, expires_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(holder) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(holder)
        .bind(now)
        .bind(now.saturating_add(ttl.as_secs() as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_lease(&self, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM runner_leases WHERE holder = ?1")
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Holders whose lease has not expired, oldest first.
    pub async fn unexpired_leases(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT holder FROM runner_leases
            WHERE expires_at > ?1
            ORDER BY acquired_at ASC, holder ASC
            "#,
        )
        .bind(unix_timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("holder")).collect())
    }
}
