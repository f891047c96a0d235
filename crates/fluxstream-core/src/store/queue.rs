//! Durable job queue with consumer-group delivery.
//!
//! Each entry is delivered to one consumer at a time. Until acknowledged it
//! stays pending for that consumer and is handed back to it (before any new
//! entry) on its next consume, so a crash between delivery and ack loses nothing.

use anyhow::Result;
use sqlx::Row;
use std::time::Instant;

use super::db::{unix_timestamp, FluxDb};
use super::types::{Delivery, Job, QueueCounts};

impl FluxDb {
    /// Append a job to the tail of the queue.
    pub async fn enqueue(&self, job: &Job) -> Result<i64> {
        let id = sqlx::query(
            r#"
            INSERT INTO job_queue (job_id, content_ref, published_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(&job.id)
        .bind(&job.content_ref)
        .bind(unix_timestamp())
        .execute(&self.pool)
        .await?
        .last_insert_rowid();
        Ok(id)
    }

    /// Atomically claim the next entry for `consumer` without waiting.
    ///
    /// The consumer's own unacknowledged deliveries come first (oldest first),
    /// then never-delivered entries in publish order.
    pub async fn claim_next(&self, consumer: &str) -> Result<Option<Delivery>> {
        let row = sqlx::query(
            r#"
            UPDATE job_queue
            SET consumer = ?1,
                deliveries = deliveries + 1,
                delivered_at = ?2
            WHERE entry_id = (
                SELECT entry_id FROM job_queue
                WHERE acked_at IS NULL
                  AND (consumer = ?1 OR consumer IS NULL)
                ORDER BY (consumer IS NULL) ASC, entry_id ASC
                LIMIT 1
            )
            RETURNING entry_id, job_id, content_ref, deliveries
            "#,
        )
        .bind(consumer)
        .bind(unix_timestamp())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Delivery {
            entry_id: row.get("entry_id"),
            job: Job {
                id: row.get("job_id"),
                content_ref: row.get("content_ref"),
            },
            deliveries: row.get("deliveries"),
        }))
    }

    /// Claim the next entry, polling until one arrives or the block window ends.
    pub async fn claim_blocking(&self, consumer: &str) -> Result<Option<Delivery>> {
        let start = Instant::now();
        loop {
            if let Some(d) = self.claim_next(consumer).await? {
                return Ok(Some(d));
            }
            if start.elapsed() >= self.queue_block {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Acknowledge a delivered entry. Returns false if it was already acknowledged.
    pub async fn ack_entry(&self, entry_id: i64) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE job_queue
            SET acked_at = ?1
            WHERE entry_id = ?2 AND acked_at IS NULL
            "#,
        )
        .bind(unix_timestamp())
        .bind(entry_id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Whether an unacknowledged entry exists for `job_id`.
    pub async fn has_unacked(&self, job_id: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM job_queue
            WHERE job_id = ?1 AND acked_at IS NULL
            "#,
        )
        .bind(job_id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN consumer IS NULL AND acked_at IS NULL THEN 1 ELSE 0 END), 0) AS ready,
                COALESCE(SUM(CASE WHEN consumer IS NOT NULL AND acked_at IS NULL THEN 1 ELSE 0 END), 0) AS pending,
                COALESCE(SUM(CASE WHEN acked_at IS NOT NULL THEN 1 ELSE 0 END), 0) AS acked
            FROM job_queue
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let ready: i64 = row.get("ready");
        let pending: i64 = row.get("pending");
        let acked: i64 = row.get("acked");
        Ok(QueueCounts {
            ready: ready as u64,
            pending: pending as u64,
            acked: acked as u64,
        })
    }
}
