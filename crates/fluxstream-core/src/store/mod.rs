//! Durable collaborators: the status store and the job queue.
//!
//! The pipeline only sees the [`StatusStore`] and [`JobQueue`] traits.
//! [`FluxDb`] implements both on one SQLite database (sqlx). The queue side
//! also carries runner leases so recovery can tell whether jobs are owned.

mod db;
mod lease;
mod queue;
mod records {
    mod read;
    mod write;
}
mod types;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use db::{unix_timestamp, FluxDb};
pub use types::*;

/// Relational status store. Implementations handle their own concurrency.
#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert a new record; an existing id yields `Inserted::Duplicate`.
    async fn create(&self, record: &ContentRecord) -> Result<Inserted>;

    async fn get(&self, id: &str) -> Result<Option<ContentRecord>>;

    /// Set status (and artifact path if given). Returns false for an unknown id.
    async fn update_status(
        &self,
        id: &str,
        status: Status,
        artifact_path: Option<&str>,
    ) -> Result<bool>;

    /// Compare-and-set: write `status` only if the record is currently in
    /// `expected`. Returns false for an unknown id or a status that moved on.
    async fn update_status_if(
        &self,
        id: &str,
        expected: Status,
        status: Status,
        artifact_path: Option<&str>,
    ) -> Result<bool>;

    /// Non-deleted records, most recent first.
    async fn list_active(&self) -> Result<Vec<ContentRecord>>;

    /// Toggle the logical delete flag. Returns false for an unknown id.
    async fn set_deleted(&self, id: &str, deleted: bool) -> Result<bool>;

    /// Non-deleted records in `status`, oldest first.
    async fn list_in(&self, status: Status) -> Result<Vec<ContentRecord>>;
}

/// Durable job queue with consumer-group, at-least-once delivery.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn publish(&self, job: &Job) -> Result<()>;

    /// Block until an entry is available for `consumer` or the queue-level
    /// timeout passes (`Ok(None)`).
    async fn consume(&self, consumer: &str) -> Result<Option<Delivery>>;

    /// Mark a delivery as handled; it will not be delivered again.
    async fn ack(&self, delivery: &Delivery) -> Result<()>;

    /// Whether an unacknowledged entry exists for `job_id`.
    async fn is_pending(&self, job_id: &str) -> Result<bool>;

    async fn counts(&self) -> Result<QueueCounts>;

    /// Take or extend a runner lease for `holder`, valid for `ttl`.
    async fn hold_lease(&self, holder: &str, ttl: Duration) -> Result<()>;

    async fn release_lease(&self, holder: &str) -> Result<()>;

    /// Holders of unexpired runner leases.
    async fn live_leases(&self) -> Result<Vec<String>>;
}

#[async_trait]
impl StatusStore for FluxDb {
    async fn create(&self, record: &ContentRecord) -> Result<Inserted> {
        self.insert_record(record).await
    }

    async fn get(&self, id: &str) -> Result<Option<ContentRecord>> {
        self.get_record(id).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: Status,
        artifact_path: Option<&str>,
    ) -> Result<bool> {
        self.set_status(id, status, artifact_path).await
    }

    async fn update_status_if(
        &self,
        id: &str,
        expected: Status,
        status: Status,
        artifact_path: Option<&str>,
    ) -> Result<bool> {
        self.set_status_if(id, expected, status, artifact_path).await
    }

    async fn list_active(&self) -> Result<Vec<ContentRecord>> {
        self.list_active_records().await
    }

    async fn set_deleted(&self, id: &str, deleted: bool) -> Result<bool> {
        self.mark_deleted(id, deleted).await
    }

    async fn list_in(&self, status: Status) -> Result<Vec<ContentRecord>> {
        self.list_records_in(status).await
    }
}

#[async_trait]
impl JobQueue for FluxDb {
    async fn publish(&self, job: &Job) -> Result<()> {
        self.enqueue(job).await?;
        Ok(())
    }

    async fn consume(&self, consumer: &str) -> Result<Option<Delivery>> {
        self.claim_blocking(consumer).await
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        if !self.ack_entry(delivery.entry_id).await? {
            tracing::debug!(entry_id = delivery.entry_id, "queue entry was already acknowledged");
        }
        Ok(())
    }

    async fn is_pending(&self, job_id: &str) -> Result<bool> {
        self.has_unacked(job_id).await
    }

    async fn counts(&self) -> Result<QueueCounts> {
        self.queue_counts().await
    }

    async fn hold_lease(&self, holder: &str, ttl: Duration) -> Result<()> {
        self.upsert_lease(holder, ttl).await
    }

    async fn release_lease(&self, holder: &str) -> Result<()> {
        self.delete_lease(holder).await
    }

    async fn live_leases(&self) -> Result<Vec<String>> {
        self.unexpired_leases().await
    }
}

#[cfg(test)]
mod tests;
