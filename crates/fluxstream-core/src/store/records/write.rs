//! Record write operations: create, status update, logical delete.

use anyhow::Result;

use super::super::db::FluxDb;
use super::super::types::{ContentRecord, Inserted, Status};

impl FluxDb {
    /// Insert a record. An existing row with the same id is left untouched and
    /// reported as `Inserted::Duplicate`.
    pub async fn insert_record(&self, record: &ContentRecord) -> Result<Inserted> {
        let r = sqlx::query(
            r#"
            INSERT INTO content_records (
                id, content_ref, status, artifact_path, created_at, deleted
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&record.id)
        .bind(&record.content_ref)
        .bind(record.status.as_str())
        .bind(&record.artifact_path)
        .bind(record.created_at)
        .bind(record.deleted)
        .execute(&self.pool)
        .await?;

        Ok(if r.rows_affected() == 0 {
            Inserted::Duplicate
        } else {
            Inserted::New
        })
    }

    /// Set status, and the artifact path when one is given, in a single update.
    /// Returns false if no row has this id.
    pub async fn set_status(
        &self,
        id: &str,
        status: Status,
        artifact_path: Option<&str>,
    ) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE content_records
            SET status = ?1,
                artifact_path = COALESCE(?2, artifact_path)
            WHERE id = ?3
            "#,
        )
        .bind(status.as_str())
        .bind(artifact_path)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Like [`set_status`](Self::set_status), but only while the row is still
    /// in `expected`. Returns false if the id is unknown or its status moved on.
    pub async fn set_status_if(
        &self,
        id: &str,
        expected: Status,
        status: Status,
        artifact_path: Option<&str>,
    ) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE content_records
            SET status = ?1,
                artifact_path = COALESCE(?2, artifact_path)
            WHERE id = ?3 AND status = ?4
            "#,
        )
        .bind(status.as_str())
        .bind(artifact_path)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }

    /// Toggle the logical `deleted` flag. Returns false if no row has this id.
    pub async fn mark_deleted(&self, id: &str, deleted: bool) -> Result<bool> {
        let r = sqlx::query(
            r#"
            UPDATE content_records
            SET deleted = ?1
            WHERE id = ?2
            "#,
        )
        .bind(deleted)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected() > 0)
    }
}
