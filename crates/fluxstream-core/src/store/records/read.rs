//! Record read operations: get and list.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::super::db::FluxDb;
use super::super::types::{ContentRecord, Status};

fn record_from_row(row: &SqliteRow) -> Result<ContentRecord> {
    let id: String = row.get("id");
    let status_str: String = row.get("status");
    let status = Status::parse(&status_str)
        .ok_or_else(|| anyhow::anyhow!("record {} has unknown status {:?}", id, status_str))?;
    Ok(ContentRecord {
        content_ref: row.get("content_ref"),
        status,
        artifact_path: row.get("artifact_path"),
        created_at: row.get("created_at"),
        deleted: row.get("deleted"),
        id,
    })
}

impl FluxDb {
    /// Fetch a single record (deleted or not).
    pub async fn get_record(&self, id: &str) -> Result<Option<ContentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, content_ref, status, artifact_path, created_at, deleted
            FROM content_records
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// All records not flagged deleted, newest first.
    pub async fn list_active_records(&self) -> Result<Vec<ContentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_ref, status, artifact_path, created_at, deleted
            FROM content_records
            WHERE deleted = 0
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Non-deleted records currently in `status`, oldest first.
    pub async fn list_records_in(&self, status: Status) -> Result<Vec<ContentRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_ref, status, artifact_path, created_at, deleted
            FROM content_records
            WHERE deleted = 0 AND status = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
