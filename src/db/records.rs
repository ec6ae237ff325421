//! Download record CRUD and the [`RecordStore`] implementation.

use crate::error::DatabaseError;
use crate::store::{DownloadRecord, MAX_RETRY_COUNT, NewRecord, RecordStore};
use crate::types::{Status, TaskId};
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::Path;

use super::{Database, RecordRow};

const RECORD_COLUMNS: &str = "id, title, artist, album, album_id, file_path, file_size, status, \
     download_timestamp, completed_timestamp, error_message, retry_count, source_url";

impl Database {
    /// Insert a record, or refresh metadata, source URL, status and download timestamp
    pub async fn upsert_record(&self, record: &NewRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO download_records (
                id, title, artist, album, album_id, source_url, status, download_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                artist = excluded.artist,
                album = excluded.album,
                album_id = excluded.album_id,
                source_url = excluded.source_url,
                status = excluded.status,
                download_timestamp = excluded.download_timestamp,
                file_path = NULL,
                file_size = 0,
                completed_timestamp = NULL
            "#,
        )
        .bind(&record.id)
        .bind(&record.metadata.title)
        .bind(&record.metadata.artist)
        .bind(&record.metadata.album)
        .bind(&record.metadata.album_id)
        .bind(&record.source_url)
        .bind(record.status.to_i32())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to upsert record: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Set the status of a record, creating an empty one if needed
    pub async fn upsert_status(&self, id: &TaskId, status: Status) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_records (id, status)
            VALUES (?, ?)
            ON CONFLICT(id) DO UPDATE SET status = excluded.status
            "#,
        )
        .bind(id)
        .bind(status.to_i32())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update record status: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Mark a record downloaded with its final path and size
    pub async fn mark_completed(&self, id: &TaskId, path: &Path, size: u64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let path_str = path.to_string_lossy().into_owned();

        sqlx::query(
            r#"
            INSERT INTO download_records (id, status, file_path, file_size, completed_timestamp)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                file_path = excluded.file_path,
                file_size = excluded.file_size,
                completed_timestamp = excluded.completed_timestamp,
                error_message = NULL
            "#,
        )
        .bind(id)
        .bind(Status::Downloaded.to_i32())
        .bind(&path_str)
        .bind(size as i64)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark record completed: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Mark a record failed with the error message, bumping its retry count
    ///
    /// The count is incremented in place and saturates at [`MAX_RETRY_COUNT`].
    pub async fn mark_failed(&self, id: &TaskId, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO download_records (id, status, error_message, retry_count)
            VALUES (?, ?, ?, 1)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error_message = excluded.error_message,
                retry_count = MIN(download_records.retry_count + 1, ?)
            "#,
        )
        .bind(id)
        .bind(Status::Failed.to_i32())
        .bind(message)
        .bind(MAX_RETRY_COUNT as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark record failed: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a record by id
    pub async fn get_record(&self, id: &TaskId) -> Result<Option<DownloadRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(&format!(
            "SELECT {} FROM download_records WHERE id = ?",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get record: {}",
                e
            )))
        })?;

        Ok(row.map(DownloadRecord::from))
    }

    /// Records in any of the given statuses, oldest submission first
    pub async fn list_records_by_status(&self, statuses: &[Status]) -> Result<Vec<DownloadRecord>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; statuses.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM download_records WHERE status IN ({}) \
             ORDER BY download_timestamp ASC, id ASC",
            RECORD_COLUMNS, placeholders
        );

        let mut query = sqlx::query_as::<_, RecordRow>(&sql);
        for status in statuses {
            query = query.bind(status.to_i32());
        }

        let rows = query.fetch_all(&self.pool).await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list records: {}",
                e
            )))
        })?;

        Ok(rows.into_iter().map(DownloadRecord::from).collect())
    }

    /// Delete all failed records
    pub async fn clear_failed_records(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_records WHERE status = ?")
            .bind(Status::Failed.to_i32())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear failed records: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Delete all records
    pub async fn clear_all_records(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM download_records")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to clear records: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RecordStore for Database {
    async fn upsert_record(&self, record: &NewRecord) -> Result<()> {
        Database::upsert_record(self, record).await
    }

    async fn upsert_status(&self, id: &TaskId, status: Status) -> Result<()> {
        Database::upsert_status(self, id, status).await
    }

    async fn mark_completed(&self, id: &TaskId, path: &Path, size: u64) -> Result<()> {
        Database::mark_completed(self, id, path, size).await
    }

    async fn mark_failed(&self, id: &TaskId, message: &str) -> Result<()> {
        Database::mark_failed(self, id, message).await
    }

    async fn get(&self, id: &TaskId) -> Result<Option<DownloadRecord>> {
        self.get_record(id).await
    }

    async fn list_by_status(&self, statuses: &[Status]) -> Result<Vec<DownloadRecord>> {
        self.list_records_by_status(statuses).await
    }

    async fn clear_failed(&self) -> Result<u64> {
        self.clear_failed_records().await
    }

    async fn clear_all(&self) -> Result<u64> {
        self.clear_all_records().await
    }

    async fn set_clean_start(&self) -> Result<()> {
        Database::set_clean_start(self).await
    }

    async fn set_clean_shutdown(&self) -> Result<()> {
        Database::set_clean_shutdown(self).await
    }

    async fn was_unclean_shutdown(&self) -> Result<bool> {
        Database::was_unclean_shutdown(self).await
    }
}
