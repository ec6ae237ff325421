//! Runtime state tracking: shutdown detection.

use crate::error::DatabaseError;
use crate::{Error, Result};

use super::Database;

const CLEAN_SHUTDOWN_KEY: &str = "clean_shutdown";

impl Database {
    /// Check if the last session ended without calling set_clean_shutdown()
    ///
    /// A missing marker counts as unclean.
    pub async fn was_unclean_shutdown(&self) -> Result<bool> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM runtime_state WHERE key = ?")
                .bind(CLEAN_SHUTDOWN_KEY)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to check shutdown state: {}",
                        e
                    )))
                })?;

        Ok(value.is_none_or(|v| v != "true"))
    }

    /// Mark that a session is running
    ///
    /// Called from MediaDownloader::new(). If shutdown() never runs, the next
    /// startup sees an unclean shutdown.
    pub async fn set_clean_start(&self) -> Result<()> {
        self.set_shutdown_marker(false).await
    }

    /// Mark that the session is ending cleanly
    ///
    /// Called at the end of MediaDownloader::shutdown(), after pending record
    /// writes have been flushed.
    pub async fn set_clean_shutdown(&self) -> Result<()> {
        self.set_shutdown_marker(true).await
    }

    async fn set_shutdown_marker(&self, clean: bool) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let value = if clean { "true" } else { "false" };

        sqlx::query(
            r#"
            INSERT INTO runtime_state (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(CLEAN_SHUTDOWN_KEY)
        .bind(value)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update shutdown marker: {}",
                e
            )))
        })?;

        Ok(())
    }
}
