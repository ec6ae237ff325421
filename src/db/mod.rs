//! Database layer for media-dl
//!
//! Handles SQLite persistence for per-track download records and runtime state.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`records`] - Download record CRUD
//! - [`state`] - Runtime state (shutdown tracking)

use crate::store::DownloadRecord;
use crate::types::{Status, TaskId};
use sqlx::{FromRow, sqlite::SqlitePool};

mod migrations;
mod records;
mod state;

/// Download record row as stored in SQLite
#[derive(Debug, Clone, FromRow)]
pub(crate) struct RecordRow {
    pub id: TaskId,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_id: String,
    pub file_path: Option<String>,
    pub file_size: i64,
    pub status: i32,
    pub download_timestamp: Option<i64>,
    pub completed_timestamp: Option<i64>,
    pub error_message: Option<String>,
    pub retry_count: i64,
    pub source_url: Option<String>,
}

impl From<RecordRow> for DownloadRecord {
    fn from(row: RecordRow) -> Self {
        DownloadRecord {
            id: row.id,
            title: row.title,
            artist: row.artist,
            album: row.album,
            album_id: row.album_id,
            file_path: row.file_path,
            file_size: row.file_size.max(0) as u64,
            status: Status::from_i32(row.status),
            download_timestamp: row.download_timestamp,
            completed_timestamp: row.completed_timestamp,
            error_message: row.error_message,
            retry_count: row.retry_count.clamp(0, u32::MAX as i64) as u32,
            source_url: row.source_url,
        }
    }
}

/// Database handle for media-dl
pub struct Database {
    pool: SqlitePool,
}
