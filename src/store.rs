//! Durable per-track records
//!
//! [`RecordStore`] is the seam between the orchestrator and whatever keeps
//! track status across restarts. [`Database`](crate::db::Database) is the
//! SQLite implementation; [`MemoryRecordStore`] keeps everything in a map and
//! is used by tests and embedders that don't want a database file.

use crate::error::Result;
use crate::types::{Status, TaskId, TrackMetadata};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

/// Ceiling for the informational failure counter
pub const MAX_RETRY_COUNT: u32 = 3;

/// Durable record for one track
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRecord {
    /// Track id (primary key)
    pub id: TaskId,
    /// Track title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Album name
    pub album: String,
    /// Album identifier
    pub album_id: String,
    /// Final artifact path once completed
    pub file_path: Option<String>,
    /// Size of the final artifact in bytes
    pub file_size: u64,
    /// Last persisted status
    pub status: Status,
    /// Unix timestamp of the last submit
    pub download_timestamp: Option<i64>,
    /// Unix timestamp of completion
    pub completed_timestamp: Option<i64>,
    /// Last failure message
    pub error_message: Option<String>,
    /// Informational failure counter
    pub retry_count: u32,
    /// Source URL, kept so paused tasks can be resumed after a restart
    pub source_url: Option<String>,
}

impl DownloadRecord {
    /// An empty record for `id` in the given status
    pub fn new(id: TaskId, status: Status) -> Self {
        Self {
            id,
            title: String::new(),
            artist: String::new(),
            album: String::new(),
            album_id: String::new(),
            file_path: None,
            file_size: 0,
            status,
            download_timestamp: None,
            completed_timestamp: None,
            error_message: None,
            retry_count: 0,
            source_url: None,
        }
    }

    /// Display metadata stored with the record
    pub fn metadata(&self) -> TrackMetadata {
        TrackMetadata {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            album_id: self.album_id.clone(),
        }
    }
}

/// Record written when a track is submitted
#[derive(Clone, Debug)]
pub struct NewRecord {
    /// Track id
    pub id: TaskId,
    /// Display metadata
    pub metadata: TrackMetadata,
    /// Source URL
    pub source_url: String,
    /// Initial status (Waiting or Downloading)
    pub status: Status,
}

/// Durable store for track records
///
/// Implementations are called from the orchestrator's background record
/// writer, one operation at a time and in submission order.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert a record or refresh its metadata, source URL, status and download timestamp
    ///
    /// Completion data (path, size, completed timestamp) is cleared; the
    /// retry counter and last error message are kept.
    async fn upsert_record(&self, record: &NewRecord) -> Result<()>;

    /// Set the status of a record, creating an empty one if needed
    async fn upsert_status(&self, id: &TaskId, status: Status) -> Result<()>;

    /// Mark a record downloaded with its final path and size
    async fn mark_completed(&self, id: &TaskId, path: &Path, size: u64) -> Result<()>;

    /// Mark a record failed with the error message
    ///
    /// Increments the stored retry counter, saturating at [`MAX_RETRY_COUNT`].
    async fn mark_failed(&self, id: &TaskId, message: &str) -> Result<()>;

    /// Get a record by id
    async fn get(&self, id: &TaskId) -> Result<Option<DownloadRecord>>;

    /// All records in any of the given statuses, oldest submission first
    async fn list_by_status(&self, statuses: &[Status]) -> Result<Vec<DownloadRecord>>;

    /// Delete all failed records; returns how many were removed
    async fn clear_failed(&self) -> Result<u64>;

    /// Delete all records; returns how many were removed
    async fn clear_all(&self) -> Result<u64>;

    /// Mark that a session has started (clears the clean-shutdown marker)
    async fn set_clean_start(&self) -> Result<()>;

    /// Mark that the session ended through an orderly shutdown
    async fn set_clean_shutdown(&self) -> Result<()>;

    /// Whether the previous session ended without an orderly shutdown
    async fn was_unclean_shutdown(&self) -> Result<bool>;
}

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<TaskId, DownloadRecord>,
    clean_shutdown: bool,
}

/// In-memory [`RecordStore`]
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    state: Mutex<MemoryState>,
}

impl MemoryRecordStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with records (e.g. state left by a previous session)
    pub fn with_records(records: impl IntoIterator<Item = DownloadRecord>) -> Self {
        let store = Self::new();
        {
            let mut state = store.lock();
            for record in records {
                state.records.insert(record.id.clone(), record);
            }
        }
        store
    }

    /// Snapshot of every record, sorted by id
    pub fn records(&self) -> Vec<DownloadRecord> {
        let mut records: Vec<_> = self.lock().records.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_record(&self, record: &NewRecord) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .records
            .entry(record.id.clone())
            .or_insert_with(|| DownloadRecord::new(record.id.clone(), record.status));

        entry.title = record.metadata.title.clone();
        entry.artist = record.metadata.artist.clone();
        entry.album = record.metadata.album.clone();
        entry.album_id = record.metadata.album_id.clone();
        entry.source_url = Some(record.source_url.clone());
        entry.status = record.status;
        entry.download_timestamp = Some(chrono::Utc::now().timestamp());
        entry.file_path = None;
        entry.file_size = 0;
        entry.completed_timestamp = None;
        Ok(())
    }

    async fn upsert_status(&self, id: &TaskId, status: Status) -> Result<()> {
        let mut state = self.lock();
        state
            .records
            .entry(id.clone())
            .and_modify(|r| r.status = status)
            .or_insert_with(|| DownloadRecord::new(id.clone(), status));
        Ok(())
    }

    async fn mark_completed(&self, id: &TaskId, path: &Path, size: u64) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .records
            .entry(id.clone())
            .or_insert_with(|| DownloadRecord::new(id.clone(), Status::Downloaded));
        entry.status = Status::Downloaded;
        entry.file_path = Some(path.to_string_lossy().into_owned());
        entry.file_size = size;
        entry.completed_timestamp = Some(chrono::Utc::now().timestamp());
        entry.error_message = None;
        Ok(())
    }

    async fn mark_failed(&self, id: &TaskId, message: &str) -> Result<()> {
        let mut state = self.lock();
        let entry = state
            .records
            .entry(id.clone())
            .or_insert_with(|| DownloadRecord::new(id.clone(), Status::Failed));
        entry.status = Status::Failed;
        entry.error_message = Some(message.to_string());
        entry.retry_count = (entry.retry_count + 1).min(MAX_RETRY_COUNT);
        Ok(())
    }

    async fn get(&self, id: &TaskId) -> Result<Option<DownloadRecord>> {
        Ok(self.lock().records.get(id).cloned())
    }

    async fn list_by_status(&self, statuses: &[Status]) -> Result<Vec<DownloadRecord>> {
        let mut records: Vec<_> = self
            .lock()
            .records
            .values()
            .filter(|r| statuses.contains(&r.status))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.download_timestamp
                .cmp(&b.download_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(records)
    }

    async fn clear_failed(&self) -> Result<u64> {
        let mut state = self.lock();
        let before = state.records.len();
        state.records.retain(|_, r| r.status != Status::Failed);
        Ok((before - state.records.len()) as u64)
    }

    async fn clear_all(&self) -> Result<u64> {
        let mut state = self.lock();
        let removed = state.records.len() as u64;
        state.records.clear();
        Ok(removed)
    }

    async fn set_clean_start(&self) -> Result<()> {
        self.lock().clean_shutdown = false;
        Ok(())
    }

    async fn set_clean_shutdown(&self) -> Result<()> {
        self.lock().clean_shutdown = true;
        Ok(())
    }

    async fn was_unclean_shutdown(&self) -> Result<bool> {
        Ok(!self.lock().clean_shutdown)
    }
}
