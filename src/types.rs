//! Core types for media-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Stable external identifier of a track (unique key across all collections)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Download status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Nothing on disk (never submitted, or cancelled)
    NotDownloaded,
    /// Queued behind the concurrency limit
    Waiting,
    /// Holding a pool slot and transferring
    Downloading,
    /// Stopped with the `.part` file kept for resume
    Paused,
    /// Final artifact present under a recognized extension
    Downloaded,
    /// Transfer failed; resumable by the caller
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::NotDownloaded,
            1 => Status::Waiting,
            2 => Status::Downloading,
            3 => Status::Paused,
            4 => Status::Downloaded,
            5 => Status::Failed,
            _ => Status::NotDownloaded, // Unknown codes carry no resumable state
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::NotDownloaded => 0,
            Status::Waiting => 1,
            Status::Downloading => 2,
            Status::Paused => 3,
            Status::Downloaded => 4,
            Status::Failed => 5,
        }
    }

    /// Lowercase label used in error messages
    pub fn label(&self) -> &'static str {
        match self {
            Status::NotDownloaded => "not downloaded",
            Status::Waiting => "waiting",
            Status::Downloading => "downloading",
            Status::Paused => "paused",
            Status::Downloaded => "downloaded",
            Status::Failed => "failed",
        }
    }
}

/// Display metadata carried alongside a task (not used for identity)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Track title
    pub title: String,
    /// Artist name
    pub artist: String,
    /// Album name
    pub album: String,
    /// Album identifier (used for cover art lookups)
    pub album_id: String,
}

/// Caller input for [`MediaDownloader::submit`](crate::MediaDownloader::submit)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Stable track id
    pub id: TaskId,
    /// Source URL (already resolved for the transcode policy)
    pub source_url: String,
    /// Display metadata
    #[serde(default)]
    pub metadata: TrackMetadata,
    /// Target extension override (None = config policy)
    #[serde(default)]
    pub extension: Option<String>,
}

impl DownloadRequest {
    /// Create a request with empty metadata and the default extension policy
    pub fn new(id: impl Into<TaskId>, source_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_url: source_url.into(),
            metadata: TrackMetadata::default(),
            extension: None,
        }
    }

    /// Attach display metadata
    pub fn with_metadata(mut self, metadata: TrackMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// In-memory state of one active, waiting, paused or failed task
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadTask {
    /// Stable track id
    pub id: TaskId,
    /// Current status
    pub status: Status,
    /// Bytes present in the `.part` file
    pub downloaded_bytes: u64,
    /// Total size (0 = unknown until the first response)
    pub total_bytes: u64,
    /// `.part` path while transferring, final path after completion
    pub file_path: PathBuf,
    /// Last failure message
    pub error_message: Option<String>,
    /// Informational failure counter (capped, never triggers a retry)
    pub retry_count: u32,
    /// Display metadata
    pub metadata: TrackMetadata,
    /// Source URL
    pub source_url: String,
    /// Target extension of the final artifact
    pub extension: String,
    /// Submission order, used to restore queue order on resume-all
    pub seq: u64,
}

impl DownloadTask {
    /// Integer percentage (0 when the total is unknown)
    pub fn percent(&self) -> u8 {
        percent_of(self.downloaded_bytes, self.total_bytes)
    }
}

/// Integer percentage of `done` over `total`, clamped to 100
pub fn percent_of(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// What [`MediaDownloader::submit`](crate::MediaDownloader::submit) did with a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// A pool slot was free; the transfer started
    Started,
    /// The pool was full or globally paused; the task is waiting
    Queued,
    /// The id was paused or failed; the call was treated as a resume
    Resumed,
}

/// Event published to subscribers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Throttled progress update (also sent when a task is paused)
    Progress {
        /// Task id
        id: TaskId,
        /// Integer percentage (0 to 100)
        percent: u8,
    },

    /// Final artifact renamed into place
    Complete {
        /// Task id
        id: TaskId,
    },

    /// Transfer failed
    Failed {
        /// Task id
        id: TaskId,
        /// Error message
        error_message: String,
    },

    /// Task cancelled and its partial file deleted
    Canceled {
        /// Task id
        id: TaskId,
    },

    /// Downloader shutting down
    Shutdown,
}

/// Snapshot of the orchestrator's admission state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Tasks holding a pool slot
    pub running: usize,
    /// Tasks in the FIFO waiting queue
    pub waiting: usize,
    /// Tasks paused in memory
    pub paused: usize,
    /// Tasks failed in memory
    pub failed: usize,
    /// Whether the global pause flag is set
    pub global_paused: bool,
    /// Configured pool size
    pub max_concurrent: usize,
}

/// Outcome of a startup reconciliation pass
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Records moved to `Paused` because a non-empty `.part` file exists
    pub paused: Vec<TaskId>,
    /// Records reset to `NotDownloaded`
    pub reset: Vec<TaskId>,
    /// Records marked `Downloaded` because the artifact is on disk
    pub completed: Vec<TaskId>,
    /// Paused tasks restored into memory so `resume` works
    pub rehydrated: usize,
}
