//! Error types for media-dl
//!
//! This module provides the error handling for the library:
//! - Domain-specific error types (Download, Transfer, Database, Config)
//! - Machine-readable error codes for UI layers
//! - Context information (task ID, file paths, HTTP status, etc.)
//!
//! Transfer errors never escape a worker: they are converted into a `Failed`
//! task status and an [`Event::Failed`](crate::types::Event::Failed) carrying the
//! rendered message.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Download control error (submit/pause/resume rejected)
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Byte transfer error
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record or file not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// HTTP client error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Errors returned by the orchestrator's control operations
#[derive(Debug, Error)]
pub enum DownloadError {
    /// No in-memory task exists for this id
    #[error("task {id} not found")]
    NotFound {
        /// The task id that was not found
        id: String,
    },

    /// A complete artifact for this id already exists on disk
    #[error("task {id} is already downloaded at {path}")]
    AlreadyDownloaded {
        /// The task id
        id: String,
        /// Path of the existing artifact
        path: PathBuf,
    },

    /// The task is already waiting or downloading
    #[error("task {id} is already {state}")]
    AlreadyActive {
        /// The task id
        id: String,
        /// The current state (e.g., "waiting", "downloading")
        state: String,
    },

    /// Cannot perform operation in current state
    #[error("cannot {operation} task {id} in state {current_state}")]
    InvalidState {
        /// The task id that is in an invalid state for the operation
        id: String,
        /// The operation that was attempted (e.g., "resume")
        operation: String,
        /// The current state that prevents the operation
        current_state: String,
    },
}

/// Errors raised while moving bytes for a single task
///
/// These are caught at the worker boundary; their `Display` output becomes the
/// task's `error_message`.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Connect or read failure from the HTTP client
    #[error("network failure: {0}")]
    Network(String),

    /// Server answered with a status other than 200/206
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus {
        /// The HTTP status code received
        status: u16,
        /// The requested URL
        url: String,
    },

    /// Local file I/O failed
    #[error("file error at {path}: {source}")]
    Io {
        /// The file being written or inspected
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The `.part` file could not be moved to its final name
    #[error("failed to rename {from} to {to}: {reason}")]
    Rename {
        /// The `.part` file
        from: PathBuf,
        /// The canonical destination
        to: PathBuf,
        /// Why the rename failed (e.g., "destination already exists")
        reason: String,
    },

    /// A partial response did not start where the `.part` file ends
    #[error("server resumed at byte {received_start}, expected {expected_start}")]
    RangeMismatch {
        /// Length of the existing `.part` file
        expected_start: u64,
        /// Start offset from the response's Content-Range
        received_start: u64,
    },

    /// The body ended before the advertised total was received
    #[error("connection closed after {received} of {expected} bytes")]
    Incomplete {
        /// Bytes present in the `.part` file
        received: u64,
        /// Total advertised by the server
        expected: u64,
    },
}

impl Error {
    /// Machine-readable error code for UI layers
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) | Error::Sqlx(_) => "database_error",
            Error::Download(e) => match e {
                DownloadError::NotFound { .. } => "task_not_found",
                DownloadError::AlreadyDownloaded { .. } => "already_downloaded",
                DownloadError::AlreadyActive { .. } => "already_active",
                DownloadError::InvalidState { .. } => "invalid_state",
            },
            Error::Transfer(e) => match e {
                TransferError::Network(_) => "network_error",
                TransferError::HttpStatus { .. } => "http_status",
                TransferError::Io { .. } => "io_error",
                TransferError::Rename { .. } => "rename_failed",
                TransferError::RangeMismatch { .. } => "range_mismatch",
                TransferError::Incomplete { .. } => "incomplete_transfer",
            },
            Error::Io(_) => "io_error",
            Error::NotFound(_) => "not_found",
            Error::ShuttingDown => "shutting_down",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        let msg = if e.is_timeout() {
            format!("timed out: {}", e)
        } else if e.is_connect() {
            format!("connect failed: {}", e)
        } else {
            e.to_string()
        };
        TransferError::Network(msg)
    }
}
