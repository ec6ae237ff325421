//! # media-dl
//!
//! Concurrent download orchestrator for streaming-server music libraries.
//!
//! Tracks are fetched over HTTP into `{id}.{ext}.part` files and renamed to
//! `{id}.{ext}` once complete. At most `max_concurrent_downloads` transfers
//! run at once; the rest wait in a FIFO queue. Transfers can be paused,
//! resumed (with HTTP range requests), or cancelled individually or all at
//! once, and per-track records survive restarts.
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, DownloadRequest, Event, MediaDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.download.download_dir = "/srv/music/offline".into();
//!     config.transcode.format = Some("opus".to_string());
//!
//!     let downloader = MediaDownloader::new(config.clone()).await?;
//!
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let url = config
//!         .transcode
//!         .source_url("https://music.example.com/rest/stream?id=42")?;
//!     let mut request = DownloadRequest::new("42", url);
//!     request.extension = Some(config.target_extension());
//!     downloader.submit(request).await?;
//!
//!     media_dl::run_with_shutdown(downloader).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// SQLite record store
pub mod db;
/// Download orchestrator (decomposed into focused submodules)
pub mod downloader;
/// Error types
pub mod error;
/// Download directory probe
pub mod probe;
/// Record store abstraction
pub mod store;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::{Config, DownloadConfig, HttpConfig, PersistenceConfig, TranscodeConfig};
pub use db::Database;
pub use downloader::{
    ByteStream, HttpTransferClient, MediaDownloader, TransferClient, TransferResponse,
};
pub use error::{DatabaseError, DownloadError, Error, Result, TransferError};
pub use probe::{FileProbe, SUPPORTED_EXTENSIONS};
pub use store::{DownloadRecord, MAX_RETRY_COUNT, MemoryRecordStore, NewRecord, RecordStore};
pub use types::{
    DownloadRequest, DownloadTask, Event, QueueStats, ReconcileReport, Status, SubmitOutcome,
    TaskId, TrackMetadata,
};

/// Run until a termination signal arrives, then shut the downloader down.
///
/// - **Unix:** SIGTERM or SIGINT. If neither handler can be registered,
///   falls back to `tokio::signal::ctrl_c()`.
/// - **Windows/other:** Ctrl+C.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, MediaDownloader, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = MediaDownloader::new(Config::default()).await?;
///     run_with_shutdown(downloader).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(downloader: MediaDownloader) -> Result<()> {
    wait_for_signal().await;
    downloader.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{Signal, SignalKind, signal};

    async fn recv_or_pending(signal: Option<&mut Signal>) {
        match signal {
            Some(signal) => {
                signal.recv().await;
            }
            None => std::future::pending().await,
        }
    }

    // Registration can fail in restricted environments (containers, tests)
    let register = |kind: SignalKind, name: &str| match signal(kind) {
        Ok(signal) => Some(signal),
        Err(e) => {
            tracing::warn!(signal = name, error = %e, "Could not register signal handler");
            None
        }
    };
    let mut sigterm = register(SignalKind::terminate(), "SIGTERM");
    let mut sigint = register(SignalKind::interrupt(), "SIGINT");

    if sigterm.is_none() && sigint.is_none() {
        tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
        tokio::signal::ctrl_c().await.ok();
        return;
    }

    tokio::select! {
        _ = recv_or_pending(sigterm.as_mut()) => tracing::info!("Received SIGTERM signal"),
        _ = recv_or_pending(sigint.as_mut()) => tracing::info!("Received SIGINT signal (Ctrl+C)"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C signal"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C signal"),
    }
}
