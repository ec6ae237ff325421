//! Core downloader implementation split into focused submodules.
//!
//! The `MediaDownloader` struct and its methods are organized by domain:
//! - [`queue`] - FIFO admission, slot accounting, transfer spawning
//! - [`submit`] - Accepting new download requests
//! - [`control`] - Pause/resume/cancel, single and global
//! - [`lifecycle`] - Startup reconciliation and shutdown coordination
//! - [`queries`] - Read-only views and probe/store passthroughs
//! - [`persistence`] - Ordered background record writer
//! - [`transfer`] - Core byte transfer execution

mod control;
mod lifecycle;
mod persistence;
mod queries;
mod queue;
mod submit;
mod transfer;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use transfer::{ByteStream, HttpTransferClient, TransferClient, TransferResponse};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::probe::FileProbe;
use crate::store::RecordStore;
use crate::types::{DownloadTask, Event, TaskId};
use dashmap::{DashMap, DashSet};
use persistence::RecordWriter;
use queue::Admission;
use std::sync::atomic::{AtomicBool, AtomicU64};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// A running transfer's identity and kill switch
#[derive(Debug)]
pub(crate) struct TransferHandle {
    /// Distinguishes this run from earlier runs of the same id
    pub(crate) attempt: u64,
    /// Fired by cancel; the worker stops at its next await point
    pub(crate) cancel_token: CancellationToken,
}

/// Queue and task state management
#[derive(Clone)]
pub(crate) struct QueueState {
    /// Waiting queue, running set and global pause flag (the single coarse lock).
    /// Held only for bookkeeping, never across an await.
    pub(crate) admission: Arc<Mutex<Admission>>,
    /// Every waiting, downloading, paused or failed task
    pub(crate) tasks: Arc<DashMap<TaskId, DownloadTask>>,
    /// Running transfers by id
    pub(crate) handles: Arc<DashMap<TaskId, TransferHandle>>,
    /// Cooperative pause requests, polled by workers before each chunk
    pub(crate) pause_flags: Arc<DashSet<TaskId>>,
    /// Flag to indicate whether new submissions are accepted (false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Submission order counter
    pub(crate) next_seq: Arc<AtomicU64>,
    /// Transfer attempt counter
    pub(crate) next_attempt: Arc<AtomicU64>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            admission: Arc::new(Mutex::new(Admission::default())),
            tasks: Arc::new(DashMap::new()),
            handles: Arc::new(DashMap::new()),
            pause_flags: Arc::new(DashSet::new()),
            accepting_new: Arc::new(AtomicBool::new(true)),
            next_seq: Arc::new(AtomicU64::new(0)),
            next_attempt: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MediaDownloader {
    /// Durable per-track records
    pub(crate) store: Arc<dyn RecordStore>,
    /// Ordered background writer in front of `store`
    pub(crate) records: RecordWriter,
    /// Download directory probe (authoritative for "downloaded")
    pub(crate) probe: Arc<FileProbe>,
    /// HTTP side of transfers
    pub(crate) client: Arc<dyn TransferClient>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Queue and task state
    pub(crate) queue_state: QueueState,
}

impl MediaDownloader {
    /// Create a new MediaDownloader instance
    ///
    /// This initializes all core components:
    /// - Creates the download directory
    /// - Opens/creates the SQLite database and runs migrations
    /// - Builds the HTTP client
    /// - Reconciles records left behind by the previous session
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;
        let client = HttpTransferClient::new(&config.http)?;

        Self::with_components(config, Arc::new(db), Arc::new(client)).await
    }

    /// Create a MediaDownloader over an existing record store and transfer client
    ///
    /// Marks a clean start in the store and runs
    /// [`reconcile_on_startup`](Self::reconcile_on_startup) before returning.
    pub async fn with_components(
        config: Config,
        store: Arc<dyn RecordStore>,
        client: Arc<dyn TransferClient>,
    ) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(config.download_dir())
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download_dir().display(),
                        e
                    ),
                ))
            })?;

        if store.was_unclean_shutdown().await? {
            tracing::warn!("Previous session did not shut down cleanly; reconciling records");
        }
        store.set_clean_start().await?;

        // Buffer size of 1000 events; slow subscribers see RecvError::Lagged
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let probe = Arc::new(FileProbe::new(
            config.download_dir().clone(),
            config.download.min_valid_file_size,
        ));

        let downloader = Self {
            records: RecordWriter::spawn(store.clone()),
            store,
            probe,
            client,
            event_tx,
            config: Arc::new(config),
            queue_state: QueueState::new(),
        };

        let report = downloader.reconcile_on_startup().await;
        tracing::info!(
            paused = report.paused.len(),
            reset = report.reset.len(),
            completed = report.completed.len(),
            rehydrated = report.rehydrated,
            max_concurrent = downloader.config.download.max_concurrent_downloads,
            "MediaDownloader ready"
        );

        Ok(downloader)
    }

    /// Subscribe to download events
    ///
    /// Multiple subscribers are supported. Each subscriber receives all events independently.
    /// Events are buffered, but if a subscriber falls behind by more than 1000 events,
    /// it will receive a `RecvError::Lagged` error.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_dl::{Config, Event, MediaDownloader};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = MediaDownloader::new(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             if let Event::Complete { id } = event {
    ///                 println!("finished {id}");
    ///             }
    ///         }
    ///     });
    ///
    ///     Ok(())
    /// }
    /// ```
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Emit an event to all subscribers
    ///
    /// If there are no active subscribers, the event is silently dropped.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Acquire the admission lock, recovering from poisoning
    pub(crate) fn lock_admission(&self) -> MutexGuard<'_, Admission> {
        self.queue_state
            .admission
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
