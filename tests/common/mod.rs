//! Common test utilities for media-dl end-to-end tests

#![allow(dead_code)]

use media_dl::{Config, Event, MediaDownloader, TaskId};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Result of waiting for a task to reach a terminal event
#[derive(Debug, PartialEq, Eq)]
pub enum WaitResult {
    /// Task completed
    Completed,
    /// Task failed with error message
    Failed(String),
    /// Timeout waiting for an outcome
    Timeout,
}

/// Configuration rooted in a temp directory, small chunks, short timeouts
pub fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.download.download_dir = root.join("music");
    config.download.chunk_size = 512;
    config.persistence.database_path = root.join("media-dl.db");
    config.http.connect_timeout = Duration::from_secs(5);
    config.http.read_timeout = Duration::from_secs(5);
    config
}

/// Create a downloader with a real SQLite store and reqwest client
///
/// Returns the downloader and the tempdir (which must be kept alive).
pub async fn create_downloader() -> (MediaDownloader, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let downloader = MediaDownloader::new(test_config(temp_dir.path()))
        .await
        .expect("Failed to create downloader");
    (downloader, temp_dir)
}

/// Download directory inside a test root
pub fn music_dir(root: &Path) -> PathBuf {
    root.join("music")
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Subscribe-then-wait for `id` to complete or fail
pub async fn wait_for_outcome(
    events: &mut tokio::sync::broadcast::Receiver<Event>,
    id: &TaskId,
    timeout: Duration,
) -> WaitResult {
    let result = tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(Event::Complete { id: done }) if done == *id => return WaitResult::Completed,
                Ok(Event::Failed {
                    id: failed,
                    error_message,
                }) if failed == *id => return WaitResult::Failed(error_message),
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    return WaitResult::Failed("event channel closed".to_string());
                }
            }
        }
    })
    .await;

    result.unwrap_or(WaitResult::Timeout)
}
