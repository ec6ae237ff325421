//! Shared test helpers for creating MediaDownloader instances in tests.

use crate::config::Config;
use crate::db::Database;
use crate::downloader::{MediaDownloader, TransferClient, TransferResponse};
use crate::error::TransferError;
use crate::store::RecordStore;
use crate::types::{Event, TaskId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tokio::sync::{Semaphore, broadcast};

/// Bytes served for one URL
#[derive(Clone)]
pub(crate) struct MockSource {
    pub(crate) data: Vec<u8>,
    /// When set, each body piece waits for one permit
    pub(crate) gate: Option<Arc<Semaphore>>,
    pub(crate) piece_size: usize,
    /// Respond with this status and an empty body
    pub(crate) status: Option<u16>,
    /// Answer ranged requests with a full 200
    pub(crate) ignore_range: bool,
    /// Yield a network error after this many pieces
    pub(crate) fail_after: Option<usize>,
}

impl MockSource {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            gate: None,
            piece_size: 1024,
            status: None,
            ignore_range: false,
            fail_after: None,
        }
    }

    /// Source whose pieces are released one permit at a time; returns the gate
    pub(crate) fn gated(data: Vec<u8>) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut source = Self::new(data);
        source.gate = Some(gate.clone());
        (source, gate)
    }

    pub(crate) fn status(status: u16) -> Self {
        let mut source = Self::new(Vec::new());
        source.status = Some(status);
        source
    }
}

/// In-process [`TransferClient`] serving [`MockSource`]s by URL
#[derive(Default)]
pub(crate) struct MockClient {
    sources: Mutex<HashMap<String, MockSource>>,
    requests: Mutex<Vec<(String, u64)>>,
}

impl MockClient {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register (or replace) the source for `url`
    pub(crate) fn serve(&self, url: &str, source: MockSource) {
        self.sources.lock().unwrap().insert(url.to_string(), source);
    }

    /// Every `(url, offset)` opened so far, in order
    pub(crate) fn requests(&self) -> Vec<(String, u64)> {
        self.requests.lock().unwrap().clone()
    }

    /// Offsets requested for `url`, in order
    pub(crate) fn offsets(&self, url: &str) -> Vec<u64> {
        self.requests()
            .into_iter()
            .filter(|(u, _)| u == url)
            .map(|(_, offset)| offset)
            .collect()
    }
}

#[async_trait]
impl TransferClient for MockClient {
    async fn open(&self, url: &str, offset: u64) -> Result<TransferResponse, TransferError> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), offset));

        let Some(source) = self.sources.lock().unwrap().get(url).cloned() else {
            return Ok(empty_response(404, None));
        };

        if let Some(status) = source.status {
            return Ok(empty_response(status, None));
        }

        let len = source.data.len() as u64;
        let ranged = offset > 0 && !source.ignore_range;

        if ranged && offset >= len {
            return Ok(empty_response(416, Some(format!("bytes */{}", len))));
        }

        let (status, start, content_range) = if ranged {
            (
                206,
                offset,
                Some(format!("bytes {}-{}/{}", offset, len - 1, len)),
            )
        } else {
            (200, 0, None)
        };

        let remaining = source.data[start as usize..].to_vec();
        let mut items: Vec<Result<Bytes, TransferError>> = remaining
            .chunks(source.piece_size.max(1))
            .map(|piece| Ok(Bytes::copy_from_slice(piece)))
            .collect();
        if let Some(n) = source.fail_after {
            items.truncate(n);
            items.push(Err(TransferError::Network("connection reset".to_string())));
        }

        let gate = source.gate.clone();
        let body = futures::stream::iter(items)
            .then(move |item| {
                let gate = gate.clone();
                async move {
                    if let Some(gate) = gate
                        && let Ok(permit) = gate.acquire().await
                    {
                        permit.forget();
                    }
                    item
                }
            })
            .boxed();

        Ok(TransferResponse {
            status,
            content_length: Some(remaining.len() as u64),
            content_range,
            body,
        })
    }
}

fn empty_response(status: u16, content_range: Option<String>) -> TransferResponse {
    TransferResponse {
        status,
        content_length: Some(0),
        content_range,
        body: futures::stream::empty().boxed(),
    }
}

/// Deterministic payload of `len` bytes
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub(crate) fn url_for(id: &str) -> String {
    format!("http://music.test/rest/stream?id={}", id)
}

/// Test configuration rooted in `root`: 1 KiB chunks, three slots
pub(crate) fn test_config(root: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = root.join("test.db");
    config.download.download_dir = root.join("downloads");
    config.download.max_concurrent_downloads = 3;
    config.download.chunk_size = 1024;
    config.download.progress_interval = Duration::from_millis(10);
    config
}

/// Helper to create a test MediaDownloader backed by SQLite and a [`MockClient`].
/// Returns the downloader, the client and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader() -> (MediaDownloader, Arc<MockClient>, TempDir) {
    let temp_dir = tempdir().unwrap();
    let client = MockClient::new();
    let downloader = open_downloader(temp_dir.path(), client.clone()).await;
    (downloader, client, temp_dir)
}

/// Open a downloader over the database and download directory in `root`
pub(crate) async fn open_downloader(root: &Path, client: Arc<MockClient>) -> MediaDownloader {
    let config = test_config(root);
    let db = Database::new(&config.persistence.database_path)
        .await
        .unwrap();
    MediaDownloader::with_components(config, Arc::new(db), client)
        .await
        .unwrap()
}

/// Open a downloader over an arbitrary store
pub(crate) async fn open_with_store(
    root: &Path,
    store: Arc<dyn RecordStore>,
    client: Arc<MockClient>,
) -> MediaDownloader {
    MediaDownloader::with_components(test_config(root), store, client)
        .await
        .unwrap()
}

/// Poll `condition` every 10ms for up to 5s
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within 5s"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until no transfer holds a slot
pub(crate) async fn wait_idle(downloader: &MediaDownloader) {
    wait_until(|| downloader.stats().running == 0).await;
}

/// Receive events until one matches, failing after 5s
pub(crate) async fn wait_for_event(
    rx: &mut broadcast::Receiver<Event>,
    matches: impl Fn(&Event) -> bool,
) -> Event {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

pub(crate) async fn wait_for_complete(rx: &mut broadcast::Receiver<Event>, id: &str) {
    wait_for_completions(rx, &[id]).await;
}

/// Wait for a `Complete` event for every id, in any order
pub(crate) async fn wait_for_completions(rx: &mut broadcast::Receiver<Event>, ids: &[&str]) {
    let mut pending: HashSet<TaskId> = ids.iter().map(|id| TaskId::from(*id)).collect();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !pending.is_empty() {
            match rx.recv().await {
                Ok(Event::Complete { id }) => {
                    pending.remove(&id);
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {pending:?} to complete"));
}

/// Everything currently buffered on `rx`
pub(crate) fn drain_events(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return events,
        }
    }
}
