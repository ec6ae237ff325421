//! Transfer context: HTTP client seam, per-task shared state, and progress publication.

use crate::config::HttpConfig;
use crate::error::{Error, Result, TransferError};
use crate::types::{DownloadTask, Event, TaskId, percent_of};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use futures::stream::{BoxStream, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressThrottle;

/// Response body as a stream of byte chunks
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, TransferError>>;

/// Status line, size headers and body of a (possibly ranged) GET
pub struct TransferResponse {
    /// HTTP status code
    pub status: u16,
    /// Content-Length of this response body
    pub content_length: Option<u64>,
    /// Raw Content-Range header value
    pub content_range: Option<String>,
    /// Response body
    pub body: ByteStream,
}

impl std::fmt::Debug for TransferResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_range", &self.content_range)
            .finish_non_exhaustive()
    }
}

/// Abstraction over the HTTP side of a transfer, enabling testability.
///
/// `offset` is the current length of the `.part` file; implementations send
/// `Range: bytes=<offset>-` when it is non-zero. Any status is returned as a
/// response; only connect failures are errors.
#[async_trait]
pub trait TransferClient: Send + Sync {
    /// Open the source at `url`, resuming from byte `offset`
    async fn open(
        &self,
        url: &str,
        offset: u64,
    ) -> std::result::Result<TransferResponse, TransferError>;
}

/// Production [`TransferClient`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpTransferClient {
    client: reqwest::Client,
}

impl HttpTransferClient {
    /// Build a client with the configured connect timeout and user agent
    ///
    /// The read timeout is applied per chunk by the worker, not here.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {}", e),
                key: Some("http".to_string()),
            })?;

        Ok(Self { client })
    }

    /// Wrap an existing reqwest client (e.g. one with custom auth headers)
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TransferClient for HttpTransferClient {
    async fn open(
        &self,
        url: &str,
        offset: u64,
    ) -> std::result::Result<TransferResponse, TransferError> {
        let mut request = self.client.get(url);
        if offset > 0 {
            request = request.header(reqwest::header::RANGE, format!("bytes={}-", offset));
        }

        let response = request.send().await?;

        let status = response.status().as_u16();
        let content_length = response.content_length();
        let content_range = response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransferError::from))
            .boxed();

        Ok(TransferResponse {
            status,
            content_length,
            content_range,
            body,
        })
    }
}

/// Parsed `Content-Range` header
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ContentRange {
    /// First byte of this response (None for `bytes */N`)
    pub(crate) start: Option<u64>,
    /// Full size of the resource, if the server knows it
    pub(crate) total: Option<u64>,
}

/// Parse `bytes <start>-<end>/<total>` or `bytes */<total>`
pub(crate) fn parse_content_range(value: &str) -> Option<ContentRange> {
    let spec = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = spec.split_once('/')?;

    let total = match total.trim() {
        "*" => None,
        t => Some(t.parse().ok()?),
    };

    let start = match range.trim() {
        "*" => None,
        r => {
            let (start, _end) = r.split_once('-')?;
            Some(start.trim().parse().ok()?)
        }
    };

    Some(ContentRange { start, total })
}

/// How a transfer ended
#[derive(Debug)]
pub(crate) enum TransferOutcome {
    /// `.part` renamed to its final name
    Completed {
        /// Final artifact path
        path: PathBuf,
        /// Final size in bytes
        size: u64,
    },
    /// Stopped at a chunk boundary because the pause flag was set
    Paused,
    /// The cancellation token fired
    Cancelled,
    /// Network, file or rename failure
    Failed(TransferError),
}

/// Shared context for a single transfer, reducing parameter passing between helpers.
pub(crate) struct TransferContext {
    pub(crate) id: TaskId,
    pub(crate) source_url: String,
    pub(crate) part_path: PathBuf,
    pub(crate) final_path: PathBuf,
    pub(crate) chunk_size: usize,
    pub(crate) progress_interval: Duration,
    pub(crate) read_timeout: Duration,
    pub(crate) client: Arc<dyn TransferClient>,
    pub(crate) tasks: Arc<DashMap<TaskId, DownloadTask>>,
    pub(crate) pause_flags: Arc<DashSet<TaskId>>,
    pub(crate) cancel_token: CancellationToken,
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
}

impl TransferContext {
    /// Whether the cooperative pause flag is set for this task
    pub(super) fn pause_requested(&self) -> bool {
        self.pause_flags.contains(&self.id)
    }

    /// Record byte counts on the task and publish a throttled progress event
    ///
    /// The task entry stays locked while publishing, and a cancelled transfer
    /// never publishes: cancel fires the token before it evicts the task, so no
    /// progress can follow a `Canceled` event.
    pub(super) fn report_progress(
        &self,
        downloaded: u64,
        total: u64,
        throttle: &mut ProgressThrottle,
    ) {
        let Some(mut task) = self.tasks.get_mut(&self.id) else {
            return;
        };
        if self.cancel_token.is_cancelled() {
            return;
        }

        task.downloaded_bytes = downloaded;
        task.total_bytes = total;

        let percent = percent_of(downloaded, total);
        if throttle.should_emit(percent, tokio::time::Instant::now()) {
            self.event_tx
                .send(Event::Progress {
                    id: self.id.clone(),
                    percent,
                })
                .ok();
        }
    }
}
