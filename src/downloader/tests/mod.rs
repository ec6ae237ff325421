use super::test_helpers::*;
use super::*;
use crate::error::DownloadError;
use crate::store::{DownloadRecord, MemoryRecordStore};
use crate::types::{DownloadRequest, ReconcileReport, Status, SubmitOutcome};
use std::time::Duration;


/// Submit `id` against its default test URL
async fn submit(downloader: &MediaDownloader, id: &str) -> SubmitOutcome {
    downloader
        .submit(DownloadRequest::new(id, url_for(id)))
        .await
        .unwrap()
}

/// Serve a gated source for `id`; returns its gate
fn serve_gated(client: &MockClient, id: &str, len: usize) -> std::sync::Arc<tokio::sync::Semaphore> {
    let (source, gate) = MockSource::gated(payload(len));
    client.serve(&url_for(id), source);
    gate
}

fn status_of(downloader: &MediaDownloader, id: &str) -> Option<Status> {
    downloader.task(&TaskId::from(id)).map(|t| t.status)
}

fn downloaded_bytes(downloader: &MediaDownloader, id: &str) -> u64 {
    downloader
        .task(&TaskId::from(id))
        .map(|t| t.downloaded_bytes)
        .unwrap_or(0)
}
