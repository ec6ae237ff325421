use super::*;
use crate::downloader::test_helpers::{MockClient, MockSource, payload};
use crate::error::TransferError;
use crate::types::{DownloadTask, Event, Status, TaskId, TrackMetadata};
use dashmap::{DashMap, DashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const URL: &str = "http://music.test/rest/stream?id=t1";

struct Harness {
    client: Arc<MockClient>,
    tasks: Arc<DashMap<TaskId, DownloadTask>>,
    pause_flags: Arc<DashSet<TaskId>>,
    events: tokio::sync::broadcast::Receiver<Event>,
    ctx: TransferContext,
}

fn harness(dir: &Path) -> Harness {
    let id = TaskId::from("t1");
    let client = MockClient::new();
    let tasks = Arc::new(DashMap::new());
    tasks.insert(
        id.clone(),
        DownloadTask {
            id: id.clone(),
            status: Status::Downloading,
            downloaded_bytes: 0,
            total_bytes: 0,
            file_path: dir.join("t1.mp3.part"),
            error_message: None,
            retry_count: 0,
            metadata: TrackMetadata::default(),
            source_url: URL.to_string(),
            extension: "mp3".to_string(),
            seq: 0,
        },
    );
    let pause_flags = Arc::new(DashSet::new());
    let (event_tx, events) = tokio::sync::broadcast::channel(100);

    let ctx = TransferContext {
        id,
        source_url: URL.to_string(),
        part_path: dir.join("t1.mp3.part"),
        final_path: dir.join("t1.mp3"),
        chunk_size: 512,
        progress_interval: Duration::from_millis(200),
        read_timeout: Duration::from_secs(5),
        client: client.clone(),
        tasks: tasks.clone(),
        pause_flags: pause_flags.clone(),
        cancel_token: CancellationToken::new(),
        event_tx,
    };

    Harness {
        client,
        tasks,
        pause_flags,
        events,
        ctx,
    }
}

#[tokio::test]
async fn test_fresh_transfer_renames_into_place() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let data = payload(3000);
    h.client.serve(URL, MockSource::new(data.clone()));

    match run_transfer(h.ctx).await {
        TransferOutcome::Completed { path, size } => {
            assert_eq!(path, dir.path().join("t1.mp3"));
            assert_eq!(size, 3000);
        }
        other => panic!("expected completion, got {other:?}"),
    }

    assert_eq!(std::fs::read(dir.path().join("t1.mp3")).unwrap(), data);
    assert!(!dir.path().join("t1.mp3.part").exists());

    let task = h.tasks.get(&TaskId::from("t1")).unwrap();
    assert_eq!(task.downloaded_bytes, 3000);
    assert_eq!(task.total_bytes, 3000);
}

#[tokio::test]
async fn test_existing_part_is_resumed_with_range() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let data = payload(3000);
    h.client.serve(URL, MockSource::new(data.clone()));
    std::fs::write(dir.path().join("t1.mp3.part"), &data[..1200]).unwrap();

    let outcome = run_transfer(h.ctx).await;
    assert!(matches!(outcome, TransferOutcome::Completed { size: 3000, .. }));
    assert_eq!(h.client.offsets(URL), vec![1200]);
    assert_eq!(std::fs::read(dir.path().join("t1.mp3")).unwrap(), data);
}

#[tokio::test]
async fn test_full_response_to_range_request_truncates() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let data = payload(2000);
    let mut source = MockSource::new(data.clone());
    source.ignore_range = true;
    h.client.serve(URL, source);
    std::fs::write(dir.path().join("t1.mp3.part"), vec![0xAA; 900]).unwrap();

    let outcome = run_transfer(h.ctx).await;
    assert!(matches!(outcome, TransferOutcome::Completed { size: 2000, .. }));
    assert_eq!(std::fs::read(dir.path().join("t1.mp3")).unwrap(), data);
}

#[tokio::test]
async fn test_complete_part_with_unsatisfiable_range_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let data = payload(2048);
    h.client.serve(URL, MockSource::new(data.clone()));
    std::fs::write(dir.path().join("t1.mp3.part"), &data).unwrap();

    let outcome = run_transfer(h.ctx).await;
    assert!(matches!(outcome, TransferOutcome::Completed { size: 2048, .. }));
    assert_eq!(std::fs::read(dir.path().join("t1.mp3")).unwrap(), data);
}

#[tokio::test]
async fn test_http_error_fails_and_keeps_part() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.client.serve(URL, MockSource::status(403));
    std::fs::write(dir.path().join("t1.mp3.part"), payload(100)).unwrap();

    match run_transfer(h.ctx).await {
        TransferOutcome::Failed(TransferError::HttpStatus { status, .. }) => assert_eq!(status, 403),
        other => panic!("expected http failure, got {other:?}"),
    }
    assert_eq!(
        std::fs::metadata(dir.path().join("t1.mp3.part")).unwrap().len(),
        100
    );
}

#[tokio::test]
async fn test_short_body_is_incomplete() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let mut source = MockSource::new(payload(4096));
    source.fail_after = Some(2);
    h.client.serve(URL, source);

    match run_transfer(h.ctx).await {
        TransferOutcome::Failed(TransferError::Network(message)) => {
            assert!(message.contains("reset"));
        }
        other => panic!("expected network failure, got {other:?}"),
    }

    // Bytes written before the failure are flushed for the next attempt
    assert_eq!(
        std::fs::metadata(dir.path().join("t1.mp3.part")).unwrap().len(),
        2048
    );
    assert!(!dir.path().join("t1.mp3").exists());
}

#[tokio::test]
async fn test_existing_final_file_is_not_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.client.serve(URL, MockSource::new(payload(1500)));
    std::fs::write(dir.path().join("t1.mp3"), b"keep me").unwrap();

    match run_transfer(h.ctx).await {
        TransferOutcome::Failed(TransferError::Rename { reason, .. }) => {
            assert!(reason.contains("already exists"));
        }
        other => panic!("expected rename failure, got {other:?}"),
    }
    assert_eq!(std::fs::read(dir.path().join("t1.mp3")).unwrap(), b"keep me");
    assert!(dir.path().join("t1.mp3.part").exists());
}

#[tokio::test]
async fn test_pause_flag_before_start_skips_request() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    h.client.serve(URL, MockSource::new(payload(1000)));
    h.pause_flags.insert(TaskId::from("t1"));

    assert!(matches!(run_transfer(h.ctx).await, TransferOutcome::Paused));
    assert!(h.client.requests().is_empty());
}

#[tokio::test]
async fn test_pause_flag_stops_at_chunk_boundary() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let (source, gate) = MockSource::gated(payload(4096));
    h.client.serve(URL, source);

    let Harness {
        tasks,
        pause_flags,
        ctx,
        ..
    } = h;
    let worker = tokio::spawn(run_transfer(ctx));

    gate.add_permits(1);
    let id = TaskId::from("t1");
    while tasks.get(&id).unwrap().downloaded_bytes < 1024 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    pause_flags.insert(id);
    gate.add_permits(1);

    assert!(matches!(worker.await.unwrap(), TransferOutcome::Paused));
    assert_eq!(
        std::fs::metadata(dir.path().join("t1.mp3.part")).unwrap().len(),
        1024
    );
}

#[tokio::test]
async fn test_cancel_interrupts_blocked_read() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let (source, _gate) = MockSource::gated(payload(4096));
    h.client.serve(URL, source);

    let token = h.ctx.cancel_token.clone();
    let mut events = h.events;
    let worker = tokio::spawn(run_transfer(h.ctx));

    // Wait for the opening progress report, then cancel while the body is stalled
    events.recv().await.unwrap();
    token.cancel();

    let outcome = tokio::time::timeout(Duration::from_secs(2), worker)
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, TransferOutcome::Cancelled));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_stalled_body_hits_read_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path());
    h.ctx.read_timeout = Duration::from_millis(50);
    let (source, _gate) = MockSource::gated(payload(4096));
    h.client.serve(URL, source);

    match run_transfer(h.ctx).await {
        TransferOutcome::Failed(TransferError::Network(message)) => {
            assert!(message.contains("no data received"));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn test_progress_events_are_published() {
    let dir = tempfile::tempdir().unwrap();
    let mut h = harness(dir.path());
    h.client.serve(URL, MockSource::new(payload(4096)));

    run_transfer(h.ctx).await;

    let mut percents = Vec::new();
    while let Ok(event) = h.events.try_recv() {
        if let Event::Progress { percent, .. } = event {
            percents.push(percent);
        }
    }
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] < w[1]), "{percents:?}");
}

#[tokio::test]
async fn test_cancel_during_rename_undoes_it() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    std::fs::write(dir.path().join("t1.mp3.part"), payload(2048)).unwrap();
    h.ctx.cancel_token.cancel();

    let outcome = super::finalization::finalize_transfer(&h.ctx).await.unwrap();
    assert!(matches!(outcome, TransferOutcome::Cancelled));
    assert!(!dir.path().join("t1.mp3").exists());
    assert!(!dir.path().join("t1.mp3.part").exists());
}
