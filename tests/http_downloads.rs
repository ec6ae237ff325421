//! End-to-end transfers through the reqwest client against a local HTTP server

mod common;

use common::*;
use media_dl::{DownloadRequest, Event, MediaDownloader, Status, SubmitOutcome, TaskId};
use std::collections::HashSet;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(10);

async fn submit_and_wait(
    downloader: &MediaDownloader,
    request: DownloadRequest,
) -> WaitResult {
    let id = request.id.clone();
    let mut events = downloader.subscribe();
    downloader.submit(request).await.unwrap();
    wait_for_outcome(&mut events, &id, TIMEOUT).await
}

#[tokio::test]
async fn test_full_download() {
    let server = MockServer::start().await;
    let data = payload(5000);
    Mock::given(method("GET"))
        .and(path("/rest/stream"))
        .and(query_param("id", "song-1"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let (downloader, temp_dir) = create_downloader().await;
    let request = DownloadRequest::new(
        "song-1",
        format!("{}/rest/stream?id=song-1", server.uri()),
    );

    assert_eq!(
        submit_and_wait(&downloader, request).await,
        WaitResult::Completed
    );

    let final_path = music_dir(temp_dir.path()).join("song-1.mp3");
    assert_eq!(std::fs::read(&final_path).unwrap(), data);
    assert!(downloader.is_downloaded(&TaskId::from("song-1")).await);

    let record = downloader
        .record(&TaskId::from("song-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, Status::Downloaded);
    assert_eq!(record.file_size, 5000);
    assert!(record.completed_timestamp.is_some());
}

#[tokio::test]
async fn test_partial_file_resumes_with_range_request() {
    let server = MockServer::start().await;
    let data = payload(5000);

    Mock::given(method("GET"))
        .and(path("/rest/stream"))
        .and(header("Range", "bytes=1000-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", "bytes 1000-4999/5000")
                .set_body_bytes(data[1000..].to_vec()),
        )
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .expect(0)
        .mount(&server)
        .await;

    let (downloader, temp_dir) = create_downloader().await;
    let dir = music_dir(temp_dir.path());
    std::fs::write(dir.join("song-2.mp3.part"), &data[..1000]).unwrap();

    let request = DownloadRequest::new("song-2", format!("{}/rest/stream?id=song-2", server.uri()));
    assert_eq!(
        submit_and_wait(&downloader, request).await,
        WaitResult::Completed
    );

    assert_eq!(std::fs::read(dir.join("song-2.mp3")).unwrap(), data);
    assert!(!dir.join("song-2.mp3.part").exists());
}

#[tokio::test]
async fn test_server_without_range_support_restarts_download() {
    let server = MockServer::start().await;
    let data = payload(3000);
    Mock::given(method("GET"))
        .and(path("/rest/stream"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .mount(&server)
        .await;

    let (downloader, temp_dir) = create_downloader().await;
    let dir = music_dir(temp_dir.path());
    std::fs::write(dir.join("song-3.mp3.part"), vec![0xEE; 700]).unwrap();

    let request = DownloadRequest::new("song-3", format!("{}/rest/stream?id=song-3", server.uri()));
    assert_eq!(
        submit_and_wait(&downloader, request).await,
        WaitResult::Completed
    );

    // The stale prefix was truncated, not kept
    assert_eq!(std::fs::read(dir.join("song-3.mp3")).unwrap(), data);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].headers.get("range").unwrap().to_str().unwrap(),
        "bytes=700-"
    );
}

#[tokio::test]
async fn test_complete_part_file_is_finalized_on_416() {
    let server = MockServer::start().await;
    let data = payload(2048);
    Mock::given(method("GET"))
        .and(header("Range", "bytes=2048-"))
        .respond_with(ResponseTemplate::new(416).insert_header("Content-Range", "bytes */2048"))
        .expect(1)
        .mount(&server)
        .await;

    let (downloader, temp_dir) = create_downloader().await;
    let dir = music_dir(temp_dir.path());
    std::fs::write(dir.join("song-4.mp3.part"), &data).unwrap();

    let request = DownloadRequest::new("song-4", format!("{}/rest/stream?id=song-4", server.uri()));
    assert_eq!(
        submit_and_wait(&downloader, request).await,
        WaitResult::Completed
    );
    assert_eq!(std::fs::read(dir.join("song-4.mp3")).unwrap(), data);
}

#[tokio::test]
async fn test_http_error_marks_task_failed() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let (downloader, temp_dir) = create_downloader().await;
    let id = TaskId::from("song-5");
    let request = DownloadRequest::new("song-5", format!("{}/rest/stream?id=song-5", server.uri()));

    match submit_and_wait(&downloader, request).await {
        WaitResult::Failed(message) => assert!(message.contains("404"), "message: {message}"),
        other => panic!("expected failure, got {other:?}"),
    }

    let task = downloader.task(&id).unwrap();
    assert_eq!(task.status, Status::Failed);
    assert_eq!(task.retry_count, 1);

    let record = downloader.record(&id).await.unwrap().unwrap();
    assert_eq!(record.status, Status::Failed);
    assert_eq!(record.retry_count, 1);
    assert!(record.error_message.unwrap().contains("404"));

    assert!(!music_dir(temp_dir.path()).join("song-5.mp3").exists());
}

#[tokio::test]
async fn test_transcode_policy_selects_url_and_extension() {
    let server = MockServer::start().await;
    let data = payload(1500);
    Mock::given(method("GET"))
        .and(path("/rest/stream"))
        .and(query_param("format", "opus"))
        .and(query_param("maxBitRate", "128"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(data.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let temp_dir = tempfile::TempDir::new().unwrap();
    let mut config = test_config(temp_dir.path());
    config.transcode.format = Some("opus".to_string());
    config.transcode.bitrate = Some(128);

    let url = config
        .transcode
        .source_url(&format!("{}/rest/stream?id=song-6", server.uri()))
        .unwrap();
    let downloader = MediaDownloader::new(config).await.unwrap();

    assert_eq!(
        submit_and_wait(&downloader, DownloadRequest::new("song-6", url)).await,
        WaitResult::Completed
    );
    assert_eq!(
        std::fs::read(music_dir(temp_dir.path()).join("song-6.opus")).unwrap(),
        data
    );
}

#[tokio::test]
async fn test_many_downloads_with_default_pool() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/stream"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(payload(4096))
                .set_delay(Duration::from_millis(50)),
        )
        .expect(5)
        .mount(&server)
        .await;

    let (downloader, _temp_dir) = create_downloader().await;
    let mut events = downloader.subscribe();

    let mut outcomes = Vec::new();
    for i in 0..5 {
        let request = DownloadRequest::new(
            format!("track-{i}"),
            format!("{}/rest/stream?id=track-{i}", server.uri()),
        );
        outcomes.push(downloader.submit(request).await.unwrap());
        assert!(downloader.stats().running <= 3);
    }
    assert_eq!(
        outcomes.iter().filter(|o| **o == SubmitOutcome::Started).count(),
        3
    );

    // Completions arrive in any order
    let mut completed = HashSet::new();
    tokio::time::timeout(TIMEOUT, async {
        while completed.len() < 5 {
            match events.recv().await.unwrap() {
                Event::Complete { id } => {
                    completed.insert(id);
                }
                Event::Failed { id, error_message } => panic!("{id} failed: {error_message}"),
                _ => {}
            }
        }
    })
    .await
    .expect("downloads did not finish in time");

    assert_eq!(downloader.downloaded_ids().await.unwrap().len(), 5);
    assert_eq!(downloader.total_downloaded_size().await.unwrap(), 5 * 4096);
}

#[tokio::test]
async fn test_shutdown_marks_clean_and_rejects_submissions() {
    let (downloader, temp_dir) = create_downloader().await;
    downloader.shutdown().await.unwrap();

    assert!(downloader
        .submit(DownloadRequest::new("late", "http://127.0.0.1:9/late"))
        .await
        .is_err());

    let db = media_dl::Database::new(&temp_dir.path().join("media-dl.db"))
        .await
        .unwrap();
    assert!(!db.was_unclean_shutdown().await.unwrap());
}
