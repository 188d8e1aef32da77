use cultured_downloader::config::settings::SETTINGS_FILE;
use cultured_downloader::core::http::{HttpClient, RetryPolicy};
use cultured_downloader::{
    CancellationToken, CulturedDownloader, LocalStorage, QueueStatus, RequestArgs, RequestOutcome,
    SettingsStore,
};
use httpmock::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn downloader(data_dir: &TempDir, settings_toml: &str) -> CulturedDownloader {
    std::fs::write(data_dir.path().join(SETTINGS_FILE), settings_toml).unwrap();
    let storage = Arc::new(LocalStorage::new(data_dir.path()));
    let settings = Arc::new(SettingsStore::load(storage).await.unwrap());

    let http = HttpClient::new(settings.as_ref()).unwrap();
    assert_eq!(http.retry_policy().max_retries, 1);

    let http = http.with_retry_policy(RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(20),
    });
    CulturedDownloader::from_parts(settings, http)
}

const SETTINGS: &str = r#"
[general]
max_concurrent_downloads = 2
request_timeout_secs = 5
max_retries = 1
"#;

#[tokio::test]
async fn test_queue_downloads_then_skips_on_rerun() {
    let data_dir = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let server = MockServer::start_async().await;

    let image = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/uploads/cover_art.png")
                .header("referer", "https://fantia.jp");
            then.status(200).body("png-bytes");
        })
        .await;
    let archive = server
        .mock_async(|when, then| {
            when.method(GET).path("/uploads/bundle.zip");
            then.status(200).body("zip-bytes-here");
        })
        .await;

    let app = downloader(&data_dir, SETTINGS).await;
    let requests = || {
        vec![
            RequestArgs::get(server.url("/uploads/cover_art.png"), output.path())
                .with_header("Referer", "https://fantia.jp"),
            RequestArgs::get(server.url("/uploads/bundle.zip"), output.path()),
        ]
    };

    let first = app
        .new_download_queue(CancellationToken::new(), requests())
        .await
        .unwrap();
    let snapshot = app.wait_for_queue(first).await.unwrap();

    assert_eq!(snapshot.status, QueueStatus::Completed);
    assert_eq!(snapshot.completed, 2);
    assert_eq!(snapshot.bytes_downloaded, 9 + 14);
    assert_eq!(
        std::fs::read_to_string(output.path().join("cover_art.png")).unwrap(),
        "png-bytes"
    );
    assert!(output.path().join("bundle.zip").exists());

    let second = app
        .new_download_queue(CancellationToken::new(), requests())
        .await
        .unwrap();
    assert_ne!(first, second);
    let snapshot = app.wait_for_queue(second).await.unwrap();

    assert_eq!(snapshot.status, QueueStatus::Completed);
    assert_eq!(snapshot.skipped, 2);
    image.assert_hits_async(1).await;
    archive.assert_hits_async(1).await;

    assert_eq!(app.list_queues().len(), 2);
    assert_eq!(app.clear_finished_queues(), 2);
    assert!(app.list_queues().is_empty());
}

#[tokio::test]
async fn test_cancel_queue_by_id() {
    let data_dir = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(GET).path_contains("/slow/");
            then.status(200).delay(Duration::from_secs(10)).body("late");
        })
        .await;

    let app = downloader(&data_dir, SETTINGS).await;
    let requests = (1..=5)
        .map(|i| RequestArgs::get(server.url(format!("/slow/{}.bin", i)), output.path()))
        .collect();

    let id = app
        .new_download_queue(CancellationToken::new(), requests)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(app.queue_status(id).unwrap().status, QueueStatus::Running);

    app.cancel_queue(id).await.unwrap();
    let snapshot = tokio::time::timeout(Duration::from_secs(5), app.wait_for_queue(id))
        .await
        .expect("queue should stop promptly")
        .unwrap();

    assert_eq!(snapshot.status, QueueStatus::Cancelled);
    assert_eq!(snapshot.cancelled, 5);
    assert!(snapshot
        .outcomes
        .iter()
        .all(|o| matches!(o, RequestOutcome::Cancelled { .. })));
    assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_partial_failure_reports_each_request() {
    let data_dir = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let server = MockServer::start_async().await;

    server
        .mock_async(|when, then| {
            when.method(GET).path("/ok.bin");
            then.status(200).body("ok");
        })
        .await;
    let flaky = server
        .mock_async(|when, then| {
            when.method(GET).path("/down.bin");
            then.status(503);
        })
        .await;

    let app = downloader(&data_dir, SETTINGS).await;
    let id = app
        .new_download_queue(
            CancellationToken::new(),
            vec![
                RequestArgs::get(server.url("/ok.bin"), output.path()),
                RequestArgs::get(server.url("/down.bin"), output.path()),
            ],
        )
        .await
        .unwrap();
    let snapshot = app.wait_for_queue(id).await.unwrap();

    assert_eq!(snapshot.status, QueueStatus::Failed);
    assert_eq!(snapshot.completed, 1);
    assert_eq!(snapshot.failed, 1);
    // One initial attempt plus one retry.
    flaky.assert_hits_async(2).await;
    assert!(!output.path().join("down.bin").exists());
    // Only the finished file remains; no temp files are left behind.
    assert_eq!(std::fs::read_dir(output.path()).unwrap().count(), 1);
}
