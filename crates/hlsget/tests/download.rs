use std::path::PathBuf;

use hlsget::{Downloader, HlsgetError, PathUrl, MAX_CONSECUTIVE_ERRORS};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A body comfortably above the 1 KiB verification threshold.
fn segment_body(seed: u8) -> Vec<u8> {
    vec![seed; 4096]
}

async fn mock_segment(server: &MockServer, mock_path: &str, body: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(mock_path.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body))
        .mount(server)
        .await;
}

fn jobs_for(server: &MockServer, dir: &std::path::Path, names: &[&str]) -> Vec<PathUrl> {
    names
        .iter()
        .map(|name| PathUrl {
            path: dir.join(name),
            url: format!("{}/{name}", server.uri()),
        })
        .collect()
}

#[tokio::test]
async fn fetch_many_downloads_everything() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_segment(&server, "/seg-1.ts", segment_body(1)).await;
    mock_segment(&server, "/seg-2.ts", segment_body(2)).await;
    mock_segment(&server, "/seg-3.ts", segment_body(3)).await;

    let dir = tempfile::tempdir()?;
    let jobs = jobs_for(&server, dir.path(), &["seg-1.ts", "seg-2.ts", "seg-3.ts"]);

    let results = Downloader::new().fetch_many(jobs).await;

    assert!(results.errors.is_empty(), "{:?}", results.errors);
    assert_eq!(results.succeeded.len(), 3);
    for segment in &results.succeeded {
        assert_eq!(std::fs::metadata(segment)?.len(), 4096);
    }
    Ok(())
}

#[tokio::test]
async fn transport_failures_are_collected_not_fatal() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_segment(&server, "/good-1.ts", segment_body(1)).await;
    Mock::given(method("GET"))
        .and(path("/bad.ts"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    mock_segment(&server, "/good-2.ts", segment_body(2)).await;

    let dir = tempfile::tempdir()?;
    let jobs = jobs_for(&server, dir.path(), &["good-1.ts", "bad.ts", "good-2.ts"]);

    let results = Downloader::new().fetch_many(jobs).await;

    assert_eq!(results.succeeded.len(), 2);
    assert_eq!(results.errors.len(), 1);
    assert!(results.errors[0].url.ends_with("/bad.ts"));
    assert!(results.errors[0].message.contains("500"));
    Ok(())
}

#[tokio::test]
async fn small_bodies_fail_verification() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_segment(
        &server,
        "/denied.ts",
        b"<html><title>Access denied</title></html>".to_vec(),
    )
    .await;
    mock_segment(&server, "/limited.ts", b"error code: 1015".to_vec()).await;
    mock_segment(&server, "/tiny.ts", b"stub".to_vec()).await;

    let dir = tempfile::tempdir()?;
    let jobs = jobs_for(&server, dir.path(), &["denied.ts", "limited.ts", "tiny.ts"]);

    let results = Downloader::new().fetch_many(jobs).await;

    assert!(results.succeeded.is_empty());
    assert_eq!(results.errors.len(), 3);

    let message_for = |name: &str| {
        results
            .errors
            .iter()
            .find(|error| error.url.ends_with(name))
            .map(|error| error.message.clone())
            .unwrap()
    };
    assert_eq!(message_for("/denied.ts"), "Access denied");
    assert_eq!(message_for("/limited.ts"), "rate limit exceeded");
    assert_eq!(message_for("/tiny.ts"), "unknown error");
    Ok(())
}

#[tokio::test]
async fn breaker_stops_after_consecutive_errors() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    // nothing mounted: every request is answered with 404

    let dir = tempfile::tempdir()?;
    let names: Vec<String> = (0..12).map(|i| format!("seg-{i}.ts")).collect();
    let name_refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let jobs = jobs_for(&server, dir.path(), &name_refs);
    let total = jobs.len();

    let results = Downloader::new().fetch_many(jobs).await;

    assert!(results.succeeded.is_empty());
    assert_eq!(results.errors.len(), MAX_CONSECUTIVE_ERRORS);
    assert!(results.succeeded.len() + results.errors.len() < total);
    Ok(())
}

#[tokio::test]
async fn a_success_resets_the_breaker() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    // four failing segments, one good one, four more failing: the
    // engine must reach the end because no five errors are consecutive.
    // The second failing batch answers slowly so the good transfer is
    // guaranteed to drain (and reset the counter) before any of them.
    for i in 0..4 {
        mock_segment(&server, &format!("/tiny-a{i}.ts"), b"stub".to_vec()).await;
        Mock::given(method("GET"))
            .and(path(format!("/tiny-b{i}.ts")))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"stub".to_vec())
                    .set_delay(std::time::Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
    }
    mock_segment(&server, "/good.ts", segment_body(7)).await;

    let dir = tempfile::tempdir()?;
    let names = [
        "tiny-a0.ts",
        "tiny-a1.ts",
        "tiny-a2.ts",
        "tiny-a3.ts",
        "good.ts",
        "tiny-b0.ts",
        "tiny-b1.ts",
        "tiny-b2.ts",
        "tiny-b3.ts",
    ];
    let jobs = jobs_for(&server, dir.path(), &names);
    let total = jobs.len();

    let results = Downloader::new().fetch_many(jobs).await;

    assert_eq!(results.succeeded.len() + results.errors.len(), total);
    assert_eq!(results.succeeded.len(), 1);
    assert_eq!(results.errors.len(), 8);
    Ok(())
}

#[tokio::test]
async fn setup_failures_advance_past_unwritable_destinations() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_segment(&server, "/seg-1.ts", segment_body(1)).await;

    let dir = tempfile::tempdir()?;
    let jobs = vec![
        PathUrl {
            path: dir.path().join("missing-subdir").join("seg-0.ts"),
            url: format!("{}/seg-0.ts", server.uri()),
        },
        PathUrl {
            path: dir.path().join("seg-1.ts"),
            url: format!("{}/seg-1.ts", server.uri()),
        },
    ];

    let results = Downloader::new().fetch_many(jobs).await;

    assert_eq!(results.succeeded.len(), 1);
    assert_eq!(results.errors.len(), 1);
    assert!(results.errors[0].message.contains("for writing"));
    Ok(())
}

#[tokio::test]
async fn fetch_to_buffer_returns_the_body() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
        .mount(&server)
        .await;

    let downloader = Downloader::new();
    let buffer = downloader
        .fetch_to_buffer(&format!("{}/playlist.m3u8", server.uri()))
        .await?;
    assert_eq!(buffer, b"#EXTM3U\n");

    let missing = downloader
        .fetch_to_buffer(&format!("{}/other.m3u8", server.uri()))
        .await;
    assert!(matches!(missing, Err(HlsgetError::HttpStatus(status)) if status.as_u16() == 404));
    Ok(())
}

#[tokio::test]
async fn fetch_to_file_streams_to_disk() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    mock_segment(&server, "/seg.ts", segment_body(9)).await;

    let dir = tempfile::tempdir()?;
    let destination = dir.path().join("seg.ts");

    let downloader = Downloader::new();
    let written = downloader
        .fetch_to_file(&destination, &format!("{}/seg.ts", server.uri()))
        .await?;

    assert_eq!(written, destination);
    assert_eq!(std::fs::read(&destination)?, segment_body(9));
    Ok(())
}

#[tokio::test]
async fn fetch_to_file_fails_before_the_request_on_bad_destination() -> anyhow::Result<()> {
    let server = MockServer::start().await;

    let result = Downloader::new()
        .fetch_to_file(
            &PathBuf::from("/nonexistent-dir/seg.ts"),
            &format!("{}/seg.ts", server.uri()),
        )
        .await;

    assert!(matches!(result, Err(HlsgetError::Io(_))));
    assert!(server.received_requests().await.unwrap().is_empty());
    Ok(())
}
