//! HTTP source contract: feed URL layout, error mapping and package download.

use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use updraft::progress::ProgressSink;
use updraft::sources::AutoSource;
use updraft::{HttpSource, Manifest, UpdateCheck, UpdateError, UpdateManager, UpdateOptions, UpdateSource};
use wiremock::matchers::{header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{Fixture, publish_full};

fn app() -> Manifest {
    Manifest {
        id: "AvaloniaCrossPlat".into(),
        version: semver::Version::new(1, 0, 0),
        ..Default::default()
    }
}

fn no_progress() -> ProgressSink {
    Arc::new(|_| {})
}

#[tokio::test]
async fn feed_request_carries_version_and_id() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases/releases.stable.json"))
        .and(query_param("localVersion", "1.0.0"))
        .and(query_param("id", "AvaloniaCrossPlat"))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Assets": [{
                "PackageId": "AvaloniaCrossPlat",
                "Version": "1.0.11",
                "Type": "full",
                "FileName": "AvaloniaCrossPlat-1.0.11-full.nupkg",
                "Size": 1024
            }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let source = HttpSource::new(&format!("{}/releases", server.uri())).unwrap();
    let feed = tokio::task::spawn_blocking(move || source.get_release_feed("stable", &app()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(feed.assets.len(), 1);
    assert_eq!(feed.assets[0].version, "1.0.11");
    assert!(feed.assets[0].is_full());
}

#[tokio::test]
async fn missing_feed_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let source = HttpSource::new(&server.uri()).unwrap();
    let result = tokio::task::spawn_blocking(move || source.get_release_feed("stable", &app()))
        .await
        .unwrap();
    assert!(matches!(result, Err(UpdateError::FeedUnavailable(_))));
}

#[tokio::test]
async fn malformed_feed_is_a_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let source = HttpSource::new(&server.uri()).unwrap();
    let result = tokio::task::spawn_blocking(move || source.get_release_feed("stable", &app()))
        .await
        .unwrap();
    assert!(matches!(result, Err(UpdateError::Parse(_))));
}

#[tokio::test]
async fn failed_package_download_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("pkg.nupkg");
    let source = HttpSource::new(&server.uri()).unwrap();
    let asset = updraft::Asset {
        file_name: "pkg.nupkg".into(),
        ..Default::default()
    };
    let target = dest.clone();
    let result = tokio::task::spawn_blocking(move || {
        source.download_release_entry(&asset, &target, &no_progress(), &CancellationToken::new())
    })
    .await
    .unwrap();
    assert!(matches!(result, Err(UpdateError::DownloadFailed(_))));
    assert!(!dest.exists());
}

#[tokio::test]
async fn full_update_over_http() {
    let fx = Fixture::new("AvaloniaCrossPlat", "1.0.0");
    let target = publish_full(&fx.releases, "AvaloniaCrossPlat", "1.0.11");
    let bytes = std::fs::read(fx.releases.join(&target.file_name)).unwrap();

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases.stable.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "Assets": [target.clone()] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{}", target.file_name)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .expect(1)
        .mount(&server)
        .await;

    let options = UpdateOptions {
        explicit_channel: Some("stable".into()),
        ..Default::default()
    };
    let mgr = UpdateManager::new(
        AutoSource::new(&server.uri()).unwrap(),
        Some(options),
        Some(fx.locator.clone()),
    )
    .unwrap();

    let info = match mgr.check_for_updates_async().await.unwrap() {
        UpdateCheck::UpdateAvailable(info) => info,
        other => panic!("expected an update, got {other:?}"),
    };
    mgr.download_updates_async(info, None, CancellationToken::new())
        .await
        .unwrap();
    assert!(fx.packages().join(&target.file_name).is_file());
}

#[tokio::test]
async fn feed_with_escaping_file_name_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases.stable.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Assets": [{
                "PackageId": "AvaloniaCrossPlat",
                "Version": "1.1.0",
                "Type": "Full",
                "FileName": "../escaped-1.1.0-full.nupkg"
            }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/escaped-1.1.0-full.nupkg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 16]))
        .expect(0)
        .mount(&server)
        .await;

    let fx = Fixture::new("AvaloniaCrossPlat", "1.0.0");
    let options = UpdateOptions {
        explicit_channel: Some("stable".into()),
        ..Default::default()
    };
    let mgr = UpdateManager::new(
        AutoSource::new(&server.uri()).unwrap(),
        Some(options),
        Some(fx.locator.clone()),
    )
    .unwrap();

    let err = mgr.check_for_updates_async().await.unwrap_err();
    assert!(matches!(err, UpdateError::Parse(_)), "{err:?}");
    let outside = fx.packages().parent().unwrap().join("escaped-1.1.0-full.nupkg");
    assert!(!outside.exists());
}

#[tokio::test]
async fn feed_larger_than_ten_megabytes_is_read_in_full() {
    let notes = "x".repeat(11 * 1024 * 1024);
    let body = json!({
        "Assets": [{
            "PackageId": "AvaloniaCrossPlat",
            "Version": "1.0.11",
            "Type": "Full",
            "FileName": "AvaloniaCrossPlat-1.0.11-full.nupkg",
            "NotesMarkdown": notes
        }]
    })
    .to_string();
    assert!(body.len() > 10 * 1024 * 1024);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/releases.stable.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let source = HttpSource::new(&server.uri()).unwrap();
    let feed = tokio::task::spawn_blocking(move || source.get_release_feed("stable", &app()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(feed.assets.len(), 1);
    assert_eq!(feed.assets[0].notes_markdown.len(), 11 * 1024 * 1024);
}
