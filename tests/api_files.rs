//! Integration tests for the remote file proxy and uploads

mod common;

use async_trait::async_trait;
use axum::http::{header, HeaderName, Method, StatusCode};
use axum_test::multipart::{MultipartForm, Part};
use common::{
    admin_and_member, authorization, bearer, create_custom_test_app, create_test_app,
    test_config, RecordingGateway,
};
use serde_json::Value;
use std::sync::Arc;
use vitrine::storage::{FileStat, MemoryStorage, SharedStorage, StorageBackend, StorageError};

/// Store that cannot report sizes: `stat` fails or answers 0 bytes, and
/// ranged reads are refused so the proxy has to slice whole downloads
struct UnsizedStorage {
    inner: Arc<MemoryStorage>,
    stat_fails: bool,
}

#[async_trait]
impl StorageBackend for UnsizedStorage {
    async fn stat(&self, _path: &str) -> Result<FileStat, StorageError> {
        if self.stat_fails {
            Err(StorageError::Status {
                status: 405,
                path: "PROPFIND".to_string(),
            })
        } else {
            Ok(FileStat { size: 0 })
        }
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        self.inner.read(path).await
    }

    async fn read_range(
        &self,
        path: &str,
        _start: u64,
        _end: u64,
    ) -> Result<Vec<u8>, StorageError> {
        Err(StorageError::Other(format!("ranged read of {}", path)))
    }

    async fn write(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<(), StorageError> {
        self.inner.write(path, data, content_type).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.inner.delete(path).await
    }

    fn name(&self) -> &'static str {
        "unsized"
    }
}

fn audio_bytes() -> Vec<u8> {
    (0..100u8).collect()
}

fn range() -> HeaderName {
    header::RANGE
}

#[tokio::test]
async fn test_whole_audio_file_advertises_ranges() {
    let app = create_test_app().await;
    app.storage
        .write("podcasts/ep1.mp3", audio_bytes(), "audio/mpeg")
        .await
        .unwrap();

    let response = app.server.get("/api/hidrive/files/podcasts/ep1.mp3").await;
    response.assert_status_ok();
    assert_eq!(response.header(header::CONTENT_TYPE), "audio/mpeg");
    assert_eq!(response.header(header::ACCEPT_RANGES), "bytes");
    assert_eq!(response.header(header::CACHE_CONTROL), "public, max-age=3600");
    assert_eq!(response.as_bytes().to_vec(), audio_bytes());
}

#[tokio::test]
async fn test_audio_range_request() {
    let app = create_test_app().await;
    app.storage
        .write("podcasts/ep1.mp3", audio_bytes(), "audio/mpeg")
        .await
        .unwrap();

    let response = app
        .server
        .get("/api/hidrive/files/podcasts/ep1.mp3")
        .add_header(range(), "bytes=10-19")
        .await;
    response.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header(header::CONTENT_RANGE), "bytes 10-19/100");
    assert_eq!(response.header(header::CONTENT_LENGTH), "10");
    assert_eq!(response.as_bytes().to_vec(), (10..20u8).collect::<Vec<_>>());

    // Open ended ranges are capped at the chunk size (32 in tests)
    let response = app
        .server
        .get("/api/hidrive/files/podcasts/ep1.mp3")
        .add_header(range(), "bytes=50-")
        .await;
    response.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header(header::CONTENT_RANGE), "bytes 50-81/100");

    // Suffix range
    let response = app
        .server
        .get("/api/hidrive/files/podcasts/ep1.mp3")
        .add_header(range(), "bytes=-5")
        .await;
    response.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.header(header::CONTENT_RANGE), "bytes 95-99/100");
    assert_eq!(response.as_bytes().to_vec(), (95..100u8).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_unsatisfiable_range() {
    let app = create_test_app().await;
    app.storage
        .write("podcasts/ep1.mp3", audio_bytes(), "audio/mpeg")
        .await
        .unwrap();

    let response = app
        .server
        .get("/api/hidrive/files/podcasts/ep1.mp3")
        .add_header(range(), "bytes=100-")
        .await;
    response.assert_status(StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.header(header::CONTENT_RANGE), "bytes */100");
}

#[tokio::test]
async fn test_range_ignored_for_images() {
    let app = create_test_app().await;
    app.storage
        .write("images/logo.png", vec![1, 2, 3, 4], "image/png")
        .await
        .unwrap();

    let response = app
        .server
        .get("/api/hidrive/files/images/logo.png")
        .add_header(range(), "bytes=0-1")
        .await;
    response.assert_status_ok();
    assert_eq!(response.header(header::CONTENT_TYPE), "image/png");
    assert_eq!(response.header(header::CACHE_CONTROL), "public, max-age=86400");
    assert_eq!(response.as_bytes().to_vec(), vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_missing_files_degrade_by_kind() {
    let app = create_test_app().await;

    let image = app.server.get("/api/hidrive/files/images/missing.jpg").await;
    image.assert_status_ok();
    assert_eq!(image.header(header::CONTENT_TYPE), "image/svg+xml");
    assert_eq!(image.header(header::CACHE_CONTROL), "no-store");
    assert!(image.text().starts_with("<svg"));

    let audio = app.server.get("/api/hidrive/files/podcasts/missing.mp3").await;
    audio.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(audio.header(header::RETRY_AFTER), "7");
    assert_eq!(audio.json::<Value>()["error"]["code"], "UNAVAILABLE");

    app.server
        .get("/api/hidrive/files/docs/missing.pdf")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_unsafe_path_is_rejected() {
    let app = create_test_app().await;
    app.server
        .get("/api/hidrive/files/images%5C..%5Csecret.png")
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_options_advertises_range_support() {
    let app = create_test_app().await;
    let response = app
        .server
        .method(Method::OPTIONS, "/api/hidrive/files/podcasts/ep1.mp3")
        .await;
    response.assert_status(StatusCode::NO_CONTENT);
    assert_eq!(response.header(header::ALLOW), "GET, HEAD, OPTIONS");
    assert_eq!(response.header(header::ACCEPT_RANGES), "bytes");
    assert_eq!(response.header(header::ACCESS_CONTROL_ALLOW_HEADERS), "Range");
}

#[tokio::test]
async fn test_browser_preflight_reaches_file_proxy() {
    let app = create_test_app().await;
    let response = app
        .server
        .method(Method::OPTIONS, "/api/hidrive/files/podcasts/ep1.mp3")
        .add_header(header::ORIGIN, "http://localhost:3000")
        .add_header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
        .add_header(header::ACCESS_CONTROL_REQUEST_HEADERS, "range")
        .await;
    response.assert_status(StatusCode::NO_CONTENT);
    assert_eq!(response.header(header::ACCEPT_RANGES), "bytes");
    assert_eq!(
        response.header(header::ACCESS_CONTROL_EXPOSE_HEADERS),
        "Content-Range, Accept-Ranges, Content-Length"
    );
    assert_eq!(
        response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        "http://localhost:3000"
    );
}

#[tokio::test]
async fn test_cross_origin_get_exposes_range_headers() {
    let app = create_test_app().await;
    app.storage
        .write("podcasts/ep1.mp3", audio_bytes(), "audio/mpeg")
        .await
        .unwrap();

    let response = app
        .server
        .get("/api/hidrive/files/podcasts/ep1.mp3")
        .add_header(header::ORIGIN, "http://localhost:3000")
        .add_header(range(), "bytes=0-9")
        .await;
    response.assert_status(StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        response.header(header::ACCESS_CONTROL_ALLOW_ORIGIN),
        "http://localhost:3000"
    );
    let exposed = response
        .header(header::ACCESS_CONTROL_EXPOSE_HEADERS)
        .to_str()
        .unwrap()
        .to_lowercase();
    assert!(exposed.contains("content-range"));
}

#[tokio::test]
async fn test_range_falls_back_to_whole_download_without_size() {
    for stat_fails in [true, false] {
        let app = create_custom_test_app(test_config(), RecordingGateway::default(), |inner| -> SharedStorage {
            Arc::new(UnsizedStorage { inner, stat_fails })
        })
        .await;
        app.storage
            .write("podcasts/ep1.mp3", audio_bytes(), "audio/mpeg")
            .await
            .unwrap();

        let response = app
            .server
            .get("/api/hidrive/files/podcasts/ep1.mp3")
            .add_header(range(), "bytes=10-19")
            .await;
        response.assert_status(StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.header(header::CONTENT_RANGE), "bytes 10-19/100");
        assert_eq!(response.as_bytes().to_vec(), (10..20u8).collect::<Vec<_>>());

        // Open ended ranges are still capped at the chunk size
        let response = app
            .server
            .get("/api/hidrive/files/podcasts/ep1.mp3")
            .add_header(range(), "bytes=90-")
            .await;
        response.assert_status(StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.header(header::CONTENT_RANGE), "bytes 90-99/100");
        assert_eq!(response.header(header::CONTENT_LENGTH), "10");
    }
}

#[tokio::test]
async fn test_upload_image_then_serve_through_proxy() {
    let app = create_test_app().await;
    let (admin, _) = admin_and_member(&app.server).await;
    let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3];

    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(png.clone())
            .file_name("logo.png")
            .mime_type("image/png"),
    );
    let response = app
        .server
        .post("/api/v1/admin/upload/image")
        .add_header(authorization(), bearer(&admin))
        .multipart(form)
        .await;
    response.assert_status(StatusCode::CREATED);
    let uploaded: Value = response.json();

    let path = uploaded["path"].as_str().unwrap();
    assert!(path.starts_with("images/"));
    assert!(path.ends_with(".png"));
    assert_eq!(uploaded["size"], png.len());
    assert_eq!(uploaded["content_type"], "image/png");
    assert_eq!(
        app.storage.content_type(path).await.as_deref(),
        Some("image/png")
    );

    let url = uploaded["url"].as_str().unwrap();
    let served = app.server.get(url).await;
    served.assert_status_ok();
    assert_eq!(served.as_bytes().to_vec(), png);
}

#[tokio::test]
async fn test_upload_rejects_wrong_type_and_members() {
    let app = create_test_app().await;
    let (admin, member) = admin_and_member(&app.server).await;

    let form = || {
        MultipartForm::new().add_part(
            "file",
            Part::bytes(b"#!/bin/sh".to_vec())
                .file_name("script.sh")
                .mime_type("application/x-sh"),
        )
    };

    app.server
        .post("/api/v1/admin/upload/audio")
        .add_header(authorization(), bearer(&admin))
        .multipart(form())
        .await
        .assert_status_bad_request();

    app.server
        .post("/api/v1/admin/upload/audio")
        .add_header(authorization(), bearer(&member))
        .multipart(form())
        .await
        .assert_status_forbidden();

    assert!(app.storage.is_empty().await);
}
