//! Remote file proxy
//!
//! - GET /api/hidrive/files/{*path} - Stream a file from the remote store
//! - OPTIONS /api/hidrive/files/{*path} - Advertise Range support
//!
//! Audio honours `Range` so players can scrub; each partial response is
//! capped at the configured chunk size. When the store fails or times out,
//! images degrade to a placeholder, audio answers 503 with `Retry-After`
//! and everything else is a 404.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;
use tower_http::cors::CorsLayer;

use crate::api::middleware::{ApiError, AppState};
use crate::media::{self, ByteRange, MediaKind};
use crate::storage::StorageError;

const IMAGE_CACHE_CONTROL: &str = "public, max-age=86400";
const AUDIO_CACHE_CONTROL: &str = "public, max-age=3600";
const OTHER_CACHE_CONTROL: &str = "public, max-age=300";

const PLACEHOLDER_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300" viewBox="0 0 400 300"><rect width="400" height="300" fill="#e5e7eb"/><path d="M150 200l40-50 30 35 20-25 40 40z" fill="#9ca3af"/><circle cx="250" cy="115" r="15" fill="#9ca3af"/></svg>"##;

/// `cors` wraps GET only; preflight requests are answered by [`file_options`].
pub fn router(cors: CorsLayer, allow_origin: Option<HeaderValue>) -> Router<AppState> {
    Router::new().route(
        "/{*path}",
        get(get_file)
            .layer::<_, Infallible>(cors)
            .options(move || file_options(allow_origin.clone())),
    )
}

/// OPTIONS /api/hidrive/files/{*path}
async fn file_options(allow_origin: Option<HeaderValue>) -> Response {
    let mut response = (
        StatusCode::NO_CONTENT,
        [
            (header::ALLOW, "GET, HEAD, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_METHODS, "GET, HEAD, OPTIONS"),
            (header::ACCESS_CONTROL_ALLOW_HEADERS, "Range"),
            (
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                "Content-Range, Accept-Ranges, Content-Length",
            ),
            (header::ACCEPT_RANGES, "bytes"),
        ],
    )
        .into_response();
    if let Some(origin) = allow_origin {
        response
            .headers_mut()
            .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    }
    response
}

/// GET /api/hidrive/files/{*path}
async fn get_file(
    State(state): State<AppState>,
    Path(raw_path): Path<String>,
    headers: HeaderMap,
) -> Response {
    let path = match media::normalize_path(&raw_path) {
        Some(path) => path,
        None => {
            return ApiError::validation_error(format!("Invalid file path '{}'", raw_path))
                .into_response()
        }
    };

    let content_type = media::content_type_for(&path);
    let kind = MediaKind::from_content_type(content_type);
    let config = &state.storage_config;
    let timeout = Duration::from_secs(match kind {
        MediaKind::Audio => config.audio_timeout_seconds,
        _ => config.timeout_seconds,
    });

    let range = match kind {
        MediaKind::Audio => headers
            .get(header::RANGE)
            .and_then(|h| h.to_str().ok())
            .and_then(media::parse_range),
        _ => None,
    };

    let result = match range {
        Some(range) => serve_range(&state, &path, content_type, range, timeout).await,
        None => serve_whole(&state, &path, content_type, kind, timeout).await,
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "Remote file read failed");
            failure_response(kind, config.retry_after_seconds)
        }
    }
}

async fn serve_whole(
    state: &AppState,
    path: &str,
    content_type: &'static str,
    kind: MediaKind,
    timeout: Duration,
) -> Result<Response, StorageError> {
    let data = with_timeout(timeout, state.storage.read(path)).await?;

    let cache_control = match kind {
        MediaKind::Image => IMAGE_CACHE_CONTROL,
        MediaKind::Audio => AUDIO_CACHE_CONTROL,
        MediaKind::Other => OTHER_CACHE_CONTROL,
    };

    let mut response = (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, cache_control),
        ],
        data,
    )
        .into_response();
    if kind == MediaKind::Audio {
        response
            .headers_mut()
            .insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    }
    Ok(response)
}

async fn serve_range(
    state: &AppState,
    path: &str,
    content_type: &'static str,
    range: ByteRange,
    timeout: Duration,
) -> Result<Response, StorageError> {
    let chunk = state.storage_config.chunk_size;

    // Some stores report no size; download the file once and slice it here
    let (size, whole) = match with_timeout(timeout, state.storage.stat(path)).await {
        Ok(stat) if stat.size > 0 => (stat.size, None),
        stat => {
            if let Err(e) = stat {
                tracing::debug!(path = %path, error = %e, "stat failed, downloading whole file");
            }
            let data = with_timeout(timeout, state.storage.read(path)).await?;
            (data.len() as u64, Some(data))
        }
    };

    let resolved = match media::resolve_range(range, size, chunk) {
        Ok(resolved) => resolved,
        Err(unsatisfiable) => {
            return Ok((
                StatusCode::RANGE_NOT_SATISFIABLE,
                [
                    (header::CONTENT_RANGE, unsatisfiable.content_range()),
                    (header::ACCEPT_RANGES, "bytes".to_string()),
                ],
            )
                .into_response())
        }
    };

    let body = match whole {
        Some(data) => {
            crate::storage::slice_range(&data, path, resolved.start, resolved.end)?
        }
        None => {
            with_timeout(
                timeout,
                state.storage.read_range(path, resolved.start, resolved.end),
            )
            .await?
        }
    };

    Ok((
        StatusCode::PARTIAL_CONTENT,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CACHE_CONTROL, AUDIO_CACHE_CONTROL.to_string()),
            (header::ACCEPT_RANGES, "bytes".to_string()),
            (header::CONTENT_RANGE, resolved.content_range(size)),
            (header::CONTENT_LENGTH, body.len().to_string()),
        ],
        body,
    )
        .into_response())
}

async fn with_timeout<T>(
    duration: Duration,
    future: impl Future<Output = Result<T, StorageError>>,
) -> Result<T, StorageError> {
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| StorageError::Other(format!("timed out after {:?}", duration)))?
}

fn failure_response(kind: MediaKind, retry_after: u64) -> Response {
    match kind {
        MediaKind::Image => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "image/svg+xml"),
                (header::CACHE_CONTROL, "no-store"),
            ],
            PLACEHOLDER_SVG,
        )
            .into_response(),
        MediaKind::Audio => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::RETRY_AFTER, retry_after.to_string())],
            Json(ApiError::unavailable("Audio file is temporarily unavailable")),
        )
            .into_response(),
        MediaKind::Other => ApiError::not_found("File not found").into_response(),
    }
}
