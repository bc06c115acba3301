//! Upload API endpoints
//!
//! - POST /api/v1/admin/upload/image
//! - POST /api/v1/admin/upload/audio
//!
//! Multipart with a single field named `file`. Files are renamed to a UUID
//! and written to the remote store; the response links to the file proxy.

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::api::middleware::{ApiError, AppState};
use crate::config::UploadConfig;
use crate::media;

/// Response for successful upload
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    pub path: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadKind {
    Image,
    Audio,
}

impl UploadKind {
    fn is_allowed(self, config: &UploadConfig, content_type: &str) -> bool {
        match self {
            UploadKind::Image => config.is_image_allowed(content_type),
            UploadKind::Audio => config.is_audio_allowed(content_type),
        }
    }

    fn max_size(self, config: &UploadConfig) -> u64 {
        match self {
            UploadKind::Image => config.max_image_size,
            UploadKind::Audio => config.max_audio_size,
        }
    }

    fn allowed_types(self, config: &UploadConfig) -> &[String] {
        match self {
            UploadKind::Image => &config.image_types,
            UploadKind::Audio => &config.audio_types,
        }
    }
}

/// Build the upload router. The body limit covers the largest upload plus
/// multipart framing.
pub fn router(config: &UploadConfig) -> Router<AppState> {
    let limit = config.max_image_size.max(config.max_audio_size) + 64 * 1024;
    Router::new()
        .route("/image", post(upload_image))
        .route("/audio", post(upload_audio))
        .layer(DefaultBodyLimit::max(
            usize::try_from(limit).unwrap_or(usize::MAX),
        ))
}

/// POST /api/v1/admin/upload/image
async fn upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let dir = state.storage_config.image_dir.clone();
    store_upload(&state, multipart, UploadKind::Image, &dir).await
}

/// POST /api/v1/admin/upload/audio
async fn upload_audio(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let dir = state.storage_config.audio_dir.clone();
    store_upload(&state, multipart, UploadKind::Audio, &dir).await
}

async fn store_upload(
    state: &AppState,
    mut multipart: Multipart,
    kind: UploadKind,
    dir: &str,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let config = &state.upload_config;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::validation_error(format!("Failed to read multipart: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let file_name = field.file_name().map(|s| s.to_string());
        let content_type = field
            .content_type()
            .map(|s| s.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        if !kind.is_allowed(config, &content_type) {
            return Err(ApiError::validation_error(format!(
                "Invalid file type: {}. Allowed types: {:?}",
                content_type,
                kind.allowed_types(config)
            )));
        }

        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::validation_error(format!("Failed to read file: {}", e)))?;

        let max_size = kind.max_size(config);
        if data.is_empty() {
            return Err(ApiError::validation_error("File is empty"));
        }
        if data.len() as u64 > max_size {
            return Err(ApiError::validation_error(format!(
                "File too large. Maximum size: {} bytes ({} MB)",
                max_size,
                max_size / 1024 / 1024
            )));
        }

        let ext = get_extension(file_name.as_deref(), &content_type);
        let path = format!("{}/{}.{}", dir.trim_matches('/'), Uuid::new_v4(), ext);
        let size = data.len() as u64;

        state
            .storage
            .write(&path, data.to_vec(), &content_type)
            .await
            .map_err(|e| {
                tracing::error!(path = %path, error = %e, "Upload to remote store failed");
                ApiError::unavailable("Remote store is unavailable, try again later")
            })?;

        tracing::info!(path = %path, size, "File uploaded");
        return Ok((
            StatusCode::CREATED,
            Json(UploadResponse {
                url: media::proxy_url(&path),
                path,
                size,
                content_type,
            }),
        ));
    }

    Err(ApiError::validation_error("No file provided"))
}

/// Extension from the MIME type, else a short alphanumeric one from the
/// uploaded file name
fn get_extension(filename: Option<&str>, content_type: &str) -> String {
    if let Some(ext) = media::extension_for(content_type) {
        return ext.to_string();
    }
    filename
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| {
            !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| "bin".to_string())
}
