//! Podcast API endpoints
//!
//! Public:
//! - GET /api/v1/podcasts
//! - GET /api/v1/podcasts/{slug} - Podcast with published episodes
//! - POST /api/v1/podcasts/episodes/{id}/play - Count one play
//!
//! Admin:
//! - GET/POST /api/v1/admin/podcasts
//! - GET/PATCH/DELETE /api/v1/admin/podcasts/{id}
//! - GET/POST /api/v1/admin/podcasts/{id}/episodes
//! - PATCH/DELETE /api/v1/admin/episodes/{id}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{
    CreateEpisodeInput, CreatePodcastInput, EpisodeView, PlayCount, Podcast, PodcastDetail,
    UpdateEpisodeInput, UpdatePodcastInput,
};

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_podcasts))
        .route("/{slug}", get(get_podcast_by_slug))
        .route("/episodes/{id}/play", post(record_play))
}

pub fn admin_podcast_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_podcasts).post(create_podcast))
        .route(
            "/{id}",
            get(get_podcast).patch(update_podcast).delete(delete_podcast),
        )
        .route("/{id}/episodes", get(list_episodes).post(create_episode))
}

pub fn admin_episode_router() -> Router<AppState> {
    Router::new().route("/{id}", patch(update_episode).delete(delete_episode))
}

/// GET /api/v1/podcasts
async fn list_podcasts(State(state): State<AppState>) -> Result<Json<Vec<Podcast>>, ApiError> {
    Ok(Json(state.podcast_service.list().await?))
}

/// GET /api/v1/podcasts/{slug}
async fn get_podcast_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<PodcastDetail>, ApiError> {
    Ok(Json(state.podcast_service.get_by_slug(&slug).await?))
}

/// POST /api/v1/podcasts/episodes/{id}/play
async fn record_play(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PlayCount>, ApiError> {
    Ok(Json(state.podcast_service.record_play(id).await?))
}

/// GET /api/v1/admin/podcasts/{id}
async fn get_podcast(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<PodcastDetail>, ApiError> {
    Ok(Json(state.podcast_service.get(id).await?))
}

/// POST /api/v1/admin/podcasts
async fn create_podcast(
    State(state): State<AppState>,
    Json(body): Json<CreatePodcastInput>,
) -> Result<(StatusCode, Json<Podcast>), ApiError> {
    let podcast = state.podcast_service.create(body).await?;
    Ok((StatusCode::CREATED, Json(podcast)))
}

/// PATCH /api/v1/admin/podcasts/{id}
async fn update_podcast(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdatePodcastInput>,
) -> Result<Json<Podcast>, ApiError> {
    Ok(Json(state.podcast_service.update(id, body).await?))
}

/// DELETE /api/v1/admin/podcasts/{id}
async fn delete_podcast(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.podcast_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/admin/podcasts/{id}/episodes
async fn list_episodes(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<EpisodeView>>, ApiError> {
    Ok(Json(state.podcast_service.list_episodes(id).await?))
}

/// POST /api/v1/admin/podcasts/{id}/episodes
async fn create_episode(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<CreateEpisodeInput>,
) -> Result<(StatusCode, Json<EpisodeView>), ApiError> {
    let episode = state.podcast_service.create_episode(id, body).await?;
    Ok((StatusCode::CREATED, Json(episode)))
}

/// PATCH /api/v1/admin/episodes/{id}
async fn update_episode(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateEpisodeInput>,
) -> Result<Json<EpisodeView>, ApiError> {
    Ok(Json(state.podcast_service.update_episode(id, body).await?))
}

/// DELETE /api/v1/admin/episodes/{id}
async fn delete_episode(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.podcast_service.delete_episode(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
