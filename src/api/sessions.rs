//! Training session API endpoints
//!
//! Public:
//! - GET /api/v1/sessions/upcoming?formation_id=
//! - GET /api/v1/sessions/{id}
//!
//! Admin:
//! - GET/POST /api/v1/admin/sessions
//! - GET/PATCH/DELETE /api/v1/admin/sessions/{id}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::models::{
    CreateSessionInput, SessionWithFormation, TrainingSession, UpdateSessionInput,
};

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    pub formation_id: Option<i64>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/upcoming", get(list_upcoming))
        .route("/{id}", get(get_public_session))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_sessions).post(create_session))
        .route(
            "/{id}",
            get(get_session).patch(update_session).delete(delete_session),
        )
}

/// GET /api/v1/sessions/upcoming
async fn list_upcoming(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<SessionWithFormation>>, ApiError> {
    Ok(Json(
        state
            .catalog_service
            .list_upcoming_sessions(query.formation_id)
            .await?,
    ))
}

/// GET /api/v1/sessions/{id}
async fn get_public_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SessionWithFormation>, ApiError> {
    Ok(Json(state.catalog_service.get_public_session(id).await?))
}

/// GET /api/v1/admin/sessions
async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Vec<TrainingSession>>, ApiError> {
    Ok(Json(state.catalog_service.list_sessions(query.formation_id).await?))
}

/// GET /api/v1/admin/sessions/{id}
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<TrainingSession>, ApiError> {
    Ok(Json(state.catalog_service.get_session(id).await?))
}

/// POST /api/v1/admin/sessions
async fn create_session(
    State(state): State<AppState>,
    Json(body): Json<CreateSessionInput>,
) -> Result<(StatusCode, Json<TrainingSession>), ApiError> {
    let session = state.catalog_service.create_session(body).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// PATCH /api/v1/admin/sessions/{id}
async fn update_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateSessionInput>,
) -> Result<Json<TrainingSession>, ApiError> {
    Ok(Json(state.catalog_service.update_session(id, body).await?))
}

/// DELETE /api/v1/admin/sessions/{id}
///
/// 409 while active registrations hold seats.
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.catalog_service.delete_session(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
