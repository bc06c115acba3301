//! Registration API endpoints
//!
//! Authenticated:
//! - POST /api/v1/registrations - Reserve a seat
//! - GET /api/v1/registrations/mine - Caller's registrations
//! - POST /api/v1/registrations/{id}/cancel - Cancel (owner or admin)
//!
//! Admin:
//! - GET /api/v1/admin/registrations?session_id=&status=&payment_status=
//! - GET/PATCH/DELETE /api/v1/admin/registrations/{id}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::{
    CreateRegistrationInput, RegistrationDetail, RegistrationFilter, UpdateRegistrationInput,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_registration))
        .route("/mine", get(list_mine))
        .route("/{id}/cancel", post(cancel_registration))
}

pub fn admin_router() -> Router<AppState> {
    Router::new().route("/", get(list_registrations)).route(
        "/{id}",
        get(get_registration)
            .patch(update_registration)
            .delete(delete_registration),
    )
}

/// POST /api/v1/registrations
async fn create_registration(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CreateRegistrationInput>,
) -> Result<(StatusCode, Json<RegistrationDetail>), ApiError> {
    let detail = state.registration_service.create(&user.0, body).await?;
    Ok((StatusCode::CREATED, Json(detail)))
}

/// GET /api/v1/registrations/mine
async fn list_mine(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Vec<RegistrationDetail>>, ApiError> {
    Ok(Json(state.registration_service.list_mine(&user.0).await?))
}

/// POST /api/v1/registrations/{id}/cancel
async fn cancel_registration(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<RegistrationDetail>, ApiError> {
    Ok(Json(state.registration_service.cancel(&user.0, id).await?))
}

/// GET /api/v1/admin/registrations
async fn list_registrations(
    State(state): State<AppState>,
    Query(filter): Query<RegistrationFilter>,
) -> Result<Json<Vec<RegistrationDetail>>, ApiError> {
    Ok(Json(state.registration_service.list(&filter).await?))
}

/// GET /api/v1/admin/registrations/{id}
async fn get_registration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RegistrationDetail>, ApiError> {
    Ok(Json(state.registration_service.get(id).await?))
}

/// PATCH /api/v1/admin/registrations/{id}
///
/// Confirms invoice registrations, marks payments, or cancels (releasing
/// the seat).
async fn update_registration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateRegistrationInput>,
) -> Result<Json<RegistrationDetail>, ApiError> {
    Ok(Json(state.registration_service.update(id, body).await?))
}

/// DELETE /api/v1/admin/registrations/{id}
async fn delete_registration(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.registration_service.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
