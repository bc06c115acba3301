//! Formation API endpoints
//!
//! Public:
//! - GET /api/v1/formations?category= - Active formations
//! - GET /api/v1/formations/{slug} - Formation with upcoming open sessions
//!
//! Admin:
//! - GET/POST /api/v1/admin/formations
//! - GET/PATCH/DELETE /api/v1/admin/formations/{id}

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState};
use crate::models::{CreateFormationInput, Formation, FormationDetail, UpdateFormationInput};

#[derive(Debug, Deserialize)]
pub struct FormationQuery {
    pub category: Option<String>,
}

pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_formations))
        .route("/{slug}", get(get_formation_by_slug))
}

pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/", get(admin_list_formations).post(create_formation))
        .route(
            "/{id}",
            get(admin_get_formation)
                .patch(update_formation)
                .delete(delete_formation),
        )
}

/// GET /api/v1/formations
async fn list_formations(
    State(state): State<AppState>,
    Query(query): Query<FormationQuery>,
) -> Result<Json<Vec<Formation>>, ApiError> {
    let formations = state
        .catalog_service
        .list_formations(query.category.as_deref())
        .await?;
    Ok(Json(formations))
}

/// GET /api/v1/formations/{slug}
async fn get_formation_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<FormationDetail>, ApiError> {
    Ok(Json(state.catalog_service.get_formation_by_slug(&slug).await?))
}

/// GET /api/v1/admin/formations
async fn admin_list_formations(
    State(state): State<AppState>,
) -> Result<Json<Vec<Formation>>, ApiError> {
    Ok(Json(state.catalog_service.list_all_formations().await?))
}

/// GET /api/v1/admin/formations/{id}
async fn admin_get_formation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Formation>, ApiError> {
    Ok(Json(state.catalog_service.get_formation(id).await?))
}

/// POST /api/v1/admin/formations
async fn create_formation(
    State(state): State<AppState>,
    Json(body): Json<CreateFormationInput>,
) -> Result<(StatusCode, Json<Formation>), ApiError> {
    let formation = state.catalog_service.create_formation(body).await?;
    Ok((StatusCode::CREATED, Json(formation)))
}

/// PATCH /api/v1/admin/formations/{id}
async fn update_formation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateFormationInput>,
) -> Result<Json<Formation>, ApiError> {
    Ok(Json(state.catalog_service.update_formation(id, body).await?))
}

/// DELETE /api/v1/admin/formations/{id}
///
/// 409 while the formation still has sessions.
async fn delete_formation(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.catalog_service.delete_formation(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
