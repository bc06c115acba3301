//! Admin API endpoints
//!
//! - GET /api/v1/admin/dashboard - Site overview and request statistics

use axum::{extract::State, routing::get, Json, Router};

use crate::api::middleware::{ApiError, AppState};
use crate::services::DashboardSummary;

pub fn router() -> Router<AppState> {
    Router::new().route("/dashboard", get(get_dashboard))
}

/// GET /api/v1/admin/dashboard
///
/// Admin access is enforced by the access gate.
async fn get_dashboard(State(state): State<AppState>) -> Result<Json<DashboardSummary>, ApiError> {
    let summary = state
        .dashboard_service
        .summary(state.request_stats.snapshot())
        .await
        .map_err(|e| ApiError::internal("Failed to build dashboard", e))?;
    Ok(Json(summary))
}
