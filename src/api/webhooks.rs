//! Payment webhook endpoint
//!
//! - POST /api/v1/webhooks/stripe
//!
//! The raw body is needed for signature verification, so it is taken as
//! bytes rather than JSON.

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Serialize;

use crate::api::middleware::{ApiError, AppState};
use crate::services::webhook::WebhookOutcome;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/stripe", post(stripe_webhook))
}

/// POST /api/v1/webhooks/stripe
async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, ApiError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());

    let outcome = state
        .webhook_service
        .handle(signature, &body)
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "Webhook rejected");
            ApiError::from(e)
        })?;

    Ok(Json(WebhookResponse {
        received: true,
        outcome,
    }))
}
