//! Checkout API endpoint
//!
//! - POST /api/v1/checkout - Open a payment session for a card registration

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;

use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::models::Currency;
use crate::services::checkout::CheckoutSession;

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub registration_id: i64,
    #[serde(default)]
    pub currency: Option<Currency>,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(create_checkout))
}

/// POST /api/v1/checkout
///
/// Returns `{url, checkout_session_id}`; the client redirects to `url`.
async fn create_checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(body): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let session = state
        .checkout_service
        .create_session(&user.0, body.registration_id, body.currency)
        .await?;
    Ok(Json(session))
}
