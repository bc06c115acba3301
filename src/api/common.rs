//! Common API utilities and shared types

use axum::http::HeaderValue;
use serde::Deserialize;

use crate::api::middleware::ApiError;

/// Pagination query parameters; the service applies defaults and bounds
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

/// `Set-Cookie` value for a login session
pub fn session_cookie(token: &str, max_age_seconds: i64) -> Result<HeaderValue, ApiError> {
    let cookie = format!(
        "session={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        token, max_age_seconds
    );
    HeaderValue::from_str(&cookie).map_err(|e| ApiError::internal("Invalid session cookie", e))
}

/// `Set-Cookie` value that clears the session
pub fn clear_session_cookie() -> HeaderValue {
    HeaderValue::from_static("session=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}
