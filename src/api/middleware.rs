//! API middleware
//!
//! Contains:
//! - Shared application state
//! - The `ApiError` envelope and service error mapping
//! - The path-prefix access gate (session validation, admin check)
//! - Request statistics

use axum::{
    extract::{FromRequestParts, OriginalUri, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::cache::create_cache;
use crate::config::{AccessConfig, Config, StorageConfig, UploadConfig};
use crate::db::repositories::{
    SqlxBlogRepository, SqlxFormationRepository, SqlxPodcastRepository,
    SqlxRegistrationRepository, SqlxSessionRepository, SqlxTrainingSessionRepository,
    SqlxUserRepository,
};
use crate::db::DynDatabasePool;
use crate::models::User;
use crate::services::{
    BlogService, BlogServiceError, CatalogError, CatalogService, CheckoutError, CheckoutService,
    ContactRateLimiter, DashboardService, EmailService, LoginRateLimiter, PaymentGateway,
    PodcastService, PodcastServiceError, RegistrationService, RegistrationServiceError,
    RequestSnapshot, UserService, UserServiceError, WebhookError, WebhookService,
};
use crate::storage::SharedStorage;

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Sum of response times in microseconds
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            total_requests: self.total_requests(),
            avg_response_time_ms: self.avg_response_time_us() / 1000.0,
            uptime_seconds: self.uptime_seconds(),
        }
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Application State
// ============================================================================

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub user_service: Arc<UserService>,
    pub catalog_service: Arc<CatalogService>,
    pub registration_service: Arc<RegistrationService>,
    pub checkout_service: Arc<CheckoutService>,
    pub webhook_service: Arc<WebhookService>,
    pub blog_service: Arc<BlogService>,
    pub podcast_service: Arc<PodcastService>,
    pub dashboard_service: Arc<DashboardService>,
    pub email_service: Arc<EmailService>,
    pub storage: SharedStorage,
    pub storage_config: Arc<StorageConfig>,
    pub upload_config: Arc<UploadConfig>,
    pub access: Arc<AccessConfig>,
    pub rate_limiter: Arc<LoginRateLimiter>,
    pub contact_limiter: Arc<ContactRateLimiter>,
    pub request_stats: Arc<RequestStats>,
}

impl AppState {
    /// Wire repositories and services over an already migrated pool
    pub fn new(
        config: &Config,
        pool: DynDatabasePool,
        storage: SharedStorage,
        gateway: Arc<dyn PaymentGateway>,
        email_service: Arc<EmailService>,
    ) -> Self {
        let cache = create_cache(&config.cache);
        let registration_repo = SqlxRegistrationRepository::boxed(pool.clone());

        let user_service = Arc::new(UserService::with_session_days(
            SqlxUserRepository::boxed(pool.clone()),
            SqlxSessionRepository::boxed(pool.clone()),
            config.auth.session_days,
        ));
        let catalog_service = Arc::new(CatalogService::new(
            SqlxFormationRepository::boxed(pool.clone()),
            SqlxTrainingSessionRepository::boxed(pool.clone()),
            cache.clone(),
        ));
        let registration_service = Arc::new(RegistrationService::new(
            registration_repo.clone(),
            catalog_service.clone(),
            email_service.clone(),
            config.payment.vat_rate,
        ));
        let checkout_service = Arc::new(CheckoutService::new(
            registration_repo.clone(),
            gateway,
            config.payment.clone(),
        ));
        let webhook_service = Arc::new(WebhookService::new(
            registration_repo,
            email_service.clone(),
            cache.clone(),
            config.payment.webhook_secret.clone(),
            config.payment.webhook_tolerance_seconds,
        ));
        let blog_service = Arc::new(BlogService::new(
            SqlxBlogRepository::boxed(pool.clone()),
            cache.clone(),
        ));
        let podcast_service = Arc::new(PodcastService::new(
            SqlxPodcastRepository::boxed(pool.clone()),
            cache,
        ));
        let dashboard_service = Arc::new(DashboardService::new(
            catalog_service.clone(),
            registration_service.clone(),
            podcast_service.clone(),
            blog_service.clone(),
        ));

        Self {
            pool,
            user_service,
            catalog_service,
            registration_service,
            checkout_service,
            webhook_service,
            blog_service,
            podcast_service,
            dashboard_service,
            email_service,
            storage,
            storage_config: Arc::new(config.storage.clone()),
            upload_config: Arc::new(config.upload.clone()),
            access: Arc::new(config.access.clone()),
            rate_limiter: Arc::new(LoginRateLimiter::new()),
            contact_limiter: Arc::new(ContactRateLimiter::new()),
            request_stats: Arc::new(RequestStats::new()),
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new("FORBIDDEN", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: u64) -> Self {
        Self::with_details(
            "RATE_LIMIT",
            message,
            serde_json::json!({ "retry_after": retry_after }),
        )
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new("UNAVAILABLE", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    /// Log the cause and answer with a generic message
    pub fn internal(context: &str, error: impl std::fmt::Display) -> Self {
        tracing::error!(error = %error, "{}", context);
        Self::internal_error(context)
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "FORBIDDEN" => StatusCode::FORBIDDEN,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "CONFLICT" => StatusCode::CONFLICT,
            "RATE_LIMIT" => StatusCode::TOO_MANY_REQUESTS,
            "UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self
            .error
            .details
            .as_ref()
            .and_then(|d| d.get("retry_after"))
            .and_then(|v| v.as_u64());
        let mut response = (self.status(), Json(self)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<UserServiceError> for ApiError {
    fn from(e: UserServiceError) -> Self {
        match e {
            UserServiceError::AuthenticationError(msg) => ApiError::unauthorized(msg),
            UserServiceError::ValidationError(msg) => ApiError::validation_error(msg),
            UserServiceError::UserExists(msg) => ApiError::conflict(msg),
            UserServiceError::InternalError(e) => ApiError::internal("User operation failed", e),
        }
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(msg) => ApiError::not_found(msg),
            CatalogError::Validation(msg) => ApiError::validation_error(msg),
            CatalogError::Conflict(msg) => ApiError::conflict(msg),
            CatalogError::Internal(e) => ApiError::internal("Catalog operation failed", e),
        }
    }
}

impl From<RegistrationServiceError> for ApiError {
    fn from(e: RegistrationServiceError) -> Self {
        match e {
            RegistrationServiceError::NotFound(msg) => ApiError::not_found(msg),
            RegistrationServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            RegistrationServiceError::Validation(msg) => ApiError::validation_error(msg),
            RegistrationServiceError::Conflict(msg) => ApiError::conflict(msg),
            RegistrationServiceError::Internal(e) => {
                ApiError::internal("Registration operation failed", e)
            }
        }
    }
}

impl From<CheckoutError> for ApiError {
    fn from(e: CheckoutError) -> Self {
        match e {
            CheckoutError::NotFound(msg) => ApiError::not_found(msg),
            CheckoutError::Forbidden(msg) => ApiError::forbidden(msg),
            CheckoutError::Validation(msg) => ApiError::validation_error(msg),
            CheckoutError::Conflict(msg) => ApiError::conflict(msg),
            CheckoutError::Gateway(msg) => ApiError::unavailable(msg),
            CheckoutError::Internal(e) => ApiError::internal("Checkout failed", e),
        }
    }
}

impl From<WebhookError> for ApiError {
    /// Every webhook failure is a 400 so the provider retries later
    fn from(e: WebhookError) -> Self {
        if let WebhookError::Internal(inner) = &e {
            tracing::error!(error = %inner, "Webhook processing failed");
        }
        ApiError::validation_error(e.to_string())
    }
}

impl From<BlogServiceError> for ApiError {
    fn from(e: BlogServiceError) -> Self {
        match e {
            BlogServiceError::NotFound(msg) => ApiError::not_found(msg),
            BlogServiceError::Validation(msg) => ApiError::validation_error(msg),
            BlogServiceError::Conflict(msg) => ApiError::conflict(msg),
            BlogServiceError::Internal(e) => ApiError::internal("Blog operation failed", e),
        }
    }
}

impl From<PodcastServiceError> for ApiError {
    fn from(e: PodcastServiceError) -> Self {
        match e {
            PodcastServiceError::NotFound(msg) => ApiError::not_found(msg),
            PodcastServiceError::Validation(msg) => ApiError::validation_error(msg),
            PodcastServiceError::Conflict(msg) => ApiError::conflict(msg),
            PodcastServiceError::Internal(e) => ApiError::internal("Podcast operation failed", e),
        }
    }
}

// ============================================================================
// Authentication
// ============================================================================

/// Authenticated user extracted from request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub User);

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// Extract session token from the `Authorization: Bearer` header or the
/// `session` cookie, in that order
pub fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        if let Ok(auth_str) = auth_header.to_str() {
            if let Some(token) = auth_str.strip_prefix("Bearer ") {
                return Some(token.trim().to_string());
            }
        }
    }

    if let Some(cookie_header) = headers.get(header::COOKIE) {
        if let Ok(cookie_str) = cookie_header.to_str() {
            for cookie in cookie_str.split(';') {
                let cookie = cookie.trim();
                if let Some(token) = cookie.strip_prefix("session=") {
                    if !token.is_empty() {
                        return Some(token.to_string());
                    }
                }
            }
        }
    }

    None
}

/// Access level required by a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLevel {
    Public,
    Authenticated,
    Admin,
}

/// Prefix match on whole path segments: `/api/v1/auth` covers
/// `/api/v1/auth/me` but not `/api/v1/authors`
fn prefix_matches(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}

/// Longest matching configured prefix wins; unmatched paths are public
pub fn classify_path(access: &AccessConfig, path: &str) -> AccessLevel {
    let lists = [
        (&access.public, AccessLevel::Public),
        (&access.authenticated, AccessLevel::Authenticated),
        (&access.admin, AccessLevel::Admin),
    ];

    let mut best: Option<(usize, AccessLevel)> = None;
    for (prefixes, level) in lists {
        for prefix in prefixes {
            if prefix_matches(prefix, path) {
                let len = prefix.trim_end_matches('/').len();
                if best.map_or(true, |(best_len, _)| len > best_len) {
                    best = Some((len, level));
                }
            }
        }
    }
    best.map_or(AccessLevel::Public, |(_, level)| level)
}

/// Access gate middleware
///
/// Resolves the session for every request carrying a token. Protected paths
/// without a valid session answer 401; admin paths answer 403 to members.
pub async fn access_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // Nested routers strip their prefix; classify on the full path
    let path = request
        .extensions()
        .get::<OriginalUri>()
        .map(|uri| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let level = classify_path(&state.access, &path);

    if request.method() == axum::http::Method::OPTIONS {
        return Ok(next.run(request).await);
    }

    let user = match extract_session_token(request.headers()) {
        Some(token) => state
            .user_service
            .validate_session(&token)
            .await
            .map_err(|e| ApiError::internal("Session validation failed", e))?,
        None => None,
    };

    match (level, &user) {
        (AccessLevel::Public, _) => {}
        (_, None) => return Err(ApiError::unauthorized("Invalid or missing session")),
        (AccessLevel::Admin, Some(u)) if !u.is_admin() => {
            return Err(ApiError::forbidden("Admin privileges required"))
        }
        _ => {}
    }

    if let Some(user) = user {
        request.extensions_mut().insert(AuthenticatedUser(user));
    }
    Ok(next.run(request).await)
}

/// Admin authorization for the admin router
///
/// Runs behind the access gate, which attaches the session user.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, ApiError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| ApiError::unauthorized("Authentication required"))?;

    if !user.0.is_admin() {
        return Err(ApiError::forbidden("Admin privileges required"));
    }

    Ok(next.run(request).await)
}

/// Request statistics middleware
///
/// Records request count and response time for the dashboard.
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;
    let duration_us = start.elapsed().as_micros() as u64;
    state.request_stats.record(duration_us);
    response
}

/// Client IP from proxy headers
pub fn client_ip(headers: &HeaderMap) -> Option<std::net::IpAddr> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                if let Ok(ip) = ip.trim().parse() {
                    return Some(ip);
                }
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(name: header::HeaderName, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_extract_session_token_from_bearer() {
        let h = headers(header::AUTHORIZATION, "Bearer test-token-123");
        assert_eq!(extract_session_token(&h), Some("test-token-123".to_string()));
    }

    #[test]
    fn test_extract_session_token_from_cookie() {
        let h = headers(header::COOKIE, "theme=dark; session=test-token-456");
        assert_eq!(extract_session_token(&h), Some("test-token-456".to_string()));
    }

    #[test]
    fn test_extract_session_token_bearer_priority() {
        let mut h = headers(header::AUTHORIZATION, "Bearer bearer-token");
        h.insert(header::COOKIE, HeaderValue::from_static("session=cookie-token"));
        assert_eq!(extract_session_token(&h), Some("bearer-token".to_string()));
    }

    #[test]
    fn test_extract_session_token_none() {
        assert!(extract_session_token(&HeaderMap::new()).is_none());
        let h = headers(header::AUTHORIZATION, "Basic invalid");
        assert!(extract_session_token(&h).is_none());
        let h = headers(header::COOKIE, "session=");
        assert!(extract_session_token(&h).is_none());
    }

    #[test]
    fn test_api_error_status_mapping() {
        assert_eq!(ApiError::validation_error("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::unauthorized("x").status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::forbidden("x").status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::not_found("x").status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::conflict("x").status(), StatusCode::CONFLICT);
        assert_eq!(ApiError::rate_limited("x", 60).status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ApiError::unavailable("x").status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            ApiError::internal_error("x").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_api_error_with_details() {
        let error = ApiError::rate_limited("Too many requests", 900);
        assert_eq!(error.error.details, Some(serde_json::json!({"retry_after": 900})));
    }

    #[test]
    fn test_classify_default_paths() {
        let access = AccessConfig::default();
        assert_eq!(classify_path(&access, "/api/v1/blogs"), AccessLevel::Public);
        assert_eq!(classify_path(&access, "/api/v1/auth/login"), AccessLevel::Public);
        assert_eq!(classify_path(&access, "/api/v1/auth/me"), AccessLevel::Authenticated);
        assert_eq!(
            classify_path(&access, "/api/v1/registrations/mine"),
            AccessLevel::Authenticated
        );
        assert_eq!(
            classify_path(&access, "/api/v1/admin/formations/3"),
            AccessLevel::Admin
        );
        assert_eq!(
            classify_path(&access, "/api/hidrive/files/images/a.png"),
            AccessLevel::Public
        );
    }

    #[test]
    fn test_classify_matches_whole_segments() {
        let access = AccessConfig {
            public: vec![],
            authenticated: vec!["/api/v1/auth".to_string()],
            admin: vec![],
        };
        assert_eq!(classify_path(&access, "/api/v1/authors"), AccessLevel::Public);
        assert_eq!(classify_path(&access, "/api/v1/auth"), AccessLevel::Authenticated);
    }

    #[test]
    fn test_classify_longest_prefix_wins() {
        let access = AccessConfig {
            public: vec!["/api/v1/admin/health".to_string()],
            authenticated: vec![],
            admin: vec!["/api/v1/admin/".to_string()],
        };
        assert_eq!(classify_path(&access, "/api/v1/admin/health"), AccessLevel::Public);
        assert_eq!(classify_path(&access, "/api/v1/admin/blogs"), AccessLevel::Admin);
    }

    #[test]
    fn test_request_stats() {
        let stats = RequestStats::new();
        assert_eq!(stats.avg_response_time_us(), 0.0);
        stats.record(1000);
        stats.record(3000);
        assert_eq!(stats.total_requests(), 2);
        assert_eq!(stats.avg_response_time_us(), 2000.0);
        assert_eq!(stats.snapshot().avg_response_time_ms, 2.0);
    }

    #[test]
    fn test_client_ip() {
        let h = headers(
            header::HeaderName::from_static("x-forwarded-for"),
            "203.0.113.7, 10.0.0.1",
        );
        assert_eq!(client_ip(&h), Some("203.0.113.7".parse().unwrap()));
        let h = headers(header::HeaderName::from_static("x-real-ip"), "198.51.100.2");
        assert_eq!(client_ip(&h), Some("198.51.100.2".parse().unwrap()));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn admin_prefix_always_classified_admin(tail in "[a-z0-9/]{0,30}") {
            let access = AccessConfig::default();
            let path = format!("/api/v1/admin/{}", tail);
            prop_assert_eq!(classify_path(&access, &path), AccessLevel::Admin);
        }

        #[test]
        fn unlisted_paths_are_public(segment in "[a-z]{1,12}") {
            prop_assume!(!["admin", "auth", "registrations", "checkout", "webhooks"]
                .contains(&segment.as_str()));
            let access = AccessConfig::default();
            let path = format!("/api/v1/{}", segment);
            prop_assert_eq!(classify_path(&access, &path), AccessLevel::Public);
        }
    }
}
