//! API layer - HTTP handlers and routing
//!
//! JSON endpoints live under `/api/v1`, the remote file proxy under
//! `/api/hidrive/files`. Access control is decided per path prefix by the
//! access gate rather than per route group.

pub mod admin;
pub mod auth;
pub mod blogs;
pub mod checkout;
pub mod common;
pub mod contact;
pub mod files;
pub mod formations;
pub mod middleware;
pub mod podcasts;
pub mod registrations;
pub mod sessions;
pub mod upload;
pub mod webhooks;

use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppState, AuthenticatedUser, RequestStats};

/// Build the `/api/v1` router
pub fn build_api_router(state: &AppState) -> Router<AppState> {
    let admin_routes = Router::new()
        .merge(admin::router())
        .nest("/formations", formations::admin_router())
        .nest("/sessions", sessions::admin_router())
        .nest("/registrations", registrations::admin_router())
        .nest("/blogs", blogs::admin_router())
        .nest("/podcasts", podcasts::admin_podcast_router())
        .nest("/episodes", podcasts::admin_episode_router())
        .nest("/upload", upload::router(&state.upload_config))
        .route_layer(axum_middleware::from_fn(middleware::require_admin));

    Router::new()
        .nest("/auth", auth::router())
        .nest("/formations", formations::public_router())
        .nest("/sessions", sessions::public_router())
        .nest("/registrations", registrations::router())
        .nest("/checkout", checkout::router())
        .nest("/webhooks", webhooks::router())
        .nest("/blogs", blogs::public_router())
        .nest("/podcasts", podcasts::public_router())
        .nest("/contact", contact::router())
        .nest("/admin", admin_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Router {
    let mut cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::COOKIE,
            header::RANGE,
        ])
        .expose_headers([
            header::CONTENT_RANGE,
            header::ACCEPT_RANGES,
            header::CONTENT_LENGTH,
        ])
        .allow_credentials(true);
    let allow_origin = match cors_origin.parse::<HeaderValue>() {
        Ok(origin) => {
            cors = cors.allow_origin(origin.clone());
            Some(origin)
        }
        Err(e) => {
            tracing::warn!(origin = %cors_origin, error = %e, "Ignoring invalid CORS origin");
            None
        }
    };

    // CorsLayer answers every OPTIONS itself, so the file proxy keeps it off
    // its own preflight handler
    let api_routes = Router::new()
        .nest("/api/v1", build_api_router(&state))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::access_gate,
        ))
        .layer(cors.clone());
    let file_routes = Router::new()
        .nest("/api/hidrive/files", files::router(cors, allow_origin))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::access_gate,
        ));

    Router::new()
        .merge(api_routes)
        .merge(file_routes)
        .layer(TraceLayer::new_for_http())
        // Outermost, so rejected requests are counted too
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state)
}
