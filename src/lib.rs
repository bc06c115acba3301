//! Vitrine - website backend for a training and consulting firm
//!
//! Formation catalog with dated sessions, registrations paid through a
//! hosted checkout, blog and podcast content, and a proxy in front of the
//! remote file store holding images and audio.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod media;
pub mod models;
pub mod services;
pub mod storage;

use std::time::Duration;

/// Interval of the housekeeping task
pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

/// Prune rate limiter windows and delete expired auth sessions
pub async fn run_cleanup(state: &api::AppState) {
    state.rate_limiter.cleanup().await;
    state.contact_limiter.cleanup().await;
    match state.user_service.cleanup_expired_sessions().await {
        Ok(0) => {}
        Ok(removed) => tracing::debug!(removed, "Expired sessions deleted"),
        Err(e) => tracing::warn!(error = %e, "Failed to delete expired sessions"),
    }
}

/// Run [`run_cleanup`] every [`CLEANUP_INTERVAL`] in the background
pub fn spawn_cleanup_task(state: api::AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            run_cleanup(&state).await;
        }
    })
}
