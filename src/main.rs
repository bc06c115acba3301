//! Vitrine - website backend for a training and consulting firm

use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vitrine::{
    api::{self, AppState},
    config::Config,
    db,
    services::{EmailService, StripeGateway},
    spawn_cleanup_task, storage,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vitrine=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Vitrine...");

    let config_path =
        std::env::var("VITRINE_CONFIG").unwrap_or_else(|_| "config.yml".to_string());
    let config = Config::load_with_env(Path::new(&config_path))?;
    tracing::info!(path = %config_path, "Configuration loaded");

    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    let applied = db::migrations::run_migrations(&pool).await?;
    tracing::info!(applied, "Database migrations completed");

    let storage = storage::create_storage(&config.storage)?;
    tracing::info!(backend = storage.name(), "Remote storage initialized");

    let gateway = Arc::new(StripeGateway::new(&config.payment)?);
    let email_service = Arc::new(EmailService::new(config.email.clone())?);
    if !config.email.enabled {
        tracing::warn!("Email delivery disabled, messages are only logged");
    }

    let state = AppState::new(&config, pool, storage, gateway, email_service);
    spawn_cleanup_task(state.clone());

    let app = api::build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
