//! Shared setup for HTTP integration tests

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::http::HeaderName;
use axum_test::TestServer;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use vitrine::api::{build_router, AppState};
use vitrine::config::Config;
use vitrine::db::{create_test_pool, migrations};
use vitrine::services::checkout::{CheckoutRequest, CheckoutSession, PaymentGateway};
use vitrine::services::EmailService;
use vitrine::storage::{MemoryStorage, SharedStorage};

pub const WEBHOOK_SECRET: &str = "whsec_test";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const MEMBER_EMAIL: &str = "member@example.com";
pub const PASSWORD: &str = "password123";

/// Payment gateway that records requests instead of calling out
#[derive(Default)]
pub struct RecordingGateway {
    pub requests: Mutex<Vec<CheckoutRequest>>,
    pub fail: bool,
}

impl RecordingGateway {
    pub fn failing() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn recorded(&self) -> Vec<CheckoutRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        if self.fail {
            return Err(anyhow!("gateway unreachable"));
        }
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let id = format!("cs_test_{}", requests.len());
        Ok(CheckoutSession {
            url: format!("https://checkout.example.com/{}", id),
            id,
        })
    }
}

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub storage: Arc<MemoryStorage>,
    pub gateway: Arc<RecordingGateway>,
    pub email: Arc<EmailService>,
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.payment.webhook_secret = WEBHOOK_SECRET.to_string();
    config.storage.chunk_size = 32;
    config.storage.timeout_seconds = 2;
    config.storage.audio_timeout_seconds = 2;
    config.storage.retry_after_seconds = 7;
    config
}

pub async fn create_test_app() -> TestApp {
    create_test_app_with(RecordingGateway::default()).await
}

pub async fn create_test_app_with(gateway: RecordingGateway) -> TestApp {
    create_custom_test_app(test_config(), gateway, |storage| storage as SharedStorage).await
}

/// Full app over `config`; `wrap_storage` decides which backend the router
/// sees, with the memory store underneath kept in `TestApp::storage`
pub async fn create_custom_test_app(
    config: Config,
    gateway: RecordingGateway,
    wrap_storage: impl FnOnce(Arc<MemoryStorage>) -> SharedStorage,
) -> TestApp {
    let pool = create_test_pool().await.expect("Failed to create test pool");
    migrations::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");

    let storage = Arc::new(MemoryStorage::new());
    let gateway = Arc::new(gateway);
    let email = Arc::new(EmailService::log_only());
    let state = AppState::new(
        &config,
        pool,
        wrap_storage(storage.clone()),
        gateway.clone(),
        email.clone(),
    );

    let app = build_router(state.clone(), &config.server.cors_origin);
    let server = TestServer::new(app).expect("Failed to create test server");

    TestApp {
        server,
        state,
        storage,
        gateway,
        email,
    }
}

pub fn authorization() -> HeaderName {
    HeaderName::from_static("authorization")
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}

/// Register an account and return its session token
pub async fn register(server: &TestServer, email: &str, name: &str) -> String {
    let response = server
        .post("/api/v1/auth/register")
        .json(&json!({ "email": email, "name": name, "password": PASSWORD }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    let body: Value = response.json();
    body["token"].as_str().expect("token in response").to_string()
}

/// First account is the admin, the second a member
pub async fn admin_and_member(server: &TestServer) -> (String, String) {
    let admin = register(server, ADMIN_EMAIL, "Admin").await;
    let member = register(server, MEMBER_EMAIL, "Member").await;
    (admin, member)
}

/// Create a formation with one open session; returns `(formation_id, session_id)`
pub async fn create_formation_with_session(
    server: &TestServer,
    admin_token: &str,
    max_participants: i32,
) -> (i64, i64) {
    let formation: Value = server
        .post("/api/v1/admin/formations")
        .add_header(authorization(), bearer(admin_token))
        .json(&json!({
            "title": "Rust pour les équipes",
            "description": "Trois jours pour démarrer",
            "duration": "3 jours",
            "category": "dev",
        }))
        .await
        .json();
    let formation_id = formation["id"].as_i64().expect("formation id");

    let start = chrono::Utc::now().date_naive() + chrono::Duration::days(30);
    let end = start + chrono::Duration::days(2);
    let session: Value = server
        .post("/api/v1/admin/sessions")
        .add_header(authorization(), bearer(admin_token))
        .json(&json!({
            "formation_id": formation_id,
            "start_date": start,
            "end_date": end,
            "location": "Genève",
            "max_participants": max_participants,
            "price_eur": 150000,
            "price_chf": 140000,
        }))
        .await
        .json();
    let session_id = session["id"].as_i64().expect("session id");

    (formation_id, session_id)
}

/// Card registration in CHF for the given session
pub async fn register_for_session(server: &TestServer, token: &str, session_id: i64) -> Value {
    let response = server
        .post("/api/v1/registrations")
        .add_header(authorization(), bearer(token))
        .json(&json!({
            "session_id": session_id,
            "first_name": "Grace",
            "last_name": "Hopper",
            "email": MEMBER_EMAIL,
            "payment_method": "card",
            "currency": "chf",
        }))
        .await;
    response.assert_status(axum::http::StatusCode::CREATED);
    response.json()
}
