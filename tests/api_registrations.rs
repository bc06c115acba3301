//! Integration tests for the catalog, registrations, checkout and webhooks

mod common;

use axum::http::{HeaderName, StatusCode};
use common::{
    admin_and_member, authorization, bearer, create_formation_with_session, create_test_app,
    create_test_app_with, register, register_for_session, RecordingGateway, WEBHOOK_SECRET,
};
use serde_json::{json, Value};
use vitrine::api::webhooks::SIGNATURE_HEADER;
use vitrine::services::webhook::sign_payload;

fn signature_header() -> HeaderName {
    HeaderName::from_static(SIGNATURE_HEADER)
}

fn signed(payload: &Value) -> (Vec<u8>, String) {
    let body = serde_json::to_vec(payload).unwrap();
    let signature = sign_payload(&body, WEBHOOK_SECRET, chrono::Utc::now().timestamp()).unwrap();
    (body, signature)
}

#[tokio::test]
async fn test_public_catalog_lists_formation_and_sessions() {
    let app = create_test_app().await;
    let (admin, _) = admin_and_member(&app.server).await;
    let (formation_id, session_id) = create_formation_with_session(&app.server, &admin, 10).await;

    let formations: Vec<Value> = app.server.get("/api/v1/formations").await.json();
    assert_eq!(formations.len(), 1);
    assert_eq!(formations[0]["slug"], "rust-pour-les-equipes");

    let detail: Value = app
        .server
        .get("/api/v1/formations/rust-pour-les-equipes")
        .await
        .json();
    assert_eq!(detail["id"], formation_id);
    assert_eq!(detail["sessions"][0]["id"], session_id);

    let upcoming: Vec<Value> = app
        .server
        .get("/api/v1/sessions/upcoming")
        .add_query_param("formation_id", formation_id)
        .await
        .json();
    assert_eq!(upcoming.len(), 1);
    assert_eq!(upcoming[0]["seats_left"], 10);

    app.server
        .get("/api/v1/formations/does-not-exist")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn test_registration_takes_a_seat_and_cancel_releases_it() {
    let app = create_test_app().await;
    let (admin, member) = admin_and_member(&app.server).await;
    let (_, session_id) = create_formation_with_session(&app.server, &admin, 1).await;

    let registration = register_for_session(&app.server, &member, session_id).await;
    assert_eq!(registration["status"], "pending");
    assert_eq!(registration["payment_status"], "pending");
    // 1400.00 CHF plus 8.1 % VAT
    assert_eq!(registration["amount"], 151_340);

    // Session is now full
    let response = app
        .server
        .post("/api/v1/registrations")
        .add_header(authorization(), bearer(&admin))
        .json(&json!({
            "session_id": session_id,
            "first_name": "Ada",
            "last_name": "Lovelace",
            "email": "ada@example.com",
            "payment_method": "invoice",
        }))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let id = registration["id"].as_i64().unwrap();
    let cancelled: Value = app
        .server
        .post(&format!("/api/v1/registrations/{}/cancel", id))
        .add_header(authorization(), bearer(&member))
        .await
        .json();
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["payment_status"], "cancelled");

    let session: Value = app
        .server
        .get(&format!("/api/v1/sessions/{}", session_id))
        .await
        .json();
    assert_eq!(session["seats_left"], 1);
}

#[tokio::test]
async fn test_member_cannot_cancel_someone_elses_registration() {
    let app = create_test_app().await;
    let (admin, member) = admin_and_member(&app.server).await;
    let other = register(&app.server, "other@example.com", "Other").await;
    let (_, session_id) = create_formation_with_session(&app.server, &admin, 5).await;

    let registration = register_for_session(&app.server, &member, session_id).await;
    let id = registration["id"].as_i64().unwrap();

    app.server
        .post(&format!("/api/v1/registrations/{}/cancel", id))
        .add_header(authorization(), bearer(&other))
        .await
        .assert_status_forbidden();

    let mine: Vec<Value> = app
        .server
        .get("/api/v1/registrations/mine")
        .add_header(authorization(), bearer(&other))
        .await
        .json();
    assert!(mine.is_empty());
}

#[tokio::test]
async fn test_checkout_then_webhook_confirms_registration() {
    let app = create_test_app().await;
    let (admin, member) = admin_and_member(&app.server).await;
    let (_, session_id) = create_formation_with_session(&app.server, &admin, 5).await;
    let registration = register_for_session(&app.server, &member, session_id).await;
    let id = registration["id"].as_i64().unwrap();

    let checkout = app
        .server
        .post("/api/v1/checkout")
        .add_header(authorization(), bearer(&member))
        .json(&json!({ "registration_id": id }))
        .await;
    checkout.assert_status_ok();
    let checkout: Value = checkout.json();
    assert_eq!(checkout["checkout_session_id"], "cs_test_1");
    assert!(checkout["url"].as_str().unwrap().starts_with("https://"));

    let recorded = app.gateway.recorded();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].amount, 151_340);
    assert_eq!(recorded[0].registration_id, id);

    let (body, signature) = signed(&json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test_1",
            "payment_status": "paid",
            "payment_intent": "pi_1",
        }},
    }));

    let response = app
        .server
        .post("/api/v1/webhooks/stripe")
        .add_header(signature_header(), signature.clone())
        .bytes(body.clone().into())
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["outcome"], "applied");

    // Redelivery is acknowledged without changing anything
    let response = app
        .server
        .post("/api/v1/webhooks/stripe")
        .add_header(signature_header(), signature)
        .bytes(body.into())
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["outcome"], "already_applied");

    let mine: Vec<Value> = app
        .server
        .get("/api/v1/registrations/mine")
        .add_header(authorization(), bearer(&member))
        .await
        .json();
    assert_eq!(mine[0]["status"], "confirmed");
    assert_eq!(mine[0]["payment_status"], "paid");
    assert_eq!(mine[0]["payment_intent_id"], "pi_1");

    // A paid registration cannot be checked out again
    app.server
        .post("/api/v1/checkout")
        .add_header(authorization(), bearer(&member))
        .json(&json!({ "registration_id": id }))
        .await
        .assert_status(StatusCode::CONFLICT);

    assert!(app
        .email
        .outbox()
        .iter()
        .any(|m| m.to == "member@example.com" && m.subject.starts_with("Payment confirmed")));
}

#[tokio::test]
async fn test_expired_checkout_releases_seat() {
    let app = create_test_app().await;
    let (admin, member) = admin_and_member(&app.server).await;
    let (_, session_id) = create_formation_with_session(&app.server, &admin, 1).await;
    let registration = register_for_session(&app.server, &member, session_id).await;
    let id = registration["id"].as_i64().unwrap();

    let (body, signature) = signed(&json!({
        "id": "evt_2",
        "type": "checkout.session.expired",
        "data": { "object": { "id": "cs_unknown", "client_reference_id": id.to_string() }},
    }));
    let response = app
        .server
        .post("/api/v1/webhooks/stripe")
        .add_header(signature_header(), signature)
        .bytes(body.into())
        .await;
    response.assert_status_ok();

    let detail: Value = app
        .server
        .get(&format!("/api/v1/admin/registrations/{}", id))
        .add_header(authorization(), bearer(&admin))
        .await
        .json();
    assert_eq!(detail["status"], "cancelled");
    assert_eq!(detail["payment_status"], "expired");

    let session: Value = app
        .server
        .get(&format!("/api/v1/sessions/{}", session_id))
        .await
        .json();
    assert_eq!(session["seats_left"], 1);
}

#[tokio::test]
async fn test_webhook_rejects_bad_signature() {
    let app = create_test_app().await;
    let body = serde_json::to_vec(&json!({
        "type": "checkout.session.completed",
        "data": { "object": { "id": "cs_test_1" }},
    }))
    .unwrap();

    let forged = sign_payload(&body, "whsec_other", chrono::Utc::now().timestamp()).unwrap();
    let response = app
        .server
        .post("/api/v1/webhooks/stripe")
        .add_header(signature_header(), forged)
        .bytes(body.clone().into())
        .await;
    response.assert_status_bad_request();

    app.server
        .post("/api/v1/webhooks/stripe")
        .bytes(body.into())
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_checkout_gateway_failure_is_unavailable() {
    let app = create_test_app_with(RecordingGateway::failing()).await;
    let (admin, member) = admin_and_member(&app.server).await;
    let (_, session_id) = create_formation_with_session(&app.server, &admin, 5).await;
    let registration = register_for_session(&app.server, &member, session_id).await;

    let response = app
        .server
        .post("/api/v1/checkout")
        .add_header(authorization(), bearer(&member))
        .json(&json!({ "registration_id": registration["id"] }))
        .await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["error"]["code"], "UNAVAILABLE");
}

#[tokio::test]
async fn test_admin_filters_registrations() {
    let app = create_test_app().await;
    let (admin, member) = admin_and_member(&app.server).await;
    let (_, session_id) = create_formation_with_session(&app.server, &admin, 5).await;
    let registration = register_for_session(&app.server, &member, session_id).await;
    let id = registration["id"].as_i64().unwrap();

    let updated: Value = app
        .server
        .patch(&format!("/api/v1/admin/registrations/{}", id))
        .add_header(authorization(), bearer(&admin))
        .json(&json!({ "status": "confirmed", "payment_status": "paid" }))
        .await
        .json();
    assert_eq!(updated["status"], "confirmed");

    let confirmed: Vec<Value> = app
        .server
        .get("/api/v1/admin/registrations")
        .add_query_param("status", "confirmed")
        .add_header(authorization(), bearer(&admin))
        .await
        .json();
    assert_eq!(confirmed.len(), 1);

    let pending: Vec<Value> = app
        .server
        .get("/api/v1/admin/registrations")
        .add_query_param("status", "pending")
        .add_header(authorization(), bearer(&admin))
        .await
        .json();
    assert!(pending.is_empty());
}
