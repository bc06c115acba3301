//! Integration tests for blogs, podcasts, the contact form and the dashboard

mod common;

use axum::http::{header, HeaderName, StatusCode};
use common::{
    admin_and_member, authorization, bearer, create_formation_with_session, create_test_app,
    register_for_session,
};
use serde_json::{json, Value};

#[tokio::test]
async fn test_blog_publication_and_rendering() {
    let app = create_test_app().await;
    let (admin, _) = admin_and_member(&app.server).await;

    let created = app
        .server
        .post("/api/v1/admin/blogs")
        .add_header(authorization(), bearer(&admin))
        .json(&json!({
            "title": "Pourquoi Rust ?",
            "excerpt": "Sûreté mémoire sans ramasse-miettes",
            "author": "Admin",
            "is_published": false,
            "sections": [{
                "title": "Introduction",
                "contents": [
                    { "kind": "text", "data": { "markdown": "**Rapide** <script>x</script>" } },
                    { "kind": "list", "data": { "items": ["sûr", "rapide"] } },
                ],
            }],
        }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let created: Value = created.json();
    let id = created["id"].as_i64().unwrap();
    assert_eq!(created["slug"], "pourquoi-rust");

    // Drafts are hidden from the public
    let page: Value = app.server.get("/api/v1/blogs").await.json();
    assert_eq!(page["total"], 0);
    app.server
        .get("/api/v1/blogs/pourquoi-rust")
        .await
        .assert_status_not_found();

    app.server
        .patch(&format!("/api/v1/admin/blogs/{}", id))
        .add_header(authorization(), bearer(&admin))
        .json(&json!({ "is_published": true }))
        .await
        .assert_status_ok();

    let page: Value = app.server.get("/api/v1/blogs").await.json();
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["slug"], "pourquoi-rust");

    let detail: Value = app.server.get("/api/v1/blogs/pourquoi-rust").await.json();
    let html = detail["sections"][0]["contents"][0]["html"].as_str().unwrap();
    assert!(html.contains("<strong>Rapide</strong>"));
    assert!(!html.contains("<script>"));
    assert_eq!(detail["sections"][0]["contents"][1]["kind"], "list");

    app.server
        .delete(&format!("/api/v1/admin/blogs/{}", id))
        .add_header(authorization(), bearer(&admin))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    let page: Value = app.server.get("/api/v1/blogs").await.json();
    assert_eq!(page["total"], 0);
}

#[tokio::test]
async fn test_podcast_episodes_and_play_counter() {
    let app = create_test_app().await;
    let (admin, _) = admin_and_member(&app.server).await;

    let podcast = app
        .server
        .post("/api/v1/admin/podcasts")
        .add_header(authorization(), bearer(&admin))
        .json(&json!({ "title": "Le podcast du conseil", "description": "Entretiens" }))
        .await;
    podcast.assert_status(StatusCode::CREATED);
    let podcast: Value = podcast.json();
    let podcast_id = podcast["id"].as_i64().unwrap();

    let episode: Value = app
        .server
        .post(&format!("/api/v1/admin/podcasts/{}/episodes", podcast_id))
        .add_header(authorization(), bearer(&admin))
        .json(&json!({ "title": "Épisode 1", "audio_path": "podcasts/ep1.mp3", "duration_seconds": 1800 }))
        .await
        .json();
    let episode_id = episode["id"].as_i64().unwrap();
    assert_eq!(episode["episode_number"], 1);
    assert_eq!(episode["audio_url"], "/api/hidrive/files/podcasts/ep1.mp3");

    for expected in 1..=3 {
        let count: Value = app
            .server
            .post(&format!("/api/v1/podcasts/episodes/{}/play", episode_id))
            .await
            .json();
        assert_eq!(count["play_count"], expected);
        assert_eq!(count["total_plays"], expected);
    }

    app.server
        .post("/api/v1/podcasts/episodes/9999/play")
        .await
        .assert_status_not_found();

    let detail: Value = app
        .server
        .get(&format!("/api/v1/podcasts/{}", podcast["slug"].as_str().unwrap()))
        .await
        .json();
    assert_eq!(detail["episodes"].as_array().unwrap().len(), 1);

    // Audio paths must stay inside the store
    app.server
        .post(&format!("/api/v1/admin/podcasts/{}/episodes", podcast_id))
        .add_header(authorization(), bearer(&admin))
        .json(&json!({ "title": "Évasion", "audio_path": "../etc/passwd" }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn test_contact_form_forwards_and_rate_limits() {
    let app = create_test_app().await;
    let forwarded = HeaderName::from_static("x-forwarded-for");
    let message = json!({
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "company": "Analytical Engines",
        "subject": "Formation intra",
        "message": "Pouvez-vous venir à Lausanne ?",
    });

    let response = app
        .server
        .post("/api/v1/contact")
        .add_header(forwarded.clone(), "198.51.100.7")
        .json(&message)
        .await;
    response.assert_status(StatusCode::ACCEPTED);
    assert_eq!(response.json::<Value>()["sent"], true);

    let outbox = app.email.outbox();
    let sent = outbox
        .iter()
        .find(|m| m.subject == "[Contact] Formation intra")
        .expect("contact email");
    assert_eq!(sent.reply_to.as_deref(), Some("ada@example.com"));
    assert!(sent.body.contains("Analytical Engines"));

    for _ in 0..4 {
        app.server
            .post("/api/v1/contact")
            .add_header(forwarded.clone(), "198.51.100.7")
            .json(&message)
            .await
            .assert_status(StatusCode::ACCEPTED);
    }

    let limited = app
        .server
        .post("/api/v1/contact")
        .add_header(forwarded.clone(), "198.51.100.7")
        .json(&message)
        .await;
    limited.assert_status(StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(limited.header(header::RETRY_AFTER), "3600");

    // Other clients are unaffected
    app.server
        .post("/api/v1/contact")
        .add_header(forwarded, "198.51.100.8")
        .json(&message)
        .await
        .assert_status(StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_contact_form_validation() {
    let app = create_test_app().await;
    let response = app
        .server
        .post("/api/v1/contact")
        .json(&json!({
            "name": "Ada",
            "email": "not-an-email",
            "subject": "Hello",
            "message": "Hi",
        }))
        .await;
    response.assert_status_bad_request();
    assert_eq!(response.json::<Value>()["error"]["code"], "VALIDATION_ERROR");
    assert!(app.email.outbox().is_empty());
}

#[tokio::test]
async fn test_dashboard_summarizes_activity() {
    let app = create_test_app().await;
    let (admin, member) = admin_and_member(&app.server).await;
    let (_, session_id) = create_formation_with_session(&app.server, &admin, 5).await;
    register_for_session(&app.server, &member, session_id).await;

    let response = app
        .server
        .get("/api/v1/admin/dashboard")
        .add_header(authorization(), bearer(&admin))
        .await;
    response.assert_status_ok();
    let dashboard: Value = response.json();

    assert_eq!(dashboard["formations"]["active"], 1);
    assert_eq!(dashboard["formations"]["total"], 1);
    assert_eq!(dashboard["upcoming_sessions"], 1);
    assert_eq!(dashboard["registrations"]["pending"], 1);
    assert_eq!(dashboard["registrations"]["confirmed"], 0);
    assert_eq!(dashboard["total_plays"], 0);
    assert_eq!(dashboard["published_blogs"], 0);
    assert!(dashboard["requests"]["total_requests"].as_u64().unwrap() > 0);
    assert!(dashboard["uptime_formatted"].is_string());
}
