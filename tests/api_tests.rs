//! End-to-end tests for the generation flow, with the external
//! structured-generation service replaced by a local mock endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use formsmith::ai::GeneratorClient;
use formsmith::api::AppState;
use formsmith::db::{DbHandle, FormsDb};
use formsmith::server::build_router;

/// Spawn a chat-completions mock that always replies with the given message
/// content, and count how many requests it receives.
async fn spawn_mock(content: &str) -> (String, Arc<AtomicUsize>) {
    let hits = Arc::new(AtomicUsize::new(0));
    let content = content.to_string();
    let app = Router::new().route(
        "/chat/completions",
        post({
            let hits = hits.clone();
            move || {
                let hits = hits.clone();
                let content = content.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    Json(json!({
                        "choices": [{ "message": { "content": content } }]
                    }))
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), hits)
}

fn test_app(base_url: &str) -> Router {
    let db = FormsDb::new_in_memory().unwrap();
    let generator = GeneratorClient::new(
        "test-key".into(),
        base_url.into(),
        "test-model".into(),
    );
    let state = Arc::new(AppState {
        db: DbHandle::new(db),
        generator,
    });
    build_router(state)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<serde_json::Value>,
) -> (StatusCode, serde_json::Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(json.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}

async fn create_form(app: &Router, name: &str, slug: &str) -> serde_json::Value {
    let (status, body) = send(
        app,
        "POST",
        "/api/forms",
        Some(json!({ "name": name, "slug": slug })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body
}

fn generated_form_json() -> String {
    json!({
        "name": "Event registration",
        "slug": "event-registration",
        "description": "Sign-up form for the event",
        "fields": [
            {"label": "   ", "type": "TEXT", "required": true, "config": {"options": []}},
            {"label": "Meal", "type": "DROPDOWN", "required": false, "config": {"options": ["Veggie"]}},
            {"label": "Tickets", "type": "NUMBER", "required": false, "config": {"options": ["stray"]}}
        ]
    })
    .to_string()
}

#[tokio::test]
async fn test_generate_replaces_and_normalizes_fields() {
    let (base_url, hits) = spawn_mock(&generated_form_json()).await;
    let app = test_app(&base_url);

    let form = create_form(&app, "Draft", "draft-form").await;
    let id = form["id"].as_str().unwrap();

    // Pre-existing field that the regeneration must replace.
    let (status, old_field) = send(
        &app,
        "POST",
        &format!("/api/forms/{}/fields", id),
        Some(json!({ "type": "TEXT", "label": "Old" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, fields) = send(
        &app,
        "POST",
        &format!("/api/forms/{}/generate", id),
        Some(json!({ "prompt": "an event registration form" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let fields = fields.as_array().unwrap();
    assert_eq!(fields.len(), 3);

    // Blank label defaulted from its 1-based position.
    assert_eq!(fields[0]["label"], "Field 1");
    assert_eq!(fields[0]["order"], 0);
    assert_eq!(fields[0]["required"], true);

    // A single-option dropdown gets the two placeholders.
    assert_eq!(fields[1]["type"], "DROPDOWN");
    assert_eq!(fields[1]["config"]["options"], json!(["Option 1", "Option 2"]));

    // Non-dropdown options are forced empty.
    assert_eq!(fields[2]["type"], "NUMBER");
    assert_eq!(fields[2]["config"]["options"], json!([]));

    // The old field is gone and the listing matches the returned set.
    let (_, listed) = send(&app, "GET", &format!("/api/forms/{}/fields", id), None).await;
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 3);
    assert!(
        listed
            .iter()
            .all(|f| f["id"] != old_field["id"])
    );

    // Name and slug were adopted from the generated output.
    let (_, updated) = send(&app, "GET", &format!("/api/forms/{}", id), None).await;
    assert_eq!(updated["name"], "Event registration");
    assert_eq!(updated["slug"], "event-registration");
}

#[tokio::test]
async fn test_generate_suffixes_colliding_slug() {
    let (base_url, _) = spawn_mock(&generated_form_json()).await;
    let app = test_app(&base_url);

    create_form(&app, "Taken", "event-registration").await;
    let form = create_form(&app, "Mine", "mine").await;
    let id = form["id"].as_str().unwrap();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/forms/{}/generate", id),
        Some(json!({ "prompt": "an event registration form" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, updated) = send(&app, "GET", &format!("/api/forms/{}", id), None).await;
    assert_eq!(updated["slug"], "event-registration-2");
}

#[tokio::test]
async fn test_generate_empty_content_is_bad_gateway() {
    let (base_url, _) = spawn_mock("").await;
    let app = test_app(&base_url);
    let form = create_form(&app, "Draft", "draft-form").await;
    let id = form["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/forms/{}/generate", id),
        Some(json!({ "prompt": "anything" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Empty AI response");
}

#[tokio::test]
async fn test_generate_unparseable_content_is_bad_gateway() {
    let (base_url, _) = spawn_mock("this is not the JSON you are looking for").await;
    let app = test_app(&base_url);
    let form = create_form(&app, "Draft", "draft-form").await;
    let id = form["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/forms/{}/generate", id),
        Some(json!({ "prompt": "anything" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "Invalid AI response");
}

#[tokio::test]
async fn test_generate_empty_field_list_is_bad_gateway() {
    let empty = json!({
        "name": "X", "slug": "x", "description": "", "fields": []
    })
    .to_string();
    let (base_url, _) = spawn_mock(&empty).await;
    let app = test_app(&base_url);
    let form = create_form(&app, "Draft", "draft-form").await;
    let id = form["id"].as_str().unwrap();

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/forms/{}/generate", id),
        Some(json!({ "prompt": "anything" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "No fields generated");

    // The failed generation must not have touched the (empty) field set.
    let (_, listed) = send(&app, "GET", &format!("/api/forms/{}/fields", id), None).await;
    assert_eq!(listed.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_generate_missing_form_skips_external_call() {
    let (base_url, hits) = spawn_mock(&generated_form_json()).await;
    let app = test_app(&base_url);

    let (status, _) = send(
        &app,
        "POST",
        "/api/forms/nope/generate",
        Some(json!({ "prompt": "anything" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_generate_published_form_skips_external_call() {
    let (base_url, hits) = spawn_mock(&generated_form_json()).await;
    let app = test_app(&base_url);

    let form = create_form(&app, "Done", "done").await;
    let id = form["id"].as_str().unwrap();
    let (status, _) = send(&app, "POST", &format!("/api/forms/{}/publish", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/forms/{}/generate", id),
        Some(json!({ "prompt": "anything" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
