//! Integration tests for the HTTP API
//!
//! Drives the router directly with `oneshot` requests against an
//! in-memory database.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tower::util::ServiceExt; // for `oneshot` method
use uuid::Uuid;

use aula_common::config::LiveConfig;
use aula_common::db::init::init_schema;
use aula_live::{build_router, AppState};

const DIM: usize = 4;

async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Should open in-memory database");
    init_schema(&pool).await.expect("Should initialize schema");
    pool
}

async fn setup_state() -> AppState {
    let config = LiveConfig {
        embedding_dim: DIM,
        heartbeat_interval_ms: 60_000,
        ..LiveConfig::default()
    };
    AppState::new(setup_test_db().await, config)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Create a session through the API, returning its id.
async fn create_session(app: &axum::Router) -> Uuid {
    let response = app
        .clone()
        .oneshot(post_json(
            "/sessions",
            &json!({
                "title": "Compilers",
                "scheduled_at": "2026-09-01T09:00:00Z",
                "duration_minutes": 90
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = extract_json(response.into_body()).await;
    body["session_id"].as_str().unwrap().parse().unwrap()
}

// =============================================================================
// Service endpoints
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_router(setup_state().await);

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "aula-live");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_status_reports_index_size() {
    let app = build_router(setup_state().await);

    let response = app.oneshot(get("/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["service"], "aula-live");
    assert_eq!(body["indexed_identities"], 0);
}

// =============================================================================
// Session lifecycle
// =============================================================================

#[tokio::test]
async fn test_session_create_and_status() {
    let app = build_router(setup_state().await);
    let session_id = create_session(&app).await;

    let response = app
        .oneshot(get(&format!("/sessions/{}", session_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["title"], "Compilers");
    assert_eq!(body["phase"], "scheduled");
    assert_eq!(body["paused"], false);
    assert_eq!(body["recognized_count"], 0);
}

#[tokio::test]
async fn test_unknown_session_is_404() {
    let app = build_router(setup_state().await);

    let response = app
        .oneshot(get(&format!("/sessions/{}", Uuid::new_v4())))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = extract_json(response.into_body()).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_promote_then_qa_then_complete() {
    let app = build_router(setup_state().await);
    let session_id = create_session(&app).await;

    let response = app
        .clone()
        .oneshot(post(&format!("/sessions/{}/promote", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["applied"], true);
    assert_eq!(body["phase"], "in_progress");
    assert_eq!(body["subphase"], "idle");

    // Promote again: well-formed no-op
    let response = app
        .clone()
        .oneshot(post(&format!("/sessions/{}/promote", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["applied"], false);

    let response = app
        .clone()
        .oneshot(post(&format!("/sessions/{}/qa", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["applied"], true);
    assert_eq!(body["subphase"], "qa");

    let response = app
        .clone()
        .oneshot(post(&format!("/sessions/{}/complete", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["applied"], true);
    assert_eq!(body["phase"], "completed");

    // Terminal sessions reject further transitions
    let response = app
        .oneshot(post(&format!("/sessions/{}/qa", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["applied"], false);
}

#[tokio::test]
async fn test_qa_switch_during_attendance_runs_full_stop() {
    let state = setup_state().await;
    let app = build_router(state.clone());
    let session_id = create_session(&app).await;

    app.clone()
        .oneshot(post(&format!("/sessions/{}/promote", session_id)))
        .await
        .unwrap();
    let (_sub, mut rx) = state.rooms.subscribe(session_id).await;
    app.clone()
        .oneshot(post(&format!("/sessions/{}/attendance/start", session_id)))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post(&format!("/sessions/{}/qa", session_id)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["applied"], true);
    assert_eq!(body["subphase"], "qa");

    // The implied stop ran in full: summary published, frame inlet gone
    // (a stale inlet would make this a 500, not a 404)
    let mut saw_summary = false;
    while let Ok(msg) = rx.try_recv() {
        if msg.event == "attendance_phase_ended" {
            saw_summary = true;
        }
    }
    assert!(saw_summary, "attendance_phase_ended not published");

    let response = app
        .oneshot(post_json(
            &format!("/sessions/{}/frames", session_id),
            &json!({ "probes": [[0.0, 0.0, 0.0, 0.0]] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_pause_requires_in_progress() {
    let app = build_router(setup_state().await);
    let session_id = create_session(&app).await;

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/sessions/{}/pause", session_id),
            &json!({ "paused": true }),
        ))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["applied"], false);

    app.clone()
        .oneshot(post(&format!("/sessions/{}/promote", session_id)))
        .await
        .unwrap();

    let response = app
        .oneshot(post_json(
            &format!("/sessions/{}/pause", session_id),
            &json!({ "paused": true }),
        ))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["applied"], true);
}

#[tokio::test]
async fn test_frames_rejected_without_active_monitoring() {
    let app = build_router(setup_state().await);
    let session_id = create_session(&app).await;

    let response = app
        .oneshot(post_json(
            &format!("/sessions/{}/frames", session_id),
            &json!({ "probes": [[0.0, 0.0, 0.0, 0.0]] }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Identity enrollment and identification
// =============================================================================

#[tokio::test]
async fn test_enroll_reload_identify() {
    let app = build_router(setup_state().await);

    let response = app
        .clone()
        .oneshot(post_json(
            "/identities",
            &json!({
                "identity_key": "alice",
                "display_name": "Alice",
                "embedding": [0.0, 0.0, 0.0, 0.0]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = app.clone().oneshot(post("/reload")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["indexed"], 1);

    let response = app
        .clone()
        .oneshot(post_json("/identify", &json!({ "probe": [0.1, 0.0, 0.0, 0.0] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["result"]["identity_key"], "alice");
    assert!(body["result"]["confidence"].as_f64().unwrap() > 0.8);

    // Distant probe: no match, still a 200
    let response = app
        .oneshot(post_json("/identify", &json!({ "probe": [3.0, 3.0, 3.0, 3.0] })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert!(body["result"].is_null());
}

#[tokio::test]
async fn test_enroll_wrong_dimension_is_400() {
    let app = build_router(setup_state().await);

    let response = app
        .oneshot(post_json(
            "/identities",
            &json!({
                "identity_key": "alice",
                "display_name": "Alice",
                "embedding": [0.0, 0.0]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_soft_delete_removes_identity_from_index() {
    let app = build_router(setup_state().await);

    app.clone()
        .oneshot(post_json(
            "/identities",
            &json!({
                "identity_key": "alice",
                "display_name": "Alice",
                "embedding": [0.0, 0.0, 0.0, 0.0]
            }),
        ))
        .await
        .unwrap();
    app.clone().oneshot(post("/reload")).await.unwrap();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/identities/alice")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["soft"], true);

    let response = app.clone().oneshot(post("/reload")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["indexed"], 0);

    // Deleting an unknown identity reports not found
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/identities/nobody")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =============================================================================
// Manual attendance
// =============================================================================

#[tokio::test]
async fn test_manual_attendance_records_once() {
    let app = build_router(setup_state().await);
    let session_id = create_session(&app).await;

    app.clone()
        .oneshot(post_json(
            "/identities",
            &json!({
                "identity_key": "alice",
                "display_name": "Alice",
                "embedding": [0.0, 0.0, 0.0, 0.0]
            }),
        ))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/sessions/{}/attendance/manual", session_id),
            &json!({ "identity_key": "alice" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["recorded"], true);

    // Second manual record for the same person is swallowed
    let response = app
        .clone()
        .oneshot(post_json(
            &format!("/sessions/{}/attendance/manual", session_id),
            &json!({ "identity_key": "alice" }),
        ))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["recorded"], false);

    // Unknown identity
    let response = app
        .oneshot(post_json(
            &format!("/sessions/{}/attendance/manual", session_id),
            &json!({ "identity_key": "nobody" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
