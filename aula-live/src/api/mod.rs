//! HTTP/SSE surface over the control operations
//!
//! A thin transport shim: handlers translate requests into registry, engine,
//! and room-manager calls and map outcomes back to JSON. No domain logic
//! lives here.

pub mod handlers;
pub mod sse;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the service router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/status", get(handlers::status))
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:session_id", get(handlers::session_status))
        .route("/sessions/:session_id/promote", post(handlers::promote))
        .route(
            "/sessions/:session_id/attendance/start",
            post(handlers::attendance_start),
        )
        .route(
            "/sessions/:session_id/attendance/stop",
            post(handlers::attendance_stop),
        )
        .route(
            "/sessions/:session_id/attendance/manual",
            post(handlers::attendance_manual),
        )
        .route("/sessions/:session_id/frames", post(handlers::push_frames))
        .route("/sessions/:session_id/qa", post(handlers::enter_qa))
        .route(
            "/sessions/:session_id/presentation",
            post(handlers::enter_presentation),
        )
        .route("/sessions/:session_id/pause", post(handlers::set_paused))
        .route("/sessions/:session_id/complete", post(handlers::complete))
        .route("/sessions/:session_id/cancel", post(handlers::cancel))
        .route("/sessions/:session_id/events", get(sse::session_events))
        .route("/events", get(sse::event_stream))
        .route("/identities", post(handlers::enroll_identity))
        .route("/identities/:identity_key", delete(handlers::delete_identity))
        .route("/identify", post(handlers::identify))
        .route("/reload", post(handlers::reload))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
