//! HTTP request handlers
//!
//! Implements the control operations: session lifecycle, attendance
//! start/stop, identification, and enrollment.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use aula_common::events::LiveEvent;
use aula_common::Error;

use crate::db;
use crate::monitor::{self, Frame};
use crate::session::{SessionPhase, Subphase, Transition};
use crate::state::AppState;

// ============================================================================
// Error mapping
// ============================================================================

/// Wrapper mapping domain errors onto HTTP responses
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: String,
    module: String,
    version: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    title: String,
    scheduled_at: DateTime<Utc>,
    duration_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct SessionStatusResponse {
    session_id: Uuid,
    title: String,
    phase: String,
    subphase: Option<String>,
    paused: bool,
    recognized_count: usize,
    scheduled_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct TransitionResponse {
    applied: bool,
    phase: String,
    subphase: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    paused: bool,
}

#[derive(Debug, Deserialize)]
pub struct ManualAttendanceRequest {
    identity_key: String,
}

#[derive(Debug, Deserialize)]
pub struct FramesRequest {
    probes: Vec<Vec<f32>>,
    captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    identity_key: String,
    display_name: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteIdentityQuery {
    #[serde(default = "default_soft")]
    soft: bool,
}

fn default_soft() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct IdentifyRequest {
    probe: Vec<f32>,
}

#[derive(Debug, Serialize)]
pub struct IdentifyResponse {
    result: Option<IdentifyMatch>,
}

#[derive(Debug, Serialize)]
pub struct IdentifyMatch {
    identity_key: String,
    display_name: String,
    confidence: f32,
    distance: f32,
}

// ============================================================================
// Service endpoints
// ============================================================================

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "aula-live".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "service": "aula-live",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
        "indexed_identities": state.engine.index_size().await,
    }))
}

// ============================================================================
// Session lifecycle
// ============================================================================

pub async fn create_session(
    State(state): State<AppState>,
    Json(request): Json<CreateSessionRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let session_id = Uuid::new_v4();
    let row = db::sessions::SessionRow {
        session_id,
        title: request.title.clone(),
        scheduled_at: request.scheduled_at,
        duration_minutes: request.duration_minutes,
        phase: "scheduled".to_string(),
        subphase: None,
        started_at: None,
        ended_at: None,
    };
    db::sessions::insert_session(&state.db, &row).await?;
    state
        .registry
        .insert(
            session_id,
            request.title,
            request.scheduled_at,
            request.duration_minutes,
            SessionPhase::Scheduled,
        )
        .await;

    Ok((StatusCode::CREATED, Json(json!({ "session_id": session_id }))))
}

pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<SessionStatusResponse>> {
    let snapshot = state
        .registry
        .snapshot(session_id)
        .await
        .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;

    Ok(Json(SessionStatusResponse {
        session_id,
        title: snapshot.title.clone(),
        phase: snapshot.phase.label().to_string(),
        subphase: snapshot.phase.subphase_label().map(str::to_string),
        paused: snapshot.paused,
        recognized_count: snapshot.recognized_count,
        scheduled_at: snapshot.scheduled_at,
        started_at: snapshot.started_at,
        ended_at: snapshot.ended_at,
    }))
}

pub async fn promote(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    let transition = state.registry.promote(session_id).await;
    if transition.is_applied() {
        persist_phase(&state, session_id).await;
        state
            .rooms
            .publish(
                session_id,
                &LiveEvent::SessionStarted {
                    session_id,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
    transition_response(&state, session_id, transition).await
}

pub async fn attendance_start(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    let transition = monitor::start_attendance(&state, session_id).await?;
    transition_response(&state, session_id, transition).await
}

pub async fn attendance_stop(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    let transition = monitor::stop_attendance(&state, session_id).await?;
    transition_response(&state, session_id, transition).await
}

pub async fn enter_qa(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    stop_attendance_if_active(&state, session_id).await?;
    let transition = state.registry.enter_qa(session_id).await;
    if transition.is_applied() {
        persist_phase(&state, session_id).await;
        state
            .rooms
            .publish(
                session_id,
                &LiveEvent::QaPhaseStarted {
                    session_id,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
    transition_response(&state, session_id, transition).await
}

pub async fn enter_presentation(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    stop_attendance_if_active(&state, session_id).await?;
    let transition = state.registry.enter_presentation(session_id).await;
    if transition.is_applied() {
        persist_phase(&state, session_id).await;
        state
            .rooms
            .publish(
                session_id,
                &LiveEvent::PresentationPhaseStarted {
                    session_id,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
    transition_response(&state, session_id, transition).await
}

pub async fn set_paused(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<PauseRequest>,
) -> ApiResult<Json<TransitionResponse>> {
    let transition = state.registry.set_paused(session_id, request.paused).await;
    transition_response(&state, session_id, transition).await
}

pub async fn complete(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    let transition = state.registry.complete(session_id).await;
    if transition.is_applied() {
        state.ingest.remove(session_id).await;
        persist_phase(&state, session_id).await;
        state
            .rooms
            .publish(
                session_id,
                &LiveEvent::SessionEnded {
                    session_id,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
    transition_response(&state, session_id, transition).await
}

pub async fn cancel(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<TransitionResponse>> {
    let transition = state.registry.cancel(session_id).await;
    if transition.is_applied() {
        state.ingest.remove(session_id).await;
        persist_phase(&state, session_id).await;
        state
            .rooms
            .publish(
                session_id,
                &LiveEvent::SessionEnded {
                    session_id,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
    transition_response(&state, session_id, transition).await
}

// ============================================================================
// Attendance
// ============================================================================

pub async fn attendance_manual(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<ManualAttendanceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if state.registry.snapshot(session_id).await.is_none() {
        return Err(Error::NotFound(format!("session {}", session_id)).into());
    }
    let identity = state
        .engine
        .store()
        .get(&request.identity_key)
        .await?
        .ok_or_else(|| Error::NotFound(format!("identity {}", request.identity_key)))?;

    let recorded = db::attendance::record(
        &state.db,
        session_id,
        &identity.identity_key,
        1.0,
        "manual",
        Utc::now(),
    )
    .await?;

    if recorded {
        state
            .registry
            .mark_recognized(session_id, &identity.identity_key)
            .await;
        state
            .rooms
            .publish(
                session_id,
                &LiveEvent::PersonRecognized {
                    session_id,
                    identity_key: identity.identity_key.clone(),
                    display_name: identity.display_name.clone(),
                    confidence: 1.0,
                    detected_at: Utc::now(),
                    timestamp: Utc::now(),
                },
            )
            .await;
    }

    Ok(Json(json!({ "recorded": recorded })))
}

pub async fn push_frames(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<FramesRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let frame = Frame {
        probes: request.probes,
        captured_at: request.captured_at.unwrap_or_else(Utc::now),
    };
    state.ingest.push(session_id, frame).await?;
    Ok(Json(json!({ "accepted": true })))
}

// ============================================================================
// Identity enrollment and identification
// ============================================================================

pub async fn enroll_identity(
    State(state): State<AppState>,
    Json(request): Json<EnrollRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    state
        .engine
        .store()
        .put(&request.identity_key, &request.display_name, &request.embedding)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "identity_key": request.identity_key })),
    ))
}

pub async fn delete_identity(
    State(state): State<AppState>,
    Path(identity_key): Path<String>,
    Query(query): Query<DeleteIdentityQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state.engine.store().delete(&identity_key, query.soft).await?;
    if !deleted {
        return Err(Error::NotFound(format!("identity {}", identity_key)).into());
    }
    Ok(Json(json!({ "deleted": true, "soft": query.soft })))
}

pub async fn identify(
    State(state): State<AppState>,
    Json(request): Json<IdentifyRequest>,
) -> ApiResult<Json<IdentifyResponse>> {
    let result = state.engine.identify(&request.probe).await?;
    Ok(Json(IdentifyResponse {
        result: result.map(|m| IdentifyMatch {
            identity_key: m.identity_key,
            display_name: m.display_name,
            confidence: m.confidence,
            distance: m.distance,
        }),
    }))
}

pub async fn reload(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let indexed = state.engine.reload().await?;
    Ok(Json(json!({ "indexed": indexed })))
}

// ============================================================================
// Helpers
// ============================================================================

async fn transition_response(
    state: &AppState,
    session_id: Uuid,
    transition: Transition,
) -> ApiResult<Json<TransitionResponse>> {
    match transition {
        Transition::NotFound => {
            Err(Error::NotFound(format!("session {}", session_id)).into())
        }
        _ => {
            let snapshot = state
                .registry
                .snapshot(session_id)
                .await
                .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;
            Ok(Json(TransitionResponse {
                applied: transition.is_applied(),
                phase: snapshot.phase.label().to_string(),
                subphase: snapshot.phase.subphase_label().map(str::to_string),
            }))
        }
    }
}

// Switching to qa/presentation while attendance is running implies the stop:
// the registry refuses a direct switch out of the attendance subphase, so it
// must go through the full teardown (worker, frame inlet, summary) first.
async fn stop_attendance_if_active(state: &AppState, session_id: Uuid) -> Result<(), ApiError> {
    let attendance_active = state
        .registry
        .snapshot(session_id)
        .await
        .map(|s| s.phase == SessionPhase::InProgress(Subphase::AttendanceActive))
        .unwrap_or(false);
    if attendance_active {
        monitor::stop_attendance(state, session_id).await?;
    }
    Ok(())
}

async fn persist_phase(state: &AppState, session_id: Uuid) {
    if let Some(snapshot) = state.registry.snapshot(session_id).await {
        if let Err(e) = db::sessions::persist_phase(&state.db, &snapshot).await {
            tracing::warn!(session_id = %session_id, error = %e, "failed to persist phase change");
        }
    }
}
