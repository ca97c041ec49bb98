//! Attendance monitoring worker
//!
//! One cancellable background task per session while that session is in the
//! attendance subphase. The worker pulls frames from its capture source, runs
//! the frame analyzer to obtain probe embeddings, identifies each probe, and
//! credits attendance exactly once per identity per session. Cancellation is
//! cooperative: the loop checks its token every iteration, so shutdown
//! latency is bounded by one frame's processing time.
//!
//! The capture source and frame analyzer are external capabilities modeled
//! as traits. In production the frame ingest registry feeds a channel-backed
//! capture source from the HTTP surface; tests substitute fakes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use aula_common::events::LiveEvent;
use aula_common::{Error, Result};

use crate::db;
use crate::identify::MatchCooldown;
use crate::session::Transition;
use crate::state::AppState;

/// One captured frame: probe embeddings plus capture time
///
/// Frames arrive with embeddings already extracted by the external vision
/// capability; this service never touches pixels.
#[derive(Debug, Clone)]
pub struct Frame {
    pub probes: Vec<Vec<f32>>,
    pub captured_at: DateTime<Utc>,
}

/// Source of frames for one monitoring worker
///
/// `read_frame` returning `Ok(None)` signals end of stream. Errors are
/// treated as transient and retried with backoff up to the configured budget.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    async fn read_frame(&mut self) -> Result<Option<Frame>>;
    /// Release the underlying source; runs on every worker exit path
    async fn close(&mut self);
}

/// "Identify all faces in this frame" capability: yields probe embeddings
#[async_trait::async_trait]
pub trait FrameAnalyzer: Send + Sync {
    async fn probes(&self, frame: &Frame) -> Result<Vec<Vec<f32>>>;
}

/// Analyzer for frames that already carry extracted probe embeddings
pub struct EmbeddedProbeAnalyzer;

#[async_trait::async_trait]
impl FrameAnalyzer for EmbeddedProbeAnalyzer {
    async fn probes(&self, frame: &Frame) -> Result<Vec<Vec<f32>>> {
        Ok(frame.probes.clone())
    }
}

/// Capture source fed through an mpsc channel by the frame ingest registry
pub struct ChannelCapture {
    rx: mpsc::Receiver<Frame>,
}

#[async_trait::async_trait]
impl CaptureSource for ChannelCapture {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.rx.close();
    }
}

/// Registry of per-session frame inlets
///
/// The HTTP surface pushes frames here; the session's worker consumes them.
pub struct FrameIngest {
    senders: RwLock<HashMap<Uuid, mpsc::Sender<Frame>>>,
}

impl Default for FrameIngest {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameIngest {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
        }
    }

    /// Open a frame channel for a session, replacing any stale one
    pub async fn register(&self, session_id: Uuid, buffer: usize) -> ChannelCapture {
        let (tx, rx) = mpsc::channel(buffer);
        self.senders.write().await.insert(session_id, tx);
        ChannelCapture { rx }
    }

    /// Hand a frame to the session's worker
    pub async fn push(&self, session_id: Uuid, frame: Frame) -> Result<()> {
        let tx = {
            let senders = self.senders.read().await;
            senders.get(&session_id).cloned()
        };
        let Some(tx) = tx else {
            return Err(Error::NotFound(format!(
                "no attendance monitoring active for session {}",
                session_id
            )));
        };
        tx.send(frame)
            .await
            .map_err(|_| Error::Internal("monitoring worker is gone".to_string()))
    }

    /// Drop a session's inlet; the worker sees end of stream once the
    /// buffered frames drain
    pub async fn remove(&self, session_id: Uuid) {
        self.senders.write().await.remove(&session_id);
    }
}

/// Begin attendance monitoring for a session
///
/// Idempotent: if the session is already in the attendance subphase the
/// registry reports a no-op and no second worker is spawned.
pub async fn start_attendance(state: &AppState, session_id: Uuid) -> Result<Transition> {
    let cancel = CancellationToken::new();
    let transition = state.registry.enter_attendance(session_id, cancel.clone()).await;
    if !transition.is_applied() {
        return Ok(transition);
    }

    let capture = state
        .ingest
        .register(session_id, state.config.event_buffer)
        .await;
    spawn_monitor(
        state.clone(),
        session_id,
        Box::new(capture),
        Arc::new(EmbeddedProbeAnalyzer),
        cancel,
    );

    persist_phase(state, session_id).await;
    state
        .rooms
        .publish(
            session_id,
            &LiveEvent::AttendancePhaseStarted {
                session_id,
                timestamp: Utc::now(),
            },
        )
        .await;
    Ok(transition)
}

/// End attendance monitoring for a session
///
/// Cancels the worker, closes the frame inlet, and publishes the final
/// roll-call summary. A second stop is a no-op.
pub async fn stop_attendance(state: &AppState, session_id: Uuid) -> Result<Transition> {
    finish_attendance(state, session_id).await
}

// Common teardown for every way attendance can end: explicit stop, capture
// end-of-stream, and retry exhaustion. Exactly one caller wins the
// exit_attendance transition, so the summary is published once.
async fn finish_attendance(state: &AppState, session_id: Uuid) -> Result<Transition> {
    let transition = state.registry.exit_attendance(session_id).await;
    if !transition.is_applied() {
        return Ok(transition);
    }

    state.ingest.remove(session_id).await;
    persist_phase(state, session_id).await;

    let summary = db::attendance::summary(&state.db, session_id).await?;
    state
        .rooms
        .publish(
            session_id,
            &LiveEvent::AttendancePhaseEnded {
                session_id,
                summary,
                timestamp: Utc::now(),
            },
        )
        .await;
    Ok(transition)
}

/// Spawn the monitoring worker task for a session
pub fn spawn_monitor(
    state: AppState,
    session_id: Uuid,
    capture: Box<dyn CaptureSource>,
    analyzer: Arc<dyn FrameAnalyzer>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_monitor(state, session_id, capture, analyzer, cancel))
}

async fn run_monitor(
    state: AppState,
    session_id: Uuid,
    mut capture: Box<dyn CaptureSource>,
    analyzer: Arc<dyn FrameAnalyzer>,
    cancel: CancellationToken,
) {
    info!(session_id = %session_id, "attendance monitoring started");

    let mut heartbeat =
        tokio::time::interval(Duration::from_millis(state.config.heartbeat_interval_ms));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut cooldown = MatchCooldown::new(Duration::from_secs(state.config.cooldown_window_secs));
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(session_id = %session_id, "monitoring cancelled");
                break;
            }
            _ = heartbeat.tick() => {
                let present_count = state.registry.recognized_count(session_id).await;
                state.rooms.publish(session_id, &LiveEvent::PresenceCount {
                    session_id,
                    present_count,
                    timestamp: Utc::now(),
                }).await;
            }
            frame = capture.read_frame() => match frame {
                Ok(Some(frame)) => {
                    failures = 0;
                    if let Err(e) = process_frame(&state, session_id, &frame, analyzer.as_ref(), &mut cooldown).await {
                        warn!(session_id = %session_id, error = %e, "frame processing failed");
                    }
                }
                Ok(None) => {
                    info!(session_id = %session_id, "capture source ended");
                    // The source is gone for good; leave the attendance
                    // subphase so it can be restarted with a fresh one
                    if let Err(e) = finish_attendance(&state, session_id).await {
                        warn!(session_id = %session_id, error = %e, "attendance teardown failed");
                    }
                    break;
                }
                Err(e) => {
                    failures += 1;
                    if failures > state.config.capture_retry_max {
                        error!(session_id = %session_id, error = %e, "capture retry budget exhausted");
                        capture_gave_up(&state, session_id).await;
                        break;
                    }
                    let backoff = capture_backoff(state.config.capture_retry_backoff_ms, failures);
                    warn!(
                        session_id = %session_id,
                        error = %e,
                        attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "frame read failed, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }
    }

    capture.close().await;
    info!(session_id = %session_id, "attendance monitoring stopped");
}

async fn process_frame(
    state: &AppState,
    session_id: Uuid,
    frame: &Frame,
    analyzer: &dyn FrameAnalyzer,
    cooldown: &mut MatchCooldown,
) -> Result<()> {
    let probes = analyzer.probes(frame).await?;
    for probe in probes {
        let m = match state.engine.identify(&probe).await {
            Ok(Some(m)) => m,
            Ok(None) => continue,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "probe rejected");
                continue;
            }
        };

        if !cooldown.allow(&m.identity_key) {
            continue;
        }
        // Session-scoped dedup: once seen, never re-announced this session
        if !state.registry.mark_recognized(session_id, &m.identity_key).await {
            continue;
        }

        // Duplicate insert (e.g. a pre-existing manual record) is a no-op
        db::attendance::record(
            &state.db,
            session_id,
            &m.identity_key,
            m.confidence,
            "automatic",
            frame.captured_at,
        )
        .await?;

        info!(
            session_id = %session_id,
            identity_key = %m.identity_key,
            confidence = m.confidence,
            "person recognized"
        );
        state
            .rooms
            .publish(
                session_id,
                &LiveEvent::PersonRecognized {
                    session_id,
                    identity_key: m.identity_key.clone(),
                    display_name: m.display_name.clone(),
                    confidence: m.confidence,
                    detected_at: frame.captured_at,
                    timestamp: Utc::now(),
                },
            )
            .await;
    }
    Ok(())
}

// Capture source is permanently unavailable: tell the viewers, leave the
// attendance subphase, and let the worker terminate itself.
async fn capture_gave_up(state: &AppState, session_id: Uuid) {
    state
        .rooms
        .publish(
            session_id,
            &LiveEvent::Error {
                session_id,
                message: "attendance capture failed, monitoring stopped".to_string(),
                timestamp: Utc::now(),
            },
        )
        .await;

    if let Err(e) = finish_attendance(state, session_id).await {
        warn!(session_id = %session_id, error = %e, "attendance teardown failed");
    }
}

fn capture_backoff(base_ms: u64, failures: u32) -> Duration {
    let factor = 1u64 << (failures.saturating_sub(1)).min(6);
    Duration::from_millis((base_ms * factor).min(30_000))
}

async fn persist_phase(state: &AppState, session_id: Uuid) {
    if let Some(snapshot) = state.registry.snapshot(session_id).await {
        if let Err(e) = db::sessions::persist_phase(&state.db, &snapshot).await {
            warn!(session_id = %session_id, error = %e, "failed to persist phase change");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(capture_backoff(500, 1), Duration::from_millis(500));
        assert_eq!(capture_backoff(500, 2), Duration::from_millis(1000));
        assert_eq!(capture_backoff(500, 4), Duration::from_millis(4000));
        assert_eq!(capture_backoff(500, 60), Duration::from_millis(30_000));
    }

    #[tokio::test]
    async fn test_ingest_push_without_monitor_is_not_found() {
        let ingest = FrameIngest::new();
        let frame = Frame {
            probes: vec![],
            captured_at: Utc::now(),
        };
        let err = ingest.push(Uuid::new_v4(), frame).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_ingest_round_trip_and_end_of_stream() {
        let ingest = FrameIngest::new();
        let session = Uuid::new_v4();
        let mut capture = ingest.register(session, 4).await;

        ingest
            .push(
                session,
                Frame {
                    probes: vec![vec![1.0]],
                    captured_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        let frame = capture.read_frame().await.unwrap().unwrap();
        assert_eq!(frame.probes.len(), 1);

        // Removing the inlet drains into end-of-stream
        ingest.remove(session).await;
        assert!(capture.read_frame().await.unwrap().is_none());
    }
}
