//! Session registry and phase state machine
//!
//! Phase transitions are monotonic: `Scheduled → InProgress(subphase) →
//! Completed`, with `Cancelled` reachable from any non-terminal phase and no
//! way back out of a terminal phase. A transition attempted from a state that
//! does not permit it is a no-op outcome, never an error, so a flaky client
//! repeating a control message cannot fail or double-apply.
//!
//! The registry is an injected service with its own synchronization; all
//! mutations for a session go through one write lock, so concurrent callers
//! racing to promote or complete the same session observe exactly one winner.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use aula_common::events::LiveEvent;

/// Subphase of an in-progress session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subphase {
    /// Session running, no activity phase engaged
    Idle,
    /// Attendance monitoring active (one worker per session)
    AttendanceActive,
    /// Presentation playback active
    PresentationActive,
    /// Q&A active
    QaActive,
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Scheduled,
    InProgress(Subphase),
    Completed,
    Cancelled,
}

impl SessionPhase {
    /// Stable wire/database label for the phase
    pub fn label(&self) -> &'static str {
        match self {
            SessionPhase::Scheduled => "scheduled",
            SessionPhase::InProgress(_) => "in_progress",
            SessionPhase::Completed => "completed",
            SessionPhase::Cancelled => "cancelled",
        }
    }

    /// Stable wire/database label for the subphase, if in progress
    pub fn subphase_label(&self) -> Option<&'static str> {
        match self {
            SessionPhase::InProgress(Subphase::Idle) => Some("idle"),
            SessionPhase::InProgress(Subphase::AttendanceActive) => Some("attendance"),
            SessionPhase::InProgress(Subphase::PresentationActive) => Some("presentation"),
            SessionPhase::InProgress(Subphase::QaActive) => Some("qa"),
            _ => None,
        }
    }

    /// Parse the labels written by [`label`]/[`subphase_label`]
    pub fn from_labels(phase: &str, subphase: Option<&str>) -> Option<Self> {
        match phase {
            "scheduled" => Some(SessionPhase::Scheduled),
            "completed" => Some(SessionPhase::Completed),
            "cancelled" => Some(SessionPhase::Cancelled),
            "in_progress" => {
                let sub = match subphase {
                    None | Some("idle") => Subphase::Idle,
                    Some("attendance") => Subphase::AttendanceActive,
                    Some("presentation") => Subphase::PresentationActive,
                    Some("qa") => Subphase::QaActive,
                    Some(_) => return None,
                };
                Some(SessionPhase::InProgress(sub))
            }
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Cancelled)
    }
}

/// Outcome of a phase-change operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Transition occurred
    Applied {
        from: SessionPhase,
        to: SessionPhase,
    },
    /// Current phase does not permit the transition; nothing changed
    NoOp,
    /// Unknown session
    NotFound,
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Mutable per-session state, owned exclusively by the registry
#[derive(Debug)]
struct SessionEntry {
    title: String,
    scheduled_at: DateTime<Utc>,
    duration_minutes: Option<i64>,
    phase: SessionPhase,
    paused: bool,
    phase_entered_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    /// Identities already credited with attendance this session; monotonic
    /// for the session's lifetime
    recognized: HashSet<String>,
    /// Cancellation handle for the live monitoring worker, if any
    monitor: Option<CancellationToken>,
}

/// Read-only view of one session's registry state
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub title: String,
    pub scheduled_at: DateTime<Utc>,
    pub duration_minutes: Option<i64>,
    pub phase: SessionPhase,
    pub paused: bool,
    pub phase_entered_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub recognized_count: usize,
}

impl SessionSnapshot {
    /// Full state event sent to a viewer immediately on subscribe
    pub fn to_state_event(&self) -> LiveEvent {
        LiveEvent::SessionState {
            session_id: self.session_id,
            phase: self.phase.label().to_string(),
            subphase: self.phase.subphase_label().map(str::to_string),
            paused: self.paused,
            recognized_count: self.recognized_count,
            timestamp: Utc::now(),
        }
    }
}

/// Registry of live session state
///
/// One entry per known session. The scheduler, control operations, and each
/// session's monitoring worker all mutate through this type.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a session (at startup seed or on creation)
    ///
    /// An existing entry for the same id is left untouched.
    pub async fn insert(
        &self,
        session_id: Uuid,
        title: String,
        scheduled_at: DateTime<Utc>,
        duration_minutes: Option<i64>,
        phase: SessionPhase,
    ) {
        let mut sessions = self.sessions.write().await;
        sessions.entry(session_id).or_insert_with(|| SessionEntry {
            title,
            scheduled_at,
            duration_minutes,
            phase,
            paused: false,
            phase_entered_at: Utc::now(),
            started_at: None,
            ended_at: None,
            recognized: HashSet::new(),
            monitor: None,
        });
    }

    pub async fn snapshot(&self, session_id: Uuid) -> Option<SessionSnapshot> {
        let sessions = self.sessions.read().await;
        sessions.get(&session_id).map(|entry| SessionSnapshot {
            session_id,
            title: entry.title.clone(),
            scheduled_at: entry.scheduled_at,
            duration_minutes: entry.duration_minutes,
            phase: entry.phase,
            paused: entry.paused,
            phase_entered_at: entry.phase_entered_at,
            started_at: entry.started_at,
            ended_at: entry.ended_at,
            recognized_count: entry.recognized.len(),
        })
    }

    /// Ids and scheduled starts of all sessions still in `Scheduled`
    pub async fn scheduled_sessions(&self) -> Vec<(Uuid, DateTime<Utc>)> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, entry)| entry.phase == SessionPhase::Scheduled)
            .map(|(id, entry)| (*id, entry.scheduled_at))
            .collect()
    }

    /// `Scheduled → InProgress(Idle)`; records the start timestamp
    pub async fn promote(&self, session_id: Uuid) -> Transition {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session_id) else {
            return Transition::NotFound;
        };
        if entry.phase != SessionPhase::Scheduled {
            debug!(session_id = %session_id, phase = entry.phase.label(), "promote is a no-op");
            return Transition::NoOp;
        }
        let from = entry.phase;
        entry.phase = SessionPhase::InProgress(Subphase::Idle);
        entry.phase_entered_at = Utc::now();
        entry.started_at = Some(Utc::now());
        info!(session_id = %session_id, "session promoted to in-progress");
        Transition::Applied {
            from,
            to: entry.phase,
        }
    }

    /// Enter the attendance subphase, storing the monitoring worker's
    /// cancellation handle
    ///
    /// Idempotent: re-entering while already active is a no-op, which is what
    /// keeps a duplicate "start" message from spawning a second worker.
    pub async fn enter_attendance(&self, session_id: Uuid, monitor: CancellationToken) -> Transition {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session_id) else {
            return Transition::NotFound;
        };
        match entry.phase {
            SessionPhase::InProgress(Subphase::AttendanceActive) => {
                debug!(session_id = %session_id, "attendance already active");
                Transition::NoOp
            }
            SessionPhase::InProgress(_) => {
                let from = entry.phase;
                entry.phase = SessionPhase::InProgress(Subphase::AttendanceActive);
                entry.phase_entered_at = Utc::now();
                entry.monitor = Some(monitor);
                Transition::Applied {
                    from,
                    to: entry.phase,
                }
            }
            _ => Transition::NoOp,
        }
    }

    /// Leave the attendance subphase, cancelling the monitoring worker
    pub async fn exit_attendance(&self, session_id: Uuid) -> Transition {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session_id) else {
            return Transition::NotFound;
        };
        match entry.phase {
            SessionPhase::InProgress(Subphase::AttendanceActive) => {
                let from = entry.phase;
                entry.phase = SessionPhase::InProgress(Subphase::Idle);
                entry.phase_entered_at = Utc::now();
                Self::cancel_monitor(entry);
                Transition::Applied {
                    from,
                    to: entry.phase,
                }
            }
            _ => Transition::NoOp,
        }
    }

    /// Enter the Q&A subphase; silently exits presentation
    pub async fn enter_qa(&self, session_id: Uuid) -> Transition {
        self.switch_subphase(session_id, Subphase::QaActive).await
    }

    /// Enter the presentation subphase; silently exits Q&A
    pub async fn enter_presentation(&self, session_id: Uuid) -> Transition {
        self.switch_subphase(session_id, Subphase::PresentationActive)
            .await
    }

    // Attendance is never left through a plain subphase switch: its worker
    // and frame inlet need the full stop teardown, so callers must go
    // through exit_attendance first.
    async fn switch_subphase(&self, session_id: Uuid, target: Subphase) -> Transition {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session_id) else {
            return Transition::NotFound;
        };
        match entry.phase {
            SessionPhase::InProgress(current) if current == target => Transition::NoOp,
            SessionPhase::InProgress(Subphase::AttendanceActive) => {
                debug!(
                    session_id = %session_id,
                    "subphase switch refused while attendance is active"
                );
                Transition::NoOp
            }
            SessionPhase::InProgress(_) => {
                let from = entry.phase;
                entry.phase = SessionPhase::InProgress(target);
                entry.phase_entered_at = Utc::now();
                Transition::Applied {
                    from,
                    to: entry.phase,
                }
            }
            _ => Transition::NoOp,
        }
    }

    /// Set or clear the paused flag (layered on any in-progress subphase)
    pub async fn set_paused(&self, session_id: Uuid, paused: bool) -> Transition {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session_id) else {
            return Transition::NotFound;
        };
        match entry.phase {
            SessionPhase::InProgress(_) if entry.paused != paused => {
                entry.paused = paused;
                Transition::Applied {
                    from: entry.phase,
                    to: entry.phase,
                }
            }
            _ => Transition::NoOp,
        }
    }

    /// `InProgress(*) → Completed`; cancels any live monitoring worker
    pub async fn complete(&self, session_id: Uuid) -> Transition {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session_id) else {
            return Transition::NotFound;
        };
        match entry.phase {
            SessionPhase::InProgress(_) => {
                let from = entry.phase;
                entry.phase = SessionPhase::Completed;
                entry.phase_entered_at = Utc::now();
                entry.ended_at = Some(Utc::now());
                entry.paused = false;
                Self::cancel_monitor(entry);
                info!(session_id = %session_id, "session completed");
                Transition::Applied {
                    from,
                    to: entry.phase,
                }
            }
            _ => Transition::NoOp,
        }
    }

    /// Cancel from any non-terminal phase
    pub async fn cancel(&self, session_id: Uuid) -> Transition {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&session_id) else {
            return Transition::NotFound;
        };
        if entry.phase.is_terminal() {
            return Transition::NoOp;
        }
        let from = entry.phase;
        entry.phase = SessionPhase::Cancelled;
        entry.phase_entered_at = Utc::now();
        entry.ended_at = Some(Utc::now());
        entry.paused = false;
        Self::cancel_monitor(entry);
        info!(session_id = %session_id, "session cancelled");
        Transition::Applied {
            from,
            to: entry.phase,
        }
    }

    /// Add an identity to the session's recognized set
    ///
    /// Returns true only the first time an identity is seen for the session.
    pub async fn mark_recognized(&self, session_id: Uuid, identity_key: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session_id) {
            Some(entry) => entry.recognized.insert(identity_key.to_string()),
            None => false,
        }
    }

    pub async fn recognized_count(&self, session_id: Uuid) -> usize {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .map(|entry| entry.recognized.len())
            .unwrap_or(0)
    }

    /// Whether a monitoring worker handle is registered and not yet cancelled
    pub async fn has_active_monitor(&self, session_id: Uuid) -> bool {
        let sessions = self.sessions.read().await;
        sessions
            .get(&session_id)
            .and_then(|entry| entry.monitor.as_ref())
            .map(|token| !token.is_cancelled())
            .unwrap_or(false)
    }

    // Cancelling an already-cancelled token is a no-op, so racing stop
    // requests are safe.
    fn cancel_monitor(entry: &mut SessionEntry) {
        if let Some(token) = entry.monitor.take() {
            token.cancel();
        }
    }
}
