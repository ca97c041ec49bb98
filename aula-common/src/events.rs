//! Event types for the aula event system
//!
//! Provides the closed event enum delivered to session viewers plus the
//! EventBus used for the service-wide firehose. Per-session fan-out is the
//! room manager's job (aula-live); the EventBus mirrors every published
//! event for diagnostics and the global SSE stream.
//!
//! Every value reachable from an event has a defined JSON representation:
//! timestamps serialize as RFC 3339 strings via chrono's serde support and
//! no variant carries binary payloads, so serialization is total.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Live session event types
///
/// Events are delivered to session subscribers as tagged JSON records and
/// mirrored on the EventBus. One case per wire event type, so producers get
/// exhaustiveness checking and consumers get straightforward matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Full session snapshot, sent once immediately on subscribe
    SessionState {
        session_id: Uuid,
        phase: String,
        subphase: Option<String>,
        paused: bool,
        recognized_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Session left Scheduled and entered InProgress (manual or scheduled)
    SessionStarted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Attendance monitoring began for the session
    AttendancePhaseStarted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Attendance monitoring ended; carries the final roll-call summary
    AttendancePhaseEnded {
        session_id: Uuid,
        summary: AttendanceSummary,
        timestamp: DateTime<Utc>,
    },

    /// A person was recognized and credited with attendance
    PersonRecognized {
        session_id: Uuid,
        identity_key: String,
        display_name: String,
        confidence: f32,
        detected_at: DateTime<Utc>,
        timestamp: DateTime<Utc>,
    },

    /// Heartbeat with the current present count (sent periodically while
    /// attendance monitoring runs, independent of new recognitions)
    PresenceCount {
        session_id: Uuid,
        present_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Q&A phase began
    QaPhaseStarted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Presentation phase began
    PresentationPhaseStarted {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Session completed or was cancelled
    SessionEnded {
        session_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Session-scoped error surfaced to viewers
    Error {
        session_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// Final attendance summary carried by AttendancePhaseEnded
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSummary {
    pub total_enrolled: usize,
    pub present_count: usize,
    pub absent_count: usize,
    pub entries: Vec<AttendanceEntry>,
}

/// Per-person detail within an attendance summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub identity_key: String,
    pub display_name: String,
    pub present: bool,
    pub recorded_at: Option<DateTime<Utc>>,
    pub confidence: Option<f32>,
    pub method: Option<String>,
}

impl LiveEvent {
    /// Get event type as string for SSE event names and filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            LiveEvent::SessionState { .. } => "session_state",
            LiveEvent::SessionStarted { .. } => "session_started",
            LiveEvent::AttendancePhaseStarted { .. } => "attendance_phase_started",
            LiveEvent::AttendancePhaseEnded { .. } => "attendance_phase_ended",
            LiveEvent::PersonRecognized { .. } => "person_recognized",
            LiveEvent::PresenceCount { .. } => "presence_count",
            LiveEvent::QaPhaseStarted { .. } => "qa_phase_started",
            LiveEvent::PresentationPhaseStarted { .. } => "presentation_phase_started",
            LiveEvent::SessionEnded { .. } => "session_ended",
            LiveEvent::Error { .. } => "error",
        }
    }

    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            LiveEvent::SessionState { session_id, .. }
            | LiveEvent::SessionStarted { session_id, .. }
            | LiveEvent::AttendancePhaseStarted { session_id, .. }
            | LiveEvent::AttendancePhaseEnded { session_id, .. }
            | LiveEvent::PersonRecognized { session_id, .. }
            | LiveEvent::PresenceCount { session_id, .. }
            | LiveEvent::QaPhaseStarted { session_id, .. }
            | LiveEvent::PresentationPhaseStarted { session_id, .. }
            | LiveEvent::SessionEnded { session_id, .. }
            | LiveEvent::Error { session_id, .. } => *session_id,
        }
    }
}

/// Central event distribution bus for application-wide events
///
/// Uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
/// - Lagged message detection for slow subscribers
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LiveEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// No subscribers is not an error; the event is simply dropped.
    pub fn emit(&self, event: LiveEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tag_serialization() {
        let event = LiveEvent::PersonRecognized {
            session_id: Uuid::nil(),
            identity_key: "s-1042".to_string(),
            display_name: "Ada Lovelace".to_string(),
            confidence: 0.92,
            detected_at: Utc::now(),
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).expect("event serialization should succeed");
        assert!(json.contains("\"type\":\"person_recognized\""));
        assert!(json.contains("\"identity_key\":\"s-1042\""));
        assert!(json.contains("\"display_name\":\"Ada Lovelace\""));

        let back: LiveEvent = serde_json::from_str(&json).expect("round trip");
        assert_eq!(back.event_type(), "person_recognized");
    }

    #[test]
    fn test_timestamps_serialize_as_rfc3339() {
        let ts = DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let event = LiveEvent::SessionStarted {
            session_id: Uuid::nil(),
            timestamp: ts,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("2026-03-02T09:00:00Z"));
    }

    #[test]
    fn test_event_type_matches_wire_tag() {
        let events = vec![
            LiveEvent::SessionStarted {
                session_id: Uuid::nil(),
                timestamp: Utc::now(),
            },
            LiveEvent::PresenceCount {
                session_id: Uuid::nil(),
                present_count: 3,
                timestamp: Utc::now(),
            },
            LiveEvent::Error {
                session_id: Uuid::nil(),
                message: "capture lost".to_string(),
                timestamp: Utc::now(),
            },
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let expected = format!("\"type\":\"{}\"", event.event_type());
            assert!(json.contains(&expected), "tag mismatch in {}", json);
        }
    }

    #[test]
    fn test_attendance_summary_serialization() {
        let event = LiveEvent::AttendancePhaseEnded {
            session_id: Uuid::nil(),
            summary: AttendanceSummary {
                total_enrolled: 2,
                present_count: 1,
                absent_count: 1,
                entries: vec![
                    AttendanceEntry {
                        identity_key: "a".to_string(),
                        display_name: "A".to_string(),
                        present: true,
                        recorded_at: Some(Utc::now()),
                        confidence: Some(0.88),
                        method: Some("automatic".to_string()),
                    },
                    AttendanceEntry {
                        identity_key: "b".to_string(),
                        display_name: "B".to_string(),
                        present: false,
                        recorded_at: None,
                        confidence: None,
                        method: None,
                    },
                ],
            },
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"total_enrolled\":2"));
        assert!(json.contains("\"absent_count\":1"));
    }

    #[tokio::test]
    async fn test_event_bus_delivery() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(LiveEvent::SessionStarted {
            session_id: Uuid::nil(),
            timestamp: Utc::now(),
        });

        let received = rx.recv().await.expect("subscriber should receive event");
        assert_eq!(received.event_type(), "session_started");
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new(4);
        // Must not panic or error with zero subscribers
        bus.emit(LiveEvent::SessionEnded {
            session_id: Uuid::nil(),
            timestamp: Utc::now(),
        });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
