//! Session auto-start scheduler
//!
//! A single process-lifetime loop that promotes sessions from Scheduled to
//! InProgress when wall-clock time enters their start window. Sessions whose
//! start is further in the past than the grace window are left alone: they
//! are started manually or counted missed, and a brief scheduler outage must
//! not retroactively force-start stale sessions.
//!
//! One failed iteration is logged and the loop continues; only process
//! shutdown stops it.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aula_common::events::LiveEvent;

use crate::db;
use crate::state::AppState;

pub struct Scheduler {
    state: AppState,
    interval: Duration,
    grace_window: ChronoDuration,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(state: AppState, shutdown: CancellationToken) -> Self {
        let interval = Duration::from_secs(state.config.scheduler_interval_secs);
        let grace_window = ChronoDuration::seconds(state.config.grace_window_secs);
        Self {
            state,
            interval,
            grace_window,
            shutdown,
        }
    }

    /// Run the tick loop until shutdown; spawned once at startup
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.interval.as_secs(),
                grace_window_secs = self.grace_window.num_seconds(),
                "scheduler started"
            );
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = self.shutdown.cancelled() => {
                        info!("scheduler stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.tick(Utc::now()).await;
                    }
                }
            }
        })
    }

    /// One scheduler pass; returns the number of sessions promoted
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let scheduled = self.state.registry.scheduled_sessions().await;
        let mut promoted = 0;

        for (session_id, scheduled_at) in scheduled {
            if !within_start_window(scheduled_at, now, self.grace_window) {
                continue;
            }
            // Losing the race to a concurrent manual promote is fine
            if !self.state.registry.promote(session_id).await.is_applied() {
                continue;
            }
            promoted += 1;
            info!(session_id = %session_id, scheduled_at = %scheduled_at, "session auto-started");

            if let Some(snapshot) = self.state.registry.snapshot(session_id).await {
                if let Err(e) = db::sessions::persist_phase(&self.state.db, &snapshot).await {
                    warn!(session_id = %session_id, error = %e, "failed to persist auto-start");
                }
            }
            self.state
                .rooms
                .publish(
                    session_id,
                    &LiveEvent::SessionStarted {
                        session_id,
                        timestamp: now,
                    },
                )
                .await;
        }
        promoted
    }
}

/// Whether a scheduled start should auto-promote now
///
/// True iff the start falls on the current calendar day and is in the past
/// by no more than the grace window.
fn within_start_window(
    scheduled_at: DateTime<Utc>,
    now: DateTime<Utc>,
    grace_window: ChronoDuration,
) -> bool {
    if scheduled_at.date_naive() != now.date_naive() {
        return false;
    }
    let elapsed = now - scheduled_at;
    elapsed >= ChronoDuration::zero() && elapsed <= grace_window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_within_window_shortly_after_start() {
        let grace = ChronoDuration::minutes(5);
        assert!(within_start_window(
            at("2026-03-02T09:00:00Z"),
            at("2026-03-02T09:03:00Z"),
            grace
        ));
    }

    #[test]
    fn test_exact_start_and_window_edge_are_inside() {
        let grace = ChronoDuration::minutes(5);
        assert!(within_start_window(
            at("2026-03-02T09:00:00Z"),
            at("2026-03-02T09:00:00Z"),
            grace
        ));
        assert!(within_start_window(
            at("2026-03-02T09:00:00Z"),
            at("2026-03-02T09:05:00Z"),
            grace
        ));
    }

    #[test]
    fn test_stale_session_is_left_alone() {
        let grace = ChronoDuration::minutes(5);
        assert!(!within_start_window(
            at("2026-03-02T09:00:00Z"),
            at("2026-03-02T09:10:00Z"),
            grace
        ));
    }

    #[test]
    fn test_future_start_is_not_promoted_early() {
        let grace = ChronoDuration::minutes(5);
        assert!(!within_start_window(
            at("2026-03-02T09:00:00Z"),
            at("2026-03-02T08:59:00Z"),
            grace
        ));
    }

    #[test]
    fn test_other_calendar_day_is_ignored() {
        let grace = ChronoDuration::minutes(5);
        assert!(!within_start_window(
            at("2026-03-01T23:58:00Z"),
            at("2026-03-02T00:01:00Z"),
            grace
        ));
    }
}
