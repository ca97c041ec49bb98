//! Server-Sent Events endpoints
//!
//! Per-session streams deliver room traffic to one viewer each; the
//! global stream mirrors every event for operator dashboards.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use futures::StreamExt;
use tokio_stream::wrappers::{BroadcastStream, ReceiverStream};
use uuid::Uuid;

use crate::state::AppState;

use super::handlers::ApiError;
use aula_common::Error;

/// Per-session event stream
///
/// Subscribes the caller to the session's room. The current session
/// state is delivered as the first event so a late-joining viewer
/// does not have to wait for the next change.
pub async fn session_events(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let snapshot = state
        .registry
        .snapshot(session_id)
        .await
        .ok_or_else(|| Error::NotFound(format!("session {}", session_id)))?;

    let (subscription_id, rx) = state.rooms.subscribe(session_id).await;
    state
        .rooms
        .send(session_id, subscription_id, &snapshot.to_state_event())
        .await;

    tracing::debug!(
        session_id = %session_id,
        subscription_id = subscription_id,
        "viewer connected to session stream"
    );

    let stream = ReceiverStream::new(rx)
        .map(|msg| Ok(Event::default().event(msg.event).data(msg.data)));

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}

/// Global event stream across all sessions
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.rooms.bus().subscribe();

    let stream = BroadcastStream::new(rx).filter_map(|result| async move {
        match result {
            Ok(event) => {
                let data = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("failed to serialize event: {}", e);
                        return None;
                    }
                };
                Some(Ok(Event::default().event(event.event_type()).data(data)))
            }
            // Lagged receiver; skip and keep streaming
            Err(_) => None,
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
