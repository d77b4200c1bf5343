//! Server-Sent Events (SSE) for voice session updates
//!
//! A client only sees events for sessions started by the same user after it
//! connected.

use crate::api::CallerIdentity;
use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use dlg_common::events::DlgEvent;
use futures::stream::Stream;
use std::collections::HashSet;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tracks which sessions belong to the connected user
#[derive(Debug, Default)]
pub(crate) struct SessionFilter {
    user_id: i64,
    owned: HashSet<Uuid>,
}

impl SessionFilter {
    pub(crate) fn new(user_id: i64) -> Self {
        Self {
            user_id,
            owned: HashSet::new(),
        }
    }

    /// Whether to forward `event`; updates the owned set as sessions start and end
    pub(crate) fn accept(&mut self, event: &DlgEvent) -> bool {
        match event {
            DlgEvent::VoiceSessionStarted { session_id, user_id, .. } => {
                if *user_id == self.user_id {
                    self.owned.insert(*session_id);
                    true
                } else {
                    false
                }
            }
            DlgEvent::VoiceSessionCompleted { session_id, .. }
            | DlgEvent::VoiceSessionFailed { session_id, .. } => self.owned.remove(session_id),
            other => self.owned.contains(&other.session_id()),
        }
    }
}

/// GET /voice/events - SSE event stream for the caller's voice sessions
///
/// Streams events:
/// - VoiceSessionStarted
/// - VoiceSessionProgress (after each persisted stage)
/// - VoiceFeedbackUnavailable
/// - VoiceSessionCompleted
/// - VoiceSessionFailed
pub async fn voice_event_stream(
    State(state): State<AppState>,
    CallerIdentity(user_id): CallerIdentity,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!(user_id, "New SSE client connected to voice events");

    let mut rx = state.event_bus.subscribe();
    let mut filter = SessionFilter::new(user_id);

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !filter.accept(&event) {
                        continue;
                    }

                    let event_type = event.event_type();
                    match serde_json::to_string(&event) {
                        Ok(event_json) => {
                            debug!("SSE: Broadcasting voice event: {}", event_type);
                            yield Ok(Event::default().event(event_type).data(event_json));
                        }
                        Err(e) => {
                            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(user_id, skipped, "SSE: client lagged, events dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
