//! Event types for the dialect event system
//!
//! Provides shared event definitions and EventBus for all dialect modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Dialect event types
///
/// Events are broadcast via EventBus and can be serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DlgEvent {
    /// Voice session record created, pipeline running
    VoiceSessionStarted {
        session_id: Uuid,
        user_id: i64,
        session_type: String,
        timestamp: DateTime<Utc>,
    },

    /// Pipeline reached a stage boundary (audio stored, transcribed, scored...)
    VoiceSessionProgress {
        session_id: Uuid,
        stage: String,
        timestamp: DateTime<Utc>,
    },

    /// Feedback generation failed; the session still completes
    VoiceFeedbackUnavailable {
        session_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Session reached COMPLETED
    VoiceSessionCompleted {
        session_id: Uuid,
        accuracy_score: Option<f64>,
        duration_ms: Option<i64>,
        timestamp: DateTime<Utc>,
    },

    /// Session reached FAILED
    VoiceSessionFailed {
        session_id: Uuid,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DlgEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            DlgEvent::VoiceSessionStarted { .. } => "VoiceSessionStarted",
            DlgEvent::VoiceSessionProgress { .. } => "VoiceSessionProgress",
            DlgEvent::VoiceFeedbackUnavailable { .. } => "VoiceFeedbackUnavailable",
            DlgEvent::VoiceSessionCompleted { .. } => "VoiceSessionCompleted",
            DlgEvent::VoiceSessionFailed { .. } => "VoiceSessionFailed",
        }
    }

    /// Session this event belongs to
    pub fn session_id(&self) -> Uuid {
        match self {
            DlgEvent::VoiceSessionStarted { session_id, .. }
            | DlgEvent::VoiceSessionProgress { session_id, .. }
            | DlgEvent::VoiceFeedbackUnavailable { session_id, .. }
            | DlgEvent::VoiceSessionCompleted { session_id, .. }
            | DlgEvent::VoiceSessionFailed { session_id, .. } => *session_id,
        }
    }
}

/// Broadcast bus for dialect events
///
/// Cloning is cheap; all clones share the same channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DlgEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events to buffer before dropping old events
    ///
    /// # Examples
    ///
    /// ```
    /// use dlg_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<DlgEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: DlgEvent) -> Result<usize, broadcast::error::SendError<DlgEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: DlgEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
