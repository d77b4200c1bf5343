//! Voice session state machine
//!
//! A session progresses PENDING → PROCESSING → {COMPLETED | FAILED}.
//! Transitions are one-directional and nothing leaves a terminal state.
//!
//! Sessions are folded forward by value: each pipeline stage hands its output
//! to a `with_*` method that consumes the previous snapshot and returns the
//! next one. The orchestrator owning the session is the only caller.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::VoiceProcessingRequest;

/// Kind of exercise the recording belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionType {
    Pronunciation,
    Conversation,
    Dictation,
    FreeSpeech,
}

impl SessionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionType::Pronunciation => "PRONUNCIATION",
            SessionType::Conversation => "CONVERSATION",
            SessionType::Dictation => "DICTATION",
            SessionType::FreeSpeech => "FREE_SPEECH",
        }
    }
}

impl fmt::Display for SessionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PRONUNCIATION" => Ok(SessionType::Pronunciation),
            "CONVERSATION" => Ok(SessionType::Conversation),
            "DICTATION" => Ok(SessionType::Dictation),
            "FREE_SPEECH" => Ok(SessionType::FreeSpeech),
            other => Err(format!("Unknown session type: {}", other)),
        }
    }
}

/// Processing status of a voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    /// Created but not yet picked up by a processor
    Pending,
    /// Pipeline running
    Processing,
    /// Pipeline finished (feedback may still be absent)
    Completed,
    /// A fatal stage failed; `error_message` carries the cause
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "PENDING",
            ProcessingStatus::Processing => "PROCESSING",
            ProcessingStatus::Completed => "COMPLETED",
            ProcessingStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Completed | ProcessingStatus::Failed)
    }

    /// Whether `self → next` is a legal forward transition
    pub fn can_transition_to(&self, next: ProcessingStatus) -> bool {
        use ProcessingStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Pending, Failed) | (Processing, Completed) | (Processing, Failed)
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(ProcessingStatus::Pending),
            "PROCESSING" => Ok(ProcessingStatus::Processing),
            "COMPLETED" => Ok(ProcessingStatus::Completed),
            "FAILED" => Ok(ProcessingStatus::Failed),
            other => Err(format!("Unknown processing status: {}", other)),
        }
    }
}

/// Rejected status change
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Illegal status transition for session {session_id}: {from} -> {to}")]
pub struct TransitionError {
    pub session_id: Uuid,
    pub from: ProcessingStatus,
    pub to: ProcessingStatus,
}

/// The four scores, always produced together
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreSet {
    pub accuracy: f64,
    pub confidence: f64,
    pub pronunciation: f64,
    pub fluency: f64,
}

/// One attempt at processing a single audio submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceSession {
    pub session_id: Uuid,
    pub user_id: i64,
    pub lesson_id: Option<i64>,
    pub session_type: SessionType,
    pub audio_locator: Option<String>,
    pub transcribed_text: Option<String>,
    pub expected_text: Option<String>,
    pub scores: Option<ScoreSet>,
    pub language: Option<String>,
    pub duration_ms: Option<i64>,
    pub ai_feedback: Option<Map<String, Value>>,
    pub(crate) status: ProcessingStatus,
    pub(crate) error_message: Option<String>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
}

impl VoiceSession {
    /// Create a session for a new submission, already in PROCESSING
    pub fn new(user_id: i64, request: &VoiceProcessingRequest) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            lesson_id: request.lesson_id,
            session_type: request.session_type,
            audio_locator: None,
            transcribed_text: None,
            expected_text: request.expected_text.clone(),
            scores: None,
            language: request.language.clone(),
            duration_ms: None,
            ai_feedback: None,
            status: ProcessingStatus::Processing,
            error_message: None,
            created_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn with_audio(self, audio_locator: String, duration_ms: i64) -> Self {
        Self {
            audio_locator: Some(audio_locator),
            duration_ms: Some(duration_ms),
            ..self
        }
    }

    pub fn with_transcript(self, transcribed_text: String) -> Self {
        Self {
            transcribed_text: Some(transcribed_text),
            ..self
        }
    }

    pub fn with_scores(self, scores: ScoreSet) -> Self {
        Self {
            scores: Some(scores),
            ..self
        }
    }

    pub fn with_feedback(self, feedback: Map<String, Value>) -> Self {
        Self {
            ai_feedback: Some(feedback),
            ..self
        }
    }

    /// PROCESSING → COMPLETED
    pub fn mark_completed(self) -> Result<Self, TransitionError> {
        self.transition_to(ProcessingStatus::Completed, None)
    }

    /// → FAILED, recording the cause
    pub fn mark_failed(
        self,
        error_message: impl Into<String>,
    ) -> Result<Self, TransitionError> {
        self.transition_to(ProcessingStatus::Failed, Some(error_message.into()))
    }

    fn transition_to(
        self,
        new_status: ProcessingStatus,
        error_message: Option<String>,
    ) -> Result<Self, TransitionError> {
        if !self.status.can_transition_to(new_status) {
            return Err(TransitionError {
                session_id: self.session_id,
                from: self.status,
                to: new_status,
            });
        }

        Ok(Self {
            status: new_status,
            error_message,
            ended_at: new_status.is_terminal().then(Utc::now),
            ..self
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> VoiceProcessingRequest {
        VoiceProcessingRequest {
            expected_text: Some("bonjour".to_string()),
            language: Some("fr".to_string()),
            lesson_id: Some(7),
            ..VoiceProcessingRequest::new(SessionType::Pronunciation)
        }
    }

    #[test]
    fn test_new_session_is_processing_and_unscored() {
        let session = VoiceSession::new(42, &request());

        assert_eq!(session.status(), ProcessingStatus::Processing);
        assert_eq!(session.user_id, 42);
        assert_eq!(session.lesson_id, Some(7));
        assert_eq!(session.expected_text.as_deref(), Some("bonjour"));
        assert!(session.scores.is_none());
        assert!(session.error_message().is_none());
        assert!(session.ended_at().is_none());
    }

    #[test]
    fn test_complete_sets_end_time_and_keeps_error_empty() {
        let session = VoiceSession::new(1, &request()).mark_completed().unwrap();

        assert_eq!(session.status(), ProcessingStatus::Completed);
        assert!(session.is_terminal());
        assert!(session.ended_at().is_some());
        assert!(session.error_message().is_none());
    }

    #[test]
    fn test_fail_records_message() {
        let session = VoiceSession::new(1, &request())
            .mark_failed("Failed to transcribe audio")
            .unwrap();

        assert_eq!(session.status(), ProcessingStatus::Failed);
        assert_eq!(session.error_message(), Some("Failed to transcribe audio"));
    }

    #[test]
    fn test_terminal_states_reject_further_transitions() {
        let completed = VoiceSession::new(1, &request()).mark_completed().unwrap();
        let err = completed.clone().mark_failed("late failure").unwrap_err();
        assert_eq!(err.from, ProcessingStatus::Completed);
        assert_eq!(err.to, ProcessingStatus::Failed);

        let failed = VoiceSession::new(1, &request()).mark_failed("boom").unwrap();
        assert!(failed.mark_completed().is_err());
    }

    #[test]
    fn test_transition_table_is_forward_only() {
        use ProcessingStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Pending.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Processing));
    }

    #[test]
    fn test_with_builders_fold_stage_output() {
        let session = VoiceSession::new(1, &request())
            .with_audio("uploads/audio/a.wav".to_string(), 1000)
            .with_transcript("bonjour".to_string());

        assert_eq!(session.audio_locator.as_deref(), Some("uploads/audio/a.wav"));
        assert_eq!(session.duration_ms, Some(1000));
        assert_eq!(session.transcribed_text.as_deref(), Some("bonjour"));
        assert_eq!(session.status(), ProcessingStatus::Processing);
    }

    #[test]
    fn test_status_and_type_string_round_trip() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Completed,
            ProcessingStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert_eq!("free_speech".parse::<SessionType>().unwrap(), SessionType::FreeSpeech);
        assert!("SINGING".parse::<SessionType>().is_err());
    }
}
