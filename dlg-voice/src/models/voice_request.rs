//! Submission options and the result handed back to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::{ProcessingStatus, SessionType, VoiceSession};

/// Processing options supplied with an audio submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProcessingRequest {
    pub session_type: SessionType,
    #[serde(default)]
    pub expected_text: Option<String>,
    /// Language tag, also used as the transcription hint
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub lesson_id: Option<i64>,
    #[serde(default = "default_true")]
    pub enable_feedback: bool,
    #[serde(default = "default_true")]
    pub enable_scoring: bool,
}

fn default_true() -> bool {
    true
}

impl VoiceProcessingRequest {
    /// Request with no expected text and both feature flags enabled
    pub fn new(session_type: SessionType) -> Self {
        Self {
            session_type,
            expected_text: None,
            language: None,
            lesson_id: None,
            enable_feedback: true,
            enable_scoring: true,
        }
    }
}

/// Outcome of one voice session, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceProcessingResult {
    pub session_id: Uuid,
    pub transcribed_text: Option<String>,
    pub confidence_score: Option<f64>,
    pub pronunciation_score: Option<f64>,
    pub accuracy_score: Option<f64>,
    pub fluency_score: Option<f64>,
    pub processing_status: ProcessingStatus,
    pub ai_feedback: Option<Map<String, Value>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&VoiceSession> for VoiceProcessingResult {
    fn from(session: &VoiceSession) -> Self {
        let scores = session.scores;
        Self {
            session_id: session.session_id,
            transcribed_text: session.transcribed_text.clone(),
            confidence_score: scores.map(|s| s.confidence),
            pronunciation_score: scores.map(|s| s.pronunciation),
            accuracy_score: scores.map(|s| s.accuracy),
            fluency_score: scores.map(|s| s.fluency),
            processing_status: session.status(),
            ai_feedback: session.ai_feedback.clone(),
            error_message: session.error_message().map(str::to_string),
            created_at: session.created_at(),
        }
    }
}
