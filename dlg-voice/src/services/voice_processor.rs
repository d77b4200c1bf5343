//! Voice session orchestrator
//!
//! Runs one submission end to end on its own tokio task:
//!
//! 1. Create the PROCESSING record
//! 2. Store audio (locator + estimated duration)
//! 3. Transcribe
//! 4. Score, when enabled and an expected text exists
//! 5. Ask for AI feedback, when enabled (non-fatal)
//! 6. Mark COMPLETED
//!
//! Every stage returns `Result<_, StageFailure>`. The first failure ends the
//! run: the session is marked FAILED with the failure's description, persisted,
//! and returned as an ordinary result. The orchestrator is the single owner of
//! the session and folds each stage's output into the next snapshot.

use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::SqlitePool;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use dlg_common::events::{DlgEvent, EventBus};

use crate::db::SessionStore;
use crate::models::{VoiceProcessingRequest, VoiceProcessingResult, VoiceSession};
use crate::services::ai_responder::AiResponder;
use crate::services::audio_store::{estimate_duration_ms, AudioStore};
use crate::services::scoring;
use crate::services::transcription::Transcriber;

/// Uploaded audio as received from the caller
#[derive(Debug, Clone)]
pub struct AudioPayload {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

impl AudioPayload {
    pub fn new(bytes: Vec<u8>, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            file_name: file_name.into(),
        }
    }
}

/// Pipeline stage, used in failures and progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    CreateRecord,
    StoreAudio,
    Transcribe,
    Score,
    Feedback,
    Finalize,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::CreateRecord => "create_record",
            Stage::StoreAudio => "store_audio",
            Stage::Transcribe => "transcribe",
            Stage::Score => "score",
            Stage::Feedback => "feedback",
            Stage::Finalize => "finalize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fatal stage outcome; `message` becomes the session's error message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: Stage, error: impl fmt::Display) -> Self {
        Self {
            stage,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Feedback payload stored on the session: `{feedback, generatedAt}`
pub fn feedback_payload(feedback: String) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("feedback".to_string(), Value::String(feedback));
    payload.insert(
        "generatedAt".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    payload
}

/// Orchestrates voice sessions
///
/// Cloning is cheap; every collaborator is shared.
#[derive(Clone)]
pub struct VoiceProcessor {
    store: Arc<dyn SessionStore>,
    audio_store: Arc<dyn AudioStore>,
    transcriber: Arc<dyn Transcriber>,
    responder: AiResponder,
    event_bus: EventBus,
}

impl VoiceProcessor {
    pub fn new(
        store: Arc<dyn SessionStore>,
        audio_store: Arc<dyn AudioStore>,
        transcriber: Arc<dyn Transcriber>,
        responder: AiResponder,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            audio_store,
            transcriber,
            responder,
            event_bus,
        }
    }

    /// Start processing on a new task and return its handle immediately
    ///
    /// The task always resolves to a result; stage failures surface as a
    /// FAILED result, never as a panic or error.
    pub fn submit(
        &self,
        audio: AudioPayload,
        request: VoiceProcessingRequest,
        user_id: i64,
    ) -> JoinHandle<VoiceProcessingResult> {
        let processor = self.clone();
        tokio::spawn(async move { processor.process(audio, request, user_id).await })
    }

    /// Run the full pipeline for one submission on the current task
    pub async fn process(
        &self,
        audio: AudioPayload,
        request: VoiceProcessingRequest,
        user_id: i64,
    ) -> VoiceProcessingResult {
        let session = VoiceSession::new(user_id, &request);
        let session_id = session.session_id;

        // 1. record exists before any other I/O
        if let Err(e) = self.store.create(&session).await {
            let failure = StageFailure::new(
                Stage::CreateRecord,
                format!("Failed to create voice session: {}", e),
            );
            tracing::error!(session_id = %session_id, error = %failure, "Voice session could not be recorded");
            return match session.clone().mark_failed(failure.message) {
                Ok(failed) => VoiceProcessingResult::from(&failed),
                Err(_) => VoiceProcessingResult::from(&session),
            };
        }

        tracing::info!(
            session_id = %session_id,
            user_id,
            session_type = %request.session_type,
            "Voice session started"
        );
        self.event_bus.emit_lossy(DlgEvent::VoiceSessionStarted {
            session_id,
            user_id,
            session_type: request.session_type.to_string(),
            timestamp: Utc::now(),
        });

        // 2. audio
        let session = match self.store_audio(&audio).await {
            Ok((locator, duration_ms)) => session.with_audio(locator, duration_ms),
            Err(failure) => return self.fail(session, failure).await,
        };
        if let Err(failure) = self.persist(&session, Stage::StoreAudio).await {
            return self.fail(session, failure).await;
        }

        // 3. transcript
        let session = match self
            .transcriber
            .transcribe(&audio.bytes, &audio.file_name, request.language.as_deref())
            .await
        {
            Ok(text) => session.with_transcript(text),
            Err(e) => return self.fail(session, StageFailure::new(Stage::Transcribe, e)).await,
        };
        if let Err(failure) = self.persist(&session, Stage::Transcribe).await {
            return self.fail(session, failure).await;
        }

        // 4. scores
        let scores = match (
            request.enable_scoring,
            session.transcribed_text.as_deref(),
            session.expected_text.as_deref(),
        ) {
            (true, Some(transcribed), Some(expected)) => {
                Some(scoring::compute_scores(transcribed, expected, session.duration_ms))
            }
            (true, _, None) => {
                tracing::debug!(session_id = %session_id, "No expected text, scoring skipped");
                None
            }
            _ => None,
        };
        let session = match scores {
            Some(scores) => {
                tracing::debug!(
                    session_id = %session_id,
                    accuracy = scores.accuracy,
                    confidence = scores.confidence,
                    pronunciation = scores.pronunciation,
                    fluency = scores.fluency,
                    "Scores computed"
                );
                let session = session.with_scores(scores);
                if let Err(failure) = self.persist(&session, Stage::Score).await {
                    return self.fail(session, failure).await;
                }
                session
            }
            None => session,
        };

        // 5. feedback (failure leaves the field unset)
        let session = if request.enable_feedback {
            match self.generate_feedback(&session).await {
                Some(feedback) => {
                    let session = session.with_feedback(feedback_payload(feedback));
                    if let Err(failure) = self.persist(&session, Stage::Feedback).await {
                        return self.fail(session, failure).await;
                    }
                    session
                }
                None => session,
            }
        } else {
            session
        };

        // 6. terminal
        let completed = match session.clone().mark_completed() {
            Ok(completed) => completed,
            Err(e) => return self.fail(session, StageFailure::new(Stage::Finalize, e)).await,
        };
        if let Err(failure) = self.persist(&completed, Stage::Finalize).await {
            return self.fail(session, failure).await;
        }

        tracing::info!(
            session_id = %session_id,
            accuracy = completed.scores.map(|s| s.accuracy),
            feedback = completed.ai_feedback.is_some(),
            "Voice session completed"
        );
        self.event_bus.emit_lossy(DlgEvent::VoiceSessionCompleted {
            session_id,
            accuracy_score: completed.scores.map(|s| s.accuracy),
            duration_ms: completed.duration_ms,
            timestamp: Utc::now(),
        });

        VoiceProcessingResult::from(&completed)
    }

    async fn store_audio(&self, audio: &AudioPayload) -> Result<(String, i64), StageFailure> {
        let locator = self
            .audio_store
            .save(&audio.bytes, &audio.file_name)
            .await
            .map_err(|e| StageFailure::new(Stage::StoreAudio, e))?;
        Ok((locator, estimate_duration_ms(audio.bytes.len())))
    }

    /// Feedback text, or None when skipped or both models failed
    async fn generate_feedback(&self, session: &VoiceSession) -> Option<String> {
        let session_id = session.session_id;

        let (Some(transcribed), Some(expected), Some(scores)) = (
            session.transcribed_text.as_deref(),
            session.expected_text.as_deref(),
            session.scores,
        ) else {
            tracing::info!(
                session_id = %session_id,
                "Feedback skipped: needs expected text and a confidence score"
            );
            return None;
        };

        match self
            .responder
            .voice_feedback(transcribed, expected, scores.confidence)
            .await
        {
            Ok(feedback) => Some(feedback),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "AI feedback unavailable");
                self.event_bus.emit_lossy(DlgEvent::VoiceFeedbackUnavailable {
                    session_id,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                None
            }
        }
    }

    /// Write the snapshot; a store error is fatal to the session
    async fn persist(&self, session: &VoiceSession, stage: Stage) -> Result<(), StageFailure> {
        self.store.update(session).await.map_err(|e| {
            StageFailure::new(stage, format!("Failed to persist voice session: {}", e))
        })?;

        self.event_bus.emit_lossy(DlgEvent::VoiceSessionProgress {
            session_id: session.session_id,
            stage: stage.to_string(),
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Mark FAILED, persist (best effort) and build the result
    async fn fail(&self, session: VoiceSession, failure: StageFailure) -> VoiceProcessingResult {
        let session_id = session.session_id;
        tracing::error!(
            session_id = %session_id,
            stage = %failure.stage,
            error = %failure,
            "Voice session failed"
        );

        let failed = match session.clone().mark_failed(failure.message.clone()) {
            Ok(failed) => failed,
            Err(e) => {
                tracing::error!(session_id = %session_id, error = %e, "Cannot mark session failed");
                return VoiceProcessingResult::from(&session);
            }
        };

        if let Err(e) = self.store.update(&failed).await {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Failed to persist FAILED status"
            );
        }

        self.event_bus.emit_lossy(DlgEvent::VoiceSessionFailed {
            session_id,
            error_message: failure.message,
            timestamp: Utc::now(),
        });

        VoiceProcessingResult::from(&failed)
    }
}

/// Periodically fail PENDING sessions older than the configured timeout
///
/// The timeout is re-read from settings on every tick.
pub fn spawn_pending_timeout_sweep(pool: SqlitePool, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;

            let timeout_secs = match crate::db::settings::get_pending_timeout_secs(&pool).await {
                Ok(secs) => secs,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read pending timeout, using default");
                    600
                }
            };
            let cutoff = Utc::now() - chrono::Duration::seconds(timeout_secs);

            match crate::db::voice_sessions::fail_timed_out_pending(&pool, cutoff).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "Failed timed-out PENDING voice sessions"),
                Err(e) => tracing::error!(error = %e, "Pending timeout sweep failed"),
            }
        }
    })
}
