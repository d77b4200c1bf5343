//! Voice session endpoints
//!
//! - `POST /voice/process` submits audio and waits for the session result
//! - `GET /voice/session/:id` returns one of the caller's sessions
//! - `GET /voice/sessions` pages through the caller's sessions
//! - `GET /voice/stats` summarizes the caller's completed sessions

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::{voice_event_stream, CallerIdentity};
use crate::db::voice_sessions;
use crate::error::{ApiError, ApiResult};
use crate::models::{ProcessingStatus, SessionType, VoiceProcessingRequest, VoiceProcessingResult};
use crate::services::AudioPayload;
use crate::AppState;

/// Upload limit for `POST /voice/process` (matches the transcription API limit)
pub const MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;
const STATS_WINDOW_DAYS: i64 = 7;

/// Multipart fields of `POST /voice/process`
#[derive(Debug, Default)]
struct ProcessForm {
    audio: Option<AudioPayload>,
    session_type: Option<String>,
    expected_text: Option<String>,
    language: Option<String>,
    lesson_id: Option<String>,
    enable_feedback: Option<String>,
    enable_scoring: Option<String>,
}

fn parse_flag(name: &str, value: Option<String>) -> ApiResult<bool> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("true") => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") => Ok(false),
        Some(v) => Err(ApiError::BadRequest(format!("Invalid {}: {}", name, v))),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl ProcessForm {
    async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = ProcessForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == "audio" {
                let file_name = field.file_name().unwrap_or("recording").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read audio: {}", e)))?;
                form.audio = Some(AudioPayload::new(bytes.to_vec(), file_name));
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read field {}: {}", name, e)))?;

            match name.as_str() {
                "session_type" | "sessionType" => form.session_type = Some(value),
                "expected_text" | "expectedText" => form.expected_text = Some(value),
                "language" => form.language = Some(value),
                "lesson_id" | "lessonId" => form.lesson_id = Some(value),
                "enable_feedback" | "enableFeedback" => form.enable_feedback = Some(value),
                "enable_scoring" | "enableScoring" => form.enable_scoring = Some(value),
                other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
            }
        }

        Ok(form)
    }

    fn into_parts(self) -> ApiResult<(AudioPayload, VoiceProcessingRequest)> {
        let audio = self
            .audio
            .ok_or_else(|| ApiError::BadRequest("Missing audio file".to_string()))?;
        if audio.bytes.is_empty() {
            return Err(ApiError::BadRequest("Audio file is empty".to_string()));
        }

        let session_type: SessionType = self
            .session_type
            .ok_or_else(|| ApiError::BadRequest("Missing session_type".to_string()))?
            .parse()
            .map_err(ApiError::BadRequest)?;

        let lesson_id = non_blank(self.lesson_id)
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|_| ApiError::BadRequest(format!("Invalid lesson_id: {}", v)))
            })
            .transpose()?;

        let request = VoiceProcessingRequest {
            session_type,
            expected_text: non_blank(self.expected_text),
            language: non_blank(self.language),
            lesson_id,
            enable_feedback: parse_flag("enable_feedback", self.enable_feedback)?,
            enable_scoring: parse_flag("enable_scoring", self.enable_scoring)?,
        };

        Ok((audio, request))
    }
}

/// POST /voice/process
///
/// Spawns the session task and awaits its handle. A FAILED session is a normal
/// 200 response with `processing_status = FAILED`.
pub async fn process_voice(
    State(state): State<AppState>,
    CallerIdentity(user_id): CallerIdentity,
    multipart: Multipart,
) -> ApiResult<Json<VoiceProcessingResult>> {
    let (audio, request) = ProcessForm::read(multipart).await?.into_parts()?;

    tracing::debug!(
        user_id,
        bytes = audio.bytes.len(),
        session_type = %request.session_type,
        "Voice submission received"
    );

    let handle = state.processor.submit(audio, request, user_id);
    let result = handle
        .await
        .map_err(|e| ApiError::Internal(format!("Voice processing task aborted: {}", e)))?;

    if result.processing_status == ProcessingStatus::Failed {
        *state.last_error.write().await = result.error_message.clone();
    }

    Ok(Json(result))
}

/// GET /voice/session/:session_id
pub async fn get_voice_session(
    State(state): State<AppState>,
    CallerIdentity(user_id): CallerIdentity,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<VoiceProcessingResult>> {
    let session = voice_sessions::load_session(&state.db, session_id)
        .await?
        .filter(|s| s.user_id == user_id)
        .ok_or_else(|| ApiError::NotFound(format!("Voice session not found: {}", session_id)))?;

    Ok(Json(VoiceProcessingResult::from(&session)))
}

/// Query parameters of `GET /voice/sessions` (0-based page)
#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    #[serde(default)]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub size: u32,
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

/// One page of session results
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<VoiceProcessingResult>,
    pub page: u32,
    pub size: u32,
    pub total: i64,
    pub total_pages: i64,
}

/// GET /voice/sessions?page=0&size=20
pub async fn list_voice_sessions(
    State(state): State<AppState>,
    CallerIdentity(user_id): CallerIdentity,
    Query(query): Query<SessionListQuery>,
) -> ApiResult<Json<SessionListResponse>> {
    if query.size == 0 || query.size > MAX_PAGE_SIZE {
        return Err(ApiError::BadRequest(format!(
            "size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }

    let (sessions, total) =
        voice_sessions::list_for_user(&state.db, user_id, query.page, query.size).await?;
    let size = i64::from(query.size);

    Ok(Json(SessionListResponse {
        sessions: sessions.iter().map(VoiceProcessingResult::from).collect(),
        page: query.page,
        size: query.size,
        total,
        total_pages: (total + size - 1) / size,
    }))
}

/// Caller's aggregate numbers
#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceStatsResponse {
    pub average_confidence: Option<f64>,
    pub average_pronunciation: Option<f64>,
    pub completed_sessions: i64,
    pub sessions_last_7_days: i64,
}

/// GET /voice/stats
pub async fn voice_stats(
    State(state): State<AppState>,
    CallerIdentity(user_id): CallerIdentity,
) -> ApiResult<Json<VoiceStatsResponse>> {
    let averages = voice_sessions::average_scores_for_user(&state.db, user_id).await?;
    let since = Utc::now() - chrono::Duration::days(STATS_WINDOW_DAYS);
    let recent = voice_sessions::count_since(&state.db, user_id, since).await?;

    Ok(Json(VoiceStatsResponse {
        average_confidence: averages.average_confidence,
        average_pronunciation: averages.average_pronunciation,
        completed_sessions: averages.completed_sessions,
        sessions_last_7_days: recent,
    }))
}

/// Build voice routes
pub fn voice_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/voice/process",
            post(process_voice).layer(DefaultBodyLimit::max(MAX_AUDIO_BYTES)),
        )
        .route("/voice/session/:session_id", get(get_voice_session))
        .route("/voice/sessions", get(list_voice_sessions))
        .route("/voice/stats", get(voice_stats))
        .route("/voice/events", get(voice_event_stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_default_true_and_parse() {
        assert!(parse_flag("f", None).unwrap());
        assert!(parse_flag("f", Some("".to_string())).unwrap());
        assert!(!parse_flag("f", Some("FALSE".to_string())).unwrap());
        assert!(parse_flag("f", Some("maybe".to_string())).is_err());
    }

    #[test]
    fn test_form_requires_audio_and_session_type() {
        let form = ProcessForm {
            session_type: Some("DICTATION".to_string()),
            ..Default::default()
        };
        assert!(matches!(form.into_parts(), Err(ApiError::BadRequest(_))));

        let form = ProcessForm {
            audio: Some(AudioPayload::new(vec![1, 2, 3], "a.wav")),
            ..Default::default()
        };
        assert!(matches!(form.into_parts(), Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn test_form_builds_request() {
        let form = ProcessForm {
            audio: Some(AudioPayload::new(vec![1, 2, 3], "a.wav")),
            session_type: Some("pronunciation".to_string()),
            expected_text: Some("bonjour".to_string()),
            language: Some(" ".to_string()),
            lesson_id: Some("12".to_string()),
            enable_feedback: Some("false".to_string()),
            enable_scoring: None,
        };

        let (audio, request) = form.into_parts().unwrap();
        assert_eq!(audio.file_name, "a.wav");
        assert_eq!(request.session_type, SessionType::Pronunciation);
        assert_eq!(request.expected_text.as_deref(), Some("bonjour"));
        assert!(request.language.is_none());
        assert_eq!(request.lesson_id, Some(12));
        assert!(!request.enable_feedback);
        assert!(request.enable_scoring);
    }
}
