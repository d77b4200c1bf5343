//! Standalone AI endpoints
//!
//! Unlike voice feedback, these have no partial-success mode: when the primary
//! and fallback models both fail the caller gets 502 `AI_SERVICE_FAILURE`.

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

use crate::api::CallerIdentity;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ConversationRequest {
    pub message: String,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Deserialize)]
pub struct LessonContentRequest {
    pub topic: String,
    #[serde(default = "default_difficulty")]
    pub difficulty: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "fr".to_string()
}

fn default_difficulty() -> String {
    "beginner".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AiTextResponse {
    pub text: String,
}

fn require(name: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} must not be empty", name)));
    }
    Ok(())
}

/// POST /ai/conversation
pub async fn conversation(
    State(state): State<AppState>,
    CallerIdentity(user_id): CallerIdentity,
    Json(request): Json<ConversationRequest>,
) -> ApiResult<Json<AiTextResponse>> {
    require("message", &request.message)?;
    tracing::debug!(user_id, language = %request.language, "Conversation reply requested");

    let context = request.context.as_deref().unwrap_or("free conversation");
    let text = state
        .responder
        .conversation_reply(&request.message, context, &request.language)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(AiTextResponse { text }))
}

/// POST /ai/lesson-content
pub async fn lesson_content(
    State(state): State<AppState>,
    CallerIdentity(user_id): CallerIdentity,
    Json(request): Json<LessonContentRequest>,
) -> ApiResult<Json<AiTextResponse>> {
    require("topic", &request.topic)?;
    tracing::debug!(user_id, topic = %request.topic, "Lesson content requested");

    let text = state
        .responder
        .lesson_content(&request.topic, &request.difficulty, &request.language)
        .await?;

    Ok(Json(AiTextResponse { text }))
}

/// Build AI routes
pub fn ai_routes() -> Router<AppState> {
    Router::new()
        .route("/ai/conversation", post(conversation))
        .route("/ai/lesson-content", post(lesson_content))
}
