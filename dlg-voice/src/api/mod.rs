//! HTTP API handlers for dlg-voice
//!
//! REST endpoints for voice sessions and standalone AI use cases, plus an SSE
//! stream of session events.

pub mod ai;
pub mod health;
pub mod sse;
pub mod voice;

pub use ai::ai_routes;
pub use health::health_routes;
pub use sse::voice_event_stream;
pub use voice::voice_routes;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;

/// Header carrying the authenticated user id, set by the upstream gateway
pub const USER_ID_HEADER: &str = "x-user-id";

/// Authenticated caller, taken from the `X-User-Id` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerIdentity(pub i64);

#[async_trait]
impl<S> FromRequestParts<S> for CallerIdentity
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or_else(|| ApiError::Unauthorized("Missing X-User-Id header".to_string()))?;

        value
            .to_str()
            .ok()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(CallerIdentity)
            .ok_or_else(|| ApiError::Unauthorized("Malformed X-User-Id header".to_string()))
    }
}
