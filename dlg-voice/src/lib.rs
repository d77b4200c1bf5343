//! dlg-voice library interface
//!
//! Voice-session processing service: audio store → transcription → scoring →
//! optional AI feedback, persisted as an auditable session record.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use dlg_common::events::EventBus;

use crate::services::{AiResponder, VoiceProcessor};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Voice session orchestrator
    pub processor: VoiceProcessor,
    /// Primary/fallback responder for the standalone AI endpoints
    pub responder: AiResponder,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last error for diagnostic purposes
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        processor: VoiceProcessor,
        responder: AiResponder,
    ) -> Self {
        Self {
            db,
            event_bus,
            processor,
            responder,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::voice_routes())
        .merge(api::ai_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
