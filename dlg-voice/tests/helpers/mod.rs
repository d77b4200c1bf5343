//! Test Helper Utilities
//!
//! Scripted collaborators and database setup shared by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use dlg_common::events::EventBus;
use dlg_voice::db::{SessionStore, SqliteSessionStore};
use dlg_voice::models::VoiceSession;
use dlg_voice::services::{
    AiResponder, AudioStore, AudioStoreError, ChatModel, ChatModelError, Transcriber,
    TranscriptionError, VoiceProcessor,
};

/// Single-connection in-memory database with the service schema
///
/// One connection so every query sees the same in-memory database.
pub async fn create_test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    dlg_voice::db::init_tables(&pool)
        .await
        .expect("Failed to initialize schema");
    pool
}

/// Transcriber returning a fixed text or a fixed failure
pub struct ScriptedTranscriber {
    result: Result<String, String>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub hints: Mutex<Vec<Option<String>>>,
    pub file_names: Mutex<Vec<String>>,
}

impl ScriptedTranscriber {
    pub fn ok(text: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(text.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            hints: Mutex::new(Vec::new()),
            file_names: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message: &str) -> Arc<Self> {
        Arc::new(Self {
            result: Err(message.to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            hints: Mutex::new(Vec::new()),
            file_names: Mutex::new(Vec::new()),
        })
    }

    /// Successful transcriber that takes `delay` to answer
    pub fn slow(text: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(text.to_string()),
            delay,
            calls: AtomicUsize::new(0),
            hints: Mutex::new(Vec::new()),
            file_names: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for ScriptedTranscriber {
    async fn transcribe(
        &self,
        _audio: &[u8],
        file_name: &str,
        language_hint: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.file_names.lock().unwrap().push(file_name.to_string());
        self.hints
            .lock()
            .unwrap()
            .push(language_hint.map(str::to_string));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.result.clone().map_err(TranscriptionError::Failed)
    }
}

/// Chat model with a fixed reply or a fixed failure
pub struct ScriptedChatModel {
    name: &'static str,
    reply: Option<String>,
    pub calls: AtomicUsize,
}

impl ScriptedChatModel {
    pub fn ok(name: &'static str, reply: &str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: Some(reply.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            reply: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatModel for ScriptedChatModel {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, _prompt: &str) -> Result<String, ChatModelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.reply
            .clone()
            .ok_or_else(|| ChatModelError::Api(503, format!("{} overloaded", self.name)))
    }
}

/// Audio store keeping payloads in memory
#[derive(Default)]
pub struct MemoryAudioStore {
    pub saved: Mutex<Vec<(String, usize)>>,
}

#[async_trait]
impl AudioStore for MemoryAudioStore {
    async fn save(&self, bytes: &[u8], suggested_name: &str) -> Result<String, AudioStoreError> {
        let locator = format!("memory://{}/{}", Uuid::new_v4(), suggested_name);
        self.saved.lock().unwrap().push((locator.clone(), bytes.len()));
        Ok(locator)
    }
}

/// Audio store that always fails
pub struct FailingAudioStore;

#[async_trait]
impl AudioStore for FailingAudioStore {
    async fn save(&self, _bytes: &[u8], _suggested_name: &str) -> Result<String, AudioStoreError> {
        Err(AudioStoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "disk full",
        )))
    }
}

/// Session store whose writes all fail
pub struct UnavailableSessionStore;

#[async_trait]
impl SessionStore for UnavailableSessionStore {
    async fn create(&self, _session: &VoiceSession) -> dlg_common::Result<Uuid> {
        Err(dlg_common::Error::Internal("record store offline".to_string()))
    }

    async fn update(&self, _session: &VoiceSession) -> dlg_common::Result<()> {
        Err(dlg_common::Error::Internal("record store offline".to_string()))
    }

    async fn get(&self, _session_id: Uuid) -> dlg_common::Result<Option<VoiceSession>> {
        Ok(None)
    }
}

/// Collaborators for one processor under test
pub struct Harness {
    pub pool: SqlitePool,
    pub store: Arc<SqliteSessionStore>,
    pub event_bus: EventBus,
    pub processor: VoiceProcessor,
    pub responder: AiResponder,
}

/// Processor over an in-memory database with the given transcriber and models
pub async fn harness(
    transcriber: Arc<ScriptedTranscriber>,
    primary: Arc<ScriptedChatModel>,
    fallback: Option<Arc<ScriptedChatModel>>,
) -> Harness {
    harness_with_audio(transcriber, primary, fallback, Arc::new(MemoryAudioStore::default())).await
}

pub async fn harness_with_audio(
    transcriber: Arc<ScriptedTranscriber>,
    primary: Arc<ScriptedChatModel>,
    fallback: Option<Arc<ScriptedChatModel>>,
    audio_store: Arc<dyn AudioStore>,
) -> Harness {
    let pool = create_test_pool().await;
    let store = Arc::new(SqliteSessionStore::new(pool.clone()));
    let event_bus = EventBus::new(100);
    let responder = AiResponder::new(
        primary,
        fallback.map(|f| f as Arc<dyn ChatModel>),
        true,
    );
    let processor = VoiceProcessor::new(
        store.clone(),
        audio_store,
        transcriber,
        responder.clone(),
        event_bus.clone(),
    );

    Harness {
        pool,
        store,
        event_bus,
        processor,
        responder,
    }
}
