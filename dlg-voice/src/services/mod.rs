//! Voice pipeline services
//!
//! Leaves first: scoring, audio store, transcription, chat models, AI
//! responder; the voice processor sequences them.

pub mod ai_responder;
pub mod audio_store;
pub mod chat_models;
pub mod scoring;
pub mod transcription;
pub mod voice_processor;

pub use ai_responder::{AiResponder, AiServiceError, PromptTemplate};
pub use audio_store::{AudioStore, AudioStoreError, FsAudioStore};
pub use chat_models::{build_chat_model, ChatModel, ChatModelError, ProviderKeys};
pub use transcription::{OpenAiTranscriber, Transcriber, TranscriptionError};
pub use voice_processor::{AudioPayload, Stage, StageFailure, VoiceProcessor};
