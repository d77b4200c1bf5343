//! Data models for dlg-voice (voice processing microservice)
//!
//! - Voice session state machine
//! - Submission request and processing result

pub mod voice_request;
pub mod voice_session;

pub use voice_request::{VoiceProcessingRequest, VoiceProcessingResult};
pub use voice_session::{
    ProcessingStatus, ScoreSet, SessionType, TransitionError, VoiceSession,
};
