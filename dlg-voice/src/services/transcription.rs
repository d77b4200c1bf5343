//! Speech-to-text client
//!
//! Single attempt per call. Retrying is left to callers (none do).

use async_trait::async_trait;
use infer::MatcherType;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use dlg_common::config::TranscriptionConfig;

use crate::services::audio_store::sanitize_file_name;

const USER_AGENT: &str = concat!("dialect-voice/", env!("CARGO_PKG_VERSION"));

/// Transcription failure
///
/// Transport, API and decoding errors all collapse into `Failed`.
#[derive(Debug, Error)]
pub enum TranscriptionError {
    #[error("Failed to transcribe audio: {0}")]
    Failed(String),
}

/// Remote speech-to-text service
///
/// `file_name` is the name the audio was uploaded under; services that pick a
/// decoder by extension need it.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
        language_hint: Option<&str>,
    ) -> Result<String, TranscriptionError>;
}

/// Container formats the transcription API decodes, keyed by file extension
const ACCEPTED_FORMATS: &[(&str, &str)] = &[
    ("flac", "audio/flac"),
    ("m4a", "audio/mp4"),
    ("mp3", "audio/mpeg"),
    ("mp4", "audio/mp4"),
    ("mpeg", "audio/mpeg"),
    ("mpga", "audio/mpeg"),
    ("oga", "audio/ogg"),
    ("ogg", "audio/ogg"),
    ("wav", "audio/wav"),
    ("webm", "audio/webm"),
];

const FALLBACK_FORMAT: (&str, &str) = ("wav", "audio/wav");

fn accepted_format(extension: &str) -> Option<(&'static str, &'static str)> {
    ACCEPTED_FORMATS
        .iter()
        .copied()
        .find(|(ext, _)| ext.eq_ignore_ascii_case(extension))
}

/// File name and content type of the multipart `file` part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDescriptor {
    pub file_name: String,
    pub mime_type: String,
}

/// Describe an upload by its content, then by its name
///
/// Magic bytes win over the declared extension, so a WebM recording named
/// `take.wav` goes out as `take.webm`. Unrecognized content keeps an accepted
/// declared extension; anything else is labelled WAV.
pub fn describe_upload(audio: &[u8], file_name: &str) -> UploadDescriptor {
    let sanitized = sanitize_file_name(file_name);
    let (stem, declared) = match sanitized.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), accepted_format(ext)),
        _ => (sanitized.clone(), None),
    };

    let sniffed = infer::get(audio)
        .filter(|kind| matches!(kind.matcher_type(), MatcherType::Audio | MatcherType::Video))
        .and_then(|kind| accepted_format(kind.extension()));

    let (extension, mime_type) = sniffed.or(declared).unwrap_or(FALLBACK_FORMAT);

    UploadDescriptor {
        file_name: format!("{}.{}", stem, extension),
        mime_type: mime_type.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// OpenAI-compatible `/audio/transcriptions` client (Whisper)
pub struct OpenAiTranscriber {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiTranscriber {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, TranscriptionError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;

        Ok(Self {
            http_client,
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }

    /// Build from the `[transcription]` TOML section and a resolved API key
    pub fn from_config(
        config: &TranscriptionConfig,
        api_key: Option<String>,
    ) -> Result<Self, TranscriptionError> {
        Self::new(
            &config.base_url,
            config.model.clone(),
            api_key,
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transcriber for OpenAiTranscriber {
    async fn transcribe(
        &self,
        audio: &[u8],
        file_name: &str,
        language_hint: Option<&str>,
    ) -> Result<String, TranscriptionError> {
        let upload = describe_upload(audio, file_name);
        let file_part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name(upload.file_name.clone())
            .mime_str(&upload.mime_type)
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone());
        if let Some(language) = language_hint {
            form = form.text("language", language.to_string());
        }

        let mut request = self.http_client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(
            bytes = audio.len(),
            file_name = %upload.file_name,
            mime_type = %upload.mime_type,
            language = language_hint.unwrap_or("auto"),
            "Requesting transcription"
        );

        let response = request
            .send()
            .await
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranscriptionError::Failed(format!(
                "API error {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Failed(format!("Invalid response: {}", e)))?;

        Ok(body.text)
    }
}
