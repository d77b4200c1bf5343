//! Audio persistence
//!
//! Stores raw uploaded audio and hands back a locator for the session record.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Audio store errors
#[derive(Debug, Error)]
pub enum AudioStoreError {
    #[error("Failed to store audio file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Empty audio payload")]
    Empty,
}

/// Durable storage for uploaded audio
#[async_trait]
pub trait AudioStore: Send + Sync {
    /// Store `bytes` and return a stable locator
    ///
    /// Any needed directory or namespace is created implicitly.
    async fn save(&self, bytes: &[u8], suggested_name: &str) -> Result<String, AudioStoreError>;
}

/// Estimated duration of an audio payload in milliseconds
///
/// `byte_len / 16`. This is a rough size-based estimate, not a decoded
/// duration; fluency scores depend on it staying this way.
pub fn estimate_duration_ms(byte_len: usize) -> i64 {
    (byte_len / 16) as i64
}

/// Replace anything outside `[A-Za-z0-9._-]` so the name is safe as a file name
pub fn sanitize_file_name(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.trim_matches('.').is_empty() {
        "recording".to_string()
    } else {
        sanitized
    }
}

/// Filesystem audio store rooted at `<root>/uploads/audio`
pub struct FsAudioStore {
    audio_dir: PathBuf,
}

impl FsAudioStore {
    pub fn new(root_folder: &Path) -> Self {
        Self {
            audio_dir: root_folder.join("uploads").join("audio"),
        }
    }

    pub fn audio_dir(&self) -> &Path {
        &self.audio_dir
    }
}

#[async_trait]
impl AudioStore for FsAudioStore {
    async fn save(&self, bytes: &[u8], suggested_name: &str) -> Result<String, AudioStoreError> {
        if bytes.is_empty() {
            return Err(AudioStoreError::Empty);
        }

        tokio::fs::create_dir_all(&self.audio_dir).await?;

        let file_name = format!(
            "audio_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            sanitize_file_name(suggested_name)
        );
        let path = self.audio_dir.join(file_name);

        tokio::fs::write(&path, bytes).await?;

        tracing::debug!(path = %path.display(), bytes = bytes.len(), "Stored audio file");

        Ok(path.to_string_lossy().into_owned())
    }
}
