//! Chat model backends
//!
//! Each backend turns a prompt into one completion. Backends never retry;
//! the fallback policy lives in [`crate::services::ai_responder`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use dlg_common::config::AiConfig;

const USER_AGENT: &str = concat!("dialect-voice/", env!("CARGO_PKG_VERSION"));
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;

/// Chat backend errors
#[derive(Debug, Error)]
pub enum ChatModelError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Response contained no completion")]
    MissingCompletion,

    #[error("Missing API key for {0}")]
    MissingApiKey(String),

    #[error("Unknown chat provider: {0}")]
    UnknownProvider(String),
}

/// A language model that completes a single prompt
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Backend name for logs and error messages
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, ChatModelError>;
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, ChatModelError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| ChatModelError::Network(e.to_string()))
}

async fn send_json<T: DeserializeOwned>(request: reqwest::RequestBuilder) -> Result<T, ChatModelError> {
    let response = request
        .send()
        .await
        .map_err(|e| ChatModelError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(ChatModelError::Api(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ChatModelError::Parse(e.to_string()))
}

/// Completion text as returned, blank included; only an absent one is an error
fn completion(text: Option<String>) -> Result<String, ChatModelError> {
    text.ok_or(ChatModelError::MissingCompletion)
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    content: Option<String>,
}

impl OpenAiResponse {
    fn into_text(self) -> Option<String> {
        self.choices.into_iter().next().and_then(|c| c.message.content)
    }
}

/// OpenAI chat completions (`{base_url}/chat/completions`)
pub struct OpenAiChatModel {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiChatModel {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ChatModelError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ChatModelError> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response: OpenAiResponse = send_json(
            self.http_client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body),
        )
        .await?;

        completion(response.into_text())
    }
}

// ---------------------------------------------------------------------------
// Anthropic
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl AnthropicResponse {
    fn into_text(self) -> Option<String> {
        let text: String = self
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect();
        Some(text)
    }
}

/// Anthropic messages API (`{base_url}/messages`)
pub struct AnthropicChatModel {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl AnthropicChatModel {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        api_key: String,
        timeout: Duration,
    ) -> Result<Self, ChatModelError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            endpoint: format!("{}/messages", base_url.trim_end_matches('/')),
            model: model.into(),
            api_key,
        })
    }
}

#[async_trait]
impl ChatModel for AnthropicChatModel {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ChatModelError> {
        let body = json!({
            "model": self.model,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }],
        });

        let response: AnthropicResponse = send_json(
            self.http_client
                .post(&self.endpoint)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body),
        )
        .await?;

        completion(response.into_text())
    }
}

// ---------------------------------------------------------------------------
// Ollama
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    #[serde(default)]
    response: Option<String>,
}

/// Local Ollama server (`{base_url}/api/generate`, non-streaming)
pub struct OllamaChatModel {
    http_client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl OllamaChatModel {
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ChatModelError> {
        Ok(Self {
            http_client: http_client(timeout)?,
            endpoint: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.into(),
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn complete(&self, prompt: &str) -> Result<String, ChatModelError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
        });

        let response: OllamaResponse =
            send_json(self.http_client.post(&self.endpoint).json(&body)).await?;

        completion(response.response)
    }
}

/// API keys resolved for the hosted providers
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    pub openai: Option<String>,
    pub anthropic: Option<String>,
}

/// Build the backend named by `provider` (`openai`, `anthropic`, `ollama`)
pub fn build_chat_model(
    provider: &str,
    config: &AiConfig,
    keys: &ProviderKeys,
) -> Result<Arc<dyn ChatModel>, ChatModelError> {
    let timeout = Duration::from_secs(config.request_timeout_secs);

    match provider.trim().to_ascii_lowercase().as_str() {
        "openai" => {
            let key = keys
                .openai
                .clone()
                .ok_or_else(|| ChatModelError::MissingApiKey("openai".to_string()))?;
            Ok(Arc::new(OpenAiChatModel::new(
                &config.openai_base_url,
                config.openai_model.clone(),
                key,
                timeout,
            )?))
        }
        "anthropic" => {
            let key = keys
                .anthropic
                .clone()
                .ok_or_else(|| ChatModelError::MissingApiKey("anthropic".to_string()))?;
            Ok(Arc::new(AnthropicChatModel::new(
                &config.anthropic_base_url,
                config.anthropic_model.clone(),
                key,
                timeout,
            )?))
        }
        "ollama" => Ok(Arc::new(OllamaChatModel::new(
            &config.ollama_base_url,
            config.ollama_model.clone(),
            timeout,
        )?)),
        other => Err(ChatModelError::UnknownProvider(other.to_string())),
    }
}
