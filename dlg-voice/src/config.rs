//! Configuration resolution for dlg-voice
//!
//! Provider API keys are resolved with Database → ENV → TOML priority. A key
//! found only in ENV or TOML is copied into the database so later edits happen
//! in one place.

use dlg_common::config::TomlConfig;
use dlg_common::{Error, Result};
use sqlx::{Pool, Sqlite};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

use crate::services::ProviderKeys;

/// Hosted providers that need an API key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyedProvider {
    OpenAi,
    Anthropic,
}

impl KeyedProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyedProvider::OpenAi => "openai",
            KeyedProvider::Anthropic => "anthropic",
        }
    }

    /// Environment variable consulted in the second tier
    pub fn env_var(&self) -> &'static str {
        match self {
            KeyedProvider::OpenAi => "DIALECT_OPENAI_API_KEY",
            KeyedProvider::Anthropic => "DIALECT_ANTHROPIC_API_KEY",
        }
    }

    fn toml_key<'a>(&self, config: &'a TomlConfig) -> Option<&'a String> {
        match self {
            KeyedProvider::OpenAi => config.ai.openai_api_key.as_ref(),
            KeyedProvider::Anthropic => config.ai.anthropic_api_key.as_ref(),
        }
    }
}

/// Where a resolved key came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Database,
    Environment,
    Toml,
}

impl fmt::Display for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeySource::Database => "database",
            KeySource::Environment => "environment",
            KeySource::Toml => "TOML",
        })
    }
}

/// Validate API key (non-empty, non-whitespace)
pub fn is_valid_key(key: &str) -> bool {
    !key.trim().is_empty()
}

/// Resolve one provider's API key
///
/// **Priority:** Database → ENV → TOML. Returns None when no tier has a valid
/// key; callers decide whether that is fatal.
pub async fn resolve_api_key(
    db: &Pool<Sqlite>,
    provider: KeyedProvider,
    toml_config: &TomlConfig,
) -> Result<Option<(String, KeySource)>> {
    let db_key = crate::db::settings::get_api_key(db, provider.as_str())
        .await?
        .filter(|k| is_valid_key(k));
    let env_key = std::env::var(provider.env_var())
        .ok()
        .filter(|k| is_valid_key(k));
    let toml_key = provider
        .toml_key(toml_config)
        .filter(|k| is_valid_key(k))
        .cloned();

    let candidates = [
        (db_key, KeySource::Database),
        (env_key, KeySource::Environment),
        (toml_key, KeySource::Toml),
    ];

    let sources: Vec<String> = candidates
        .iter()
        .filter(|(key, _)| key.is_some())
        .map(|(_, source)| source.to_string())
        .collect();
    if sources.len() > 1 {
        warn!(
            provider = provider.as_str(),
            "API key found in multiple sources: {}. Using {} (highest priority).",
            sources.join(", "),
            sources[0]
        );
    }

    let resolved = candidates
        .into_iter()
        .find_map(|(key, source)| key.map(|k| (k, source)));

    match &resolved {
        Some((_, source)) => info!(provider = provider.as_str(), "API key loaded from {}", source),
        None => info!(provider = provider.as_str(), "No API key configured"),
    }

    Ok(resolved)
}

/// Copy an ENV- or TOML-sourced key into the settings table
pub async fn migrate_key_to_database(
    db: &Pool<Sqlite>,
    provider: KeyedProvider,
    key: String,
    source: KeySource,
) -> Result<()> {
    if source == KeySource::Database {
        return Ok(());
    }

    crate::db::settings::set_api_key(db, provider.as_str(), key).await?;
    info!(provider = provider.as_str(), "API key migrated from {} to database", source);
    Ok(())
}

/// Resolve both hosted-provider keys, migrating them into the database
pub async fn resolve_provider_keys(db: &Pool<Sqlite>, toml_config: &TomlConfig) -> Result<ProviderKeys> {
    let mut keys = ProviderKeys::default();

    for provider in [KeyedProvider::OpenAi, KeyedProvider::Anthropic] {
        let Some((key, source)) = resolve_api_key(db, provider, toml_config).await? else {
            continue;
        };

        if let Err(e) = migrate_key_to_database(db, provider, key.clone(), source).await {
            warn!(provider = provider.as_str(), "API key migration failed: {}", e);
        }

        match provider {
            KeyedProvider::OpenAi => keys.openai = Some(key),
            KeyedProvider::Anthropic => keys.anthropic = Some(key),
        }
    }

    Ok(keys)
}

/// Transcription key: `[transcription].api_key`, else the OpenAI key
pub fn transcription_api_key(toml_config: &TomlConfig, keys: &ProviderKeys) -> Option<String> {
    toml_config
        .transcription
        .api_key
        .clone()
        .filter(|k| is_valid_key(k))
        .or_else(|| keys.openai.clone())
}

/// Load the TOML bootstrap file, or defaults when `path` is None and no
/// default location exists
pub fn load_bootstrap_config(path: Option<&Path>) -> Result<TomlConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => match dlg_common::config::default_config_path("dlg-voice") {
            Ok(p) => p,
            Err(e) => {
                warn!("{}; using built-in defaults", e);
                return Ok(TomlConfig::default());
            }
        },
    };

    dlg_common::config::load_toml_config(&path)
        .map_err(|e| Error::Config(format!("{} ({})", e, path.display())))
}
