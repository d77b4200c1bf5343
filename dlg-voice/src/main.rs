//! dlg-voice - Voice Session Microservice
//!
//! Accepts recorded speech, transcribes and scores it against an expected
//! utterance, asks a language model for feedback, and keeps every attempt as a
//! queryable session record.

use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dlg_common::events::EventBus;
use dlg_voice::db::{self, SqliteSessionStore};
use dlg_voice::services::voice_processor::spawn_pending_timeout_sweep;
use dlg_voice::services::{
    build_chat_model, AiResponder, FsAudioStore, OpenAiTranscriber, VoiceProcessor,
};
use dlg_voice::AppState;

const DEFAULT_PORT: u16 = 5780;
const EVENT_BUS_CAPACITY: usize = 100;
const PENDING_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Command-line arguments for dlg-voice
#[derive(Parser, Debug)]
#[command(name = "dlg-voice")]
#[command(about = "Voice session microservice for Dialect")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides TOML `port`)
    #[arg(short, long, env = "DIALECT_VOICE_PORT")]
    port: Option<u16>,

    /// Root folder for the database and uploaded audio
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// TOML bootstrap config (default: <config_dir>/dialect/dlg-voice.toml)
    #[arg(short, long, env = "DIALECT_VOICE_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let toml_config = dlg_voice::config::load_bootstrap_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    // Initialize tracing (RUST_LOG wins over TOML logging.level)
    let file_layer = match &toml_config.logging.file {
        Some(path) => {
            let file = File::options()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    info!("Starting dlg-voice (Voice Session) microservice");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Root folder: CLI → ENV → TOML → OS default
    let root_folder = dlg_common::config::resolve_root_folder(
        args.root_folder.as_deref(),
        "DIALECT_ROOT_FOLDER",
        &toml_config,
    );
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = root_folder.join("dlg-voice.db");
    info!("Database: {}", db_path.display());
    let db_pool = db::init_database_pool(&db_path)
        .await
        .context("Failed to initialize database")?;

    // Sessions owned by tasks of a previous process can never finish
    let interrupted = db::voice_sessions::fail_interrupted_sessions(&db_pool).await?;
    if interrupted > 0 {
        warn!(count = interrupted, "Failed voice sessions interrupted by previous shutdown");
    }

    // Chat models
    let keys = dlg_voice::config::resolve_provider_keys(&db_pool, &toml_config).await?;
    let ai = &toml_config.ai;
    let primary = build_chat_model(&ai.provider, ai, &keys)
        .with_context(|| format!("Failed to configure primary AI provider '{}'", ai.provider))?;
    let fallback = if ai.enable_fallback && !ai.fallback_provider.eq_ignore_ascii_case(&ai.provider) {
        match build_chat_model(&ai.fallback_provider, ai, &keys) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!(
                    provider = %ai.fallback_provider,
                    "Fallback AI provider unavailable, continuing without fallback: {}", e
                );
                None
            }
        }
    } else {
        None
    };
    let responder = AiResponder::new(primary, fallback, ai.enable_fallback);
    info!(
        primary = responder.primary_name(),
        fallback = responder.fallback_name().unwrap_or("none"),
        "AI responder configured"
    );

    // Transcription
    let transcription_key = dlg_voice::config::transcription_api_key(&toml_config, &keys);
    if transcription_key.is_none() {
        warn!("No transcription API key configured; transcription requests will likely fail");
    }
    let transcriber = OpenAiTranscriber::from_config(&toml_config.transcription, transcription_key)
        .context("Failed to build transcription client")?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let processor = VoiceProcessor::new(
        Arc::new(SqliteSessionStore::new(db_pool.clone())),
        Arc::new(FsAudioStore::new(&root_folder)),
        Arc::new(transcriber),
        responder.clone(),
        event_bus.clone(),
    );

    let _sweeper = spawn_pending_timeout_sweep(db_pool.clone(), PENDING_SWEEP_INTERVAL);

    let state = AppState::new(db_pool, event_bus, processor, responder);
    let app = dlg_voice::build_router(state);

    let port = args.port.or(toml_config.port).unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
