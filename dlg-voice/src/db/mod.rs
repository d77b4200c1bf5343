//! Database access for dlg-voice
//!
//! SQLite database in the root folder holding voice session records and settings

pub mod settings;
pub mod voice_sessions;

pub use voice_sessions::{SessionStore, SqliteSessionStore};

use anyhow::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
///
/// Creates the parent directory and the database file if missing
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // mode=rwc: read, write, create
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;

    init_tables(&pool).await?;

    Ok(pool)
}

/// Create the settings and voice_sessions tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS voice_sessions (
            session_id TEXT PRIMARY KEY,
            user_id INTEGER NOT NULL,
            lesson_id INTEGER,
            session_type TEXT NOT NULL,
            audio_locator TEXT,
            transcribed_text TEXT,
            expected_text TEXT,
            confidence_score REAL,
            pronunciation_score REAL,
            accuracy_score REAL,
            fluency_score REAL,
            status TEXT NOT NULL,
            language TEXT,
            duration_ms INTEGER,
            ai_feedback TEXT,
            error_message TEXT,
            created_at TEXT NOT NULL,
            ended_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_voice_sessions_user_created
         ON voice_sessions (user_id, created_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (settings, voice_sessions)");

    Ok(())
}
