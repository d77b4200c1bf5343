//! Voice session database operations
//!
//! One row per session. Each row has a single writer, the processing task that
//! created it, so writes are plain upserts retried on lock contention.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use dlg_common::{Error, Result};

use crate::db::settings;
use crate::models::{ProcessingStatus, ScoreSet, SessionType, VoiceSession};
use crate::utils::retry_on_lock;

/// Error message written to sessions left unfinished by a previous process
pub const INTERRUPTED_MESSAGE: &str = "Processing interrupted by service restart";

/// Error message written to PENDING sessions nobody picked up in time
pub const TIMED_OUT_MESSAGE: &str = "Processing timed out before it started";

/// Durable record store for voice sessions
///
/// Every method returns only after the write is durable.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session record, returning its id
    async fn create(&self, session: &VoiceSession) -> Result<Uuid>;

    /// Overwrite the record with the given snapshot
    async fn update(&self, session: &VoiceSession) -> Result<()>;

    async fn get(&self, session_id: Uuid) -> Result<Option<VoiceSession>>;
}

/// `SessionStore` backed by the service's SQLite pool
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &VoiceSession) -> Result<Uuid> {
        save_session(&self.pool, session).await?;
        Ok(session.session_id)
    }

    async fn update(&self, session: &VoiceSession) -> Result<()> {
        save_session(&self.pool, session).await
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<VoiceSession>> {
        load_session(&self.pool, session_id).await
    }
}

/// Average scores over a user's completed sessions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserScoreAverages {
    pub average_confidence: Option<f64>,
    pub average_pronunciation: Option<f64>,
    pub completed_sessions: i64,
}

fn timestamp(dt: DateTime<Utc>) -> String {
    // Fixed width so lexical order in SQL matches chronological order
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Insert or replace a session row
///
/// Uses retry_on_lock to ride out transient lock contention
pub async fn save_session(pool: &SqlitePool, session: &VoiceSession) -> Result<()> {
    // Prepare all data before touching the pool
    let session_id = session.session_id.to_string();
    let scores = session.scores;
    let ai_feedback = session
        .ai_feedback
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to serialize ai_feedback: {}", e)))?;
    let created_at = timestamp(session.created_at());
    let ended_at = session.ended_at().map(timestamp);

    let max_wait_ms = settings::get_max_lock_wait_ms(pool).await?;

    retry_on_lock("save_voice_session", max_wait_ms, || async {
        sqlx::query(
            r#"
            INSERT INTO voice_sessions (
                session_id, user_id, lesson_id, session_type,
                audio_locator, transcribed_text, expected_text,
                confidence_score, pronunciation_score, accuracy_score, fluency_score,
                status, language, duration_ms, ai_feedback, error_message,
                created_at, ended_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                audio_locator = excluded.audio_locator,
                transcribed_text = excluded.transcribed_text,
                confidence_score = excluded.confidence_score,
                pronunciation_score = excluded.pronunciation_score,
                accuracy_score = excluded.accuracy_score,
                fluency_score = excluded.fluency_score,
                status = excluded.status,
                duration_ms = excluded.duration_ms,
                ai_feedback = excluded.ai_feedback,
                error_message = excluded.error_message,
                ended_at = excluded.ended_at
            "#,
        )
        .bind(&session_id)
        .bind(session.user_id)
        .bind(session.lesson_id)
        .bind(session.session_type.as_str())
        .bind(&session.audio_locator)
        .bind(&session.transcribed_text)
        .bind(&session.expected_text)
        .bind(scores.map(|s| s.confidence))
        .bind(scores.map(|s| s.pronunciation))
        .bind(scores.map(|s| s.accuracy))
        .bind(scores.map(|s| s.fluency))
        .bind(session.status().as_str())
        .bind(&session.language)
        .bind(session.duration_ms)
        .bind(&ai_feedback)
        .bind(session.error_message())
        .bind(&created_at)
        .bind(&ended_at)
        .execute(pool)
        .await
        .map_err(Error::Database)?;

        Ok(())
    })
    .await
}

const SELECT_COLUMNS: &str = r#"
    SELECT session_id, user_id, lesson_id, session_type,
           audio_locator, transcribed_text, expected_text,
           confidence_score, pronunciation_score, accuracy_score, fluency_score,
           status, language, duration_ms, ai_feedback, error_message,
           created_at, ended_at
    FROM voice_sessions
"#;

fn session_from_row(row: &SqliteRow) -> Result<VoiceSession> {
    let session_id: String = row.get("session_id");
    let session_id = Uuid::parse_str(&session_id)
        .map_err(|e| Error::Internal(format!("Failed to parse session_id: {}", e)))?;

    let session_type: String = row.get("session_type");
    let session_type: SessionType = session_type.parse().map_err(Error::Internal)?;

    let status: String = row.get("status");
    let status: ProcessingStatus = status.parse().map_err(Error::Internal)?;

    let scores = match (
        row.get::<Option<f64>, _>("accuracy_score"),
        row.get::<Option<f64>, _>("confidence_score"),
        row.get::<Option<f64>, _>("pronunciation_score"),
        row.get::<Option<f64>, _>("fluency_score"),
    ) {
        (Some(accuracy), Some(confidence), Some(pronunciation), Some(fluency)) => Some(ScoreSet {
            accuracy,
            confidence,
            pronunciation,
            fluency,
        }),
        _ => None,
    };

    let ai_feedback: Option<String> = row.get("ai_feedback");
    let ai_feedback = ai_feedback
        .map(|s| serde_json::from_str::<Map<String, Value>>(&s))
        .transpose()
        .map_err(|e| Error::Internal(format!("Failed to deserialize ai_feedback: {}", e)))?;

    let created_at: String = row.get("created_at");
    let created_at = parse_timestamp("created_at", &created_at)?;

    let ended_at: Option<String> = row.get("ended_at");
    let ended_at = ended_at
        .map(|s| parse_timestamp("ended_at", &s))
        .transpose()?;

    Ok(VoiceSession {
        session_id,
        user_id: row.get("user_id"),
        lesson_id: row.get("lesson_id"),
        session_type,
        audio_locator: row.get("audio_locator"),
        transcribed_text: row.get("transcribed_text"),
        expected_text: row.get("expected_text"),
        scores,
        language: row.get("language"),
        duration_ms: row.get("duration_ms"),
        ai_feedback,
        status,
        error_message: row.get("error_message"),
        created_at,
        ended_at,
    })
}

/// Load a session by id
pub async fn load_session(pool: &SqlitePool, session_id: Uuid) -> Result<Option<VoiceSession>> {
    let row = sqlx::query(&format!("{} WHERE session_id = ?", SELECT_COLUMNS))
        .bind(session_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(session_from_row).transpose()
}

/// One page of a user's sessions, newest first, plus the user's total count
pub async fn list_for_user(
    pool: &SqlitePool,
    user_id: i64,
    page: u32,
    page_size: u32,
) -> Result<(Vec<VoiceSession>, i64)> {
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM voice_sessions WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    let offset = i64::from(page) * i64::from(page_size);
    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        SELECT_COLUMNS
    ))
    .bind(user_id)
    .bind(i64::from(page_size))
    .bind(offset)
    .fetch_all(pool)
    .await?;

    let sessions = rows.iter().map(session_from_row).collect::<Result<Vec<_>>>()?;
    Ok((sessions, total))
}

/// All of a user's sessions for one lesson, newest first
pub async fn list_for_user_and_lesson(
    pool: &SqlitePool,
    user_id: i64,
    lesson_id: i64,
) -> Result<Vec<VoiceSession>> {
    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? AND lesson_id = ? ORDER BY created_at DESC",
        SELECT_COLUMNS
    ))
    .bind(user_id)
    .bind(lesson_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(session_from_row).collect()
}

/// All of a user's sessions of one type, newest first
pub async fn list_for_user_by_type(
    pool: &SqlitePool,
    user_id: i64,
    session_type: SessionType,
) -> Result<Vec<VoiceSession>> {
    let rows = sqlx::query(&format!(
        "{} WHERE user_id = ? AND session_type = ? ORDER BY created_at DESC",
        SELECT_COLUMNS
    ))
    .bind(user_id)
    .bind(session_type.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(session_from_row).collect()
}

/// Average confidence and pronunciation over the user's COMPLETED sessions
///
/// Averages are None when no completed session carries scores.
pub async fn average_scores_for_user(pool: &SqlitePool, user_id: i64) -> Result<UserScoreAverages> {
    let row = sqlx::query(
        r#"
        SELECT AVG(confidence_score) AS average_confidence,
               AVG(pronunciation_score) AS average_pronunciation,
               COUNT(*) AS completed_sessions
        FROM voice_sessions
        WHERE user_id = ? AND status = 'COMPLETED'
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(UserScoreAverages {
        average_confidence: row.get("average_confidence"),
        average_pronunciation: row.get("average_pronunciation"),
        completed_sessions: row.get("completed_sessions"),
    })
}

/// Number of sessions the user started at or after `since`
pub async fn count_since(pool: &SqlitePool, user_id: i64, since: DateTime<Utc>) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM voice_sessions WHERE user_id = ? AND created_at >= ?",
    )
    .bind(user_id)
    .bind(timestamp(since))
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Fail PENDING sessions created before `older_than`
///
/// PENDING → FAILED is the only transition out of PENDING that this service
/// performs on its own.
pub async fn fail_timed_out_pending(pool: &SqlitePool, older_than: DateTime<Utc>) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE voice_sessions
        SET status = 'FAILED',
            error_message = ?,
            ended_at = ?
        WHERE status = 'PENDING' AND created_at < ?
        "#,
    )
    .bind(TIMED_OUT_MESSAGE)
    .bind(timestamp(Utc::now()))
    .bind(timestamp(older_than))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

/// Fail sessions left non-terminal by a previous run
///
/// Called once at startup. The task that owned such a session died with the
/// old process, so the session can never progress.
pub async fn fail_interrupted_sessions(pool: &SqlitePool) -> Result<usize> {
    let result = sqlx::query(
        r#"
        UPDATE voice_sessions
        SET status = 'FAILED',
            error_message = ?,
            ended_at = ?
        WHERE status NOT IN ('COMPLETED', 'FAILED')
        "#,
    )
    .bind(INTERRUPTED_MESSAGE)
    .bind(timestamp(Utc::now()))
    .execute(pool)
    .await?;

    Ok(result.rows_affected() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoiceProcessingRequest;
    use chrono::Duration;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_tables(&pool).await.unwrap();
        pool
    }

    fn session_for(user_id: i64, session_type: SessionType, lesson_id: Option<i64>) -> VoiceSession {
        let request = VoiceProcessingRequest {
            expected_text: Some("bonjour".to_string()),
            language: Some("fr".to_string()),
            lesson_id,
            ..VoiceProcessingRequest::new(session_type)
        };
        VoiceSession::new(user_id, &request)
    }

    fn completed(session: VoiceSession, confidence: f64, pronunciation: f64) -> VoiceSession {
        session
            .with_scores(ScoreSet {
                accuracy: 1.0,
                confidence,
                pronunciation,
                fluency: 0.5,
            })
            .mark_completed()
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_then_get_round_trips_fields() {
        let pool = setup_test_db().await;
        let store = SqliteSessionStore::new(pool);

        let mut feedback = Map::new();
        feedback.insert("feedback".to_string(), Value::String("Great".to_string()));

        let session = session_for(5, SessionType::Pronunciation, Some(9))
            .with_audio("uploads/audio/audio_1_a.wav".to_string(), 2000)
            .with_transcript("bonjour".to_string())
            .with_feedback(feedback.clone());

        let id = store.create(&session).await.unwrap();
        assert_eq!(id, session.session_id);

        let loaded = store.get(id).await.unwrap().unwrap();
        assert_eq!(loaded.user_id, 5);
        assert_eq!(loaded.lesson_id, Some(9));
        assert_eq!(loaded.session_type, SessionType::Pronunciation);
        assert_eq!(loaded.status(), ProcessingStatus::Processing);
        assert_eq!(loaded.duration_ms, Some(2000));
        assert_eq!(loaded.transcribed_text.as_deref(), Some("bonjour"));
        assert_eq!(loaded.ai_feedback, Some(feedback));
        assert!(loaded.scores.is_none());
        assert_eq!(
            timestamp(loaded.created_at()),
            timestamp(session.created_at())
        );
    }

    #[tokio::test]
    async fn test_update_overwrites_status_and_scores() {
        let pool = setup_test_db().await;
        let store = SqliteSessionStore::new(pool);

        let session = session_for(1, SessionType::Dictation, None);
        store.create(&session).await.unwrap();

        let session = completed(session, 0.7, 0.85);
        store.update(&session).await.unwrap();

        let loaded = store.get(session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), ProcessingStatus::Completed);
        assert!(loaded.ended_at().is_some());
        assert_eq!(loaded.scores.unwrap().confidence, 0.7);
        assert!(loaded.error_message().is_none());
    }

    #[tokio::test]
    async fn test_get_unknown_session_is_none() {
        let pool = setup_test_db().await;
        let store = SqliteSessionStore::new(pool);
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_for_user_paginates_newest_first() {
        let pool = setup_test_db().await;

        let mut ids = Vec::new();
        for _ in 0..5 {
            let session = session_for(1, SessionType::FreeSpeech, None);
            save_session(&pool, &session).await.unwrap();
            ids.push(session.session_id);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        save_session(&pool, &session_for(2, SessionType::FreeSpeech, None))
            .await
            .unwrap();

        let (first, total) = list_for_user(&pool, 1, 0, 2).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].session_id, ids[4]);
        assert_eq!(first[1].session_id, ids[3]);

        let (last, _) = list_for_user(&pool, 1, 2, 2).await.unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0].session_id, ids[0]);
    }

    #[tokio::test]
    async fn test_filters_by_lesson_and_type() {
        let pool = setup_test_db().await;

        save_session(&pool, &session_for(1, SessionType::Pronunciation, Some(3))).await.unwrap();
        save_session(&pool, &session_for(1, SessionType::Conversation, Some(3))).await.unwrap();
        save_session(&pool, &session_for(1, SessionType::Pronunciation, Some(4))).await.unwrap();
        save_session(&pool, &session_for(2, SessionType::Pronunciation, Some(3))).await.unwrap();

        assert_eq!(list_for_user_and_lesson(&pool, 1, 3).await.unwrap().len(), 2);
        assert_eq!(
            list_for_user_by_type(&pool, 1, SessionType::Pronunciation)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_averages_only_count_completed_sessions() {
        let pool = setup_test_db().await;

        save_session(&pool, &completed(session_for(1, SessionType::Dictation, None), 0.6, 0.8))
            .await
            .unwrap();
        save_session(&pool, &completed(session_for(1, SessionType::Dictation, None), 0.8, 0.6))
            .await
            .unwrap();
        let failed = session_for(1, SessionType::Dictation, None)
            .mark_failed("boom")
            .unwrap();
        save_session(&pool, &failed).await.unwrap();

        let averages = average_scores_for_user(&pool, 1).await.unwrap();
        assert_eq!(averages.completed_sessions, 2);
        assert!((averages.average_confidence.unwrap() - 0.7).abs() < 1e-9);
        assert!((averages.average_pronunciation.unwrap() - 0.7).abs() < 1e-9);

        let empty = average_scores_for_user(&pool, 99).await.unwrap();
        assert_eq!(empty.completed_sessions, 0);
        assert!(empty.average_confidence.is_none());
    }

    #[tokio::test]
    async fn test_count_since() {
        let pool = setup_test_db().await;
        save_session(&pool, &session_for(1, SessionType::Dictation, None)).await.unwrap();

        assert_eq!(count_since(&pool, 1, Utc::now() - Duration::days(7)).await.unwrap(), 1);
        assert_eq!(count_since(&pool, 1, Utc::now() + Duration::days(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fail_timed_out_pending_only_touches_old_pending_rows() {
        let pool = setup_test_db().await;

        let mut pending = session_for(1, SessionType::Dictation, None);
        pending.status = ProcessingStatus::Pending;
        pending.created_at = Utc::now() - Duration::hours(1);
        save_session(&pool, &pending).await.unwrap();

        let mut fresh = session_for(1, SessionType::Dictation, None);
        fresh.status = ProcessingStatus::Pending;
        save_session(&pool, &fresh).await.unwrap();

        let processing = session_for(1, SessionType::Dictation, None);
        save_session(&pool, &processing).await.unwrap();

        let failed = fail_timed_out_pending(&pool, Utc::now() - Duration::minutes(10))
            .await
            .unwrap();
        assert_eq!(failed, 1);

        let loaded = load_session(&pool, pending.session_id).await.unwrap().unwrap();
        assert_eq!(loaded.status(), ProcessingStatus::Failed);
        assert_eq!(loaded.error_message(), Some(TIMED_OUT_MESSAGE));

        let fresh = load_session(&pool, fresh.session_id).await.unwrap().unwrap();
        assert_eq!(fresh.status(), ProcessingStatus::Pending);
    }

    #[tokio::test]
    async fn test_fail_interrupted_sessions_leaves_terminal_rows() {
        let pool = setup_test_db().await;

        let running = session_for(1, SessionType::Dictation, None);
        save_session(&pool, &running).await.unwrap();
        let done = completed(session_for(1, SessionType::Dictation, None), 0.5, 0.5);
        save_session(&pool, &done).await.unwrap();

        assert_eq!(fail_interrupted_sessions(&pool).await.unwrap(), 1);

        let running = load_session(&pool, running.session_id).await.unwrap().unwrap();
        assert_eq!(running.status(), ProcessingStatus::Failed);
        assert_eq!(running.error_message(), Some(INTERRUPTED_MESSAGE));
        assert!(running.ended_at().is_some());

        let done = load_session(&pool, done.session_id).await.unwrap().unwrap();
        assert_eq!(done.status(), ProcessingStatus::Completed);
    }
}
