//! Settings database operations
//!
//! Key-value accessors over the `settings` table. The table is the
//! authoritative source for runtime-editable values such as provider API keys.

use sqlx::{Pool, Sqlite};
use dlg_common::{Error, Result};

/// Settings key holding a provider's API key (`openai_api_key`, `anthropic_api_key`)
pub fn api_key_setting(provider: &str) -> String {
    format!("{}_api_key", provider.to_ascii_lowercase())
}

/// Get a provider API key from the database
///
/// **Returns:** Some(key) if exists, None if not set
pub async fn get_api_key(db: &Pool<Sqlite>, provider: &str) -> Result<Option<String>> {
    get_setting::<String>(db, &api_key_setting(provider)).await
}

/// Set a provider API key in the database
pub async fn set_api_key(db: &Pool<Sqlite>, provider: &str, key: String) -> Result<()> {
    set_setting(db, &api_key_setting(provider), key).await
}

/// Maximum time to retry a write while SQLite reports lock contention
///
/// **Default:** 5000 ms
pub async fn get_max_lock_wait_ms(db: &Pool<Sqlite>) -> Result<u64> {
    get_setting(db, "voice_database_max_lock_wait_ms")
        .await
        .map(|opt| opt.unwrap_or(5000))
}

/// Age after which a PENDING session is considered abandoned
///
/// **Default:** 600 seconds
pub async fn get_pending_timeout_secs(db: &Pool<Sqlite>) -> Result<i64> {
    get_setting(db, "voice_pending_timeout_secs")
        .await
        .map(|opt| opt.unwrap_or(600))
}

/// Generic setting getter (internal)
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((value,)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting failed: {}", e)))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Generic setting setter (internal)
pub(crate) async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        sqlx::query(
            "CREATE TABLE settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .unwrap();

        pool
    }

    #[tokio::test]
    async fn test_api_key_absent_then_set() {
        let db = setup_test_db().await;

        assert_eq!(get_api_key(&db, "openai").await.unwrap(), None);

        set_api_key(&db, "OpenAI", "sk-one".to_string()).await.unwrap();
        assert_eq!(get_api_key(&db, "openai").await.unwrap().as_deref(), Some("sk-one"));

        // upsert replaces
        set_api_key(&db, "openai", "sk-two".to_string()).await.unwrap();
        assert_eq!(get_api_key(&db, "openai").await.unwrap().as_deref(), Some("sk-two"));
    }

    #[tokio::test]
    async fn test_numeric_settings_defaults() {
        let db = setup_test_db().await;

        assert_eq!(get_max_lock_wait_ms(&db).await.unwrap(), 5000);
        assert_eq!(get_pending_timeout_secs(&db).await.unwrap(), 600);

        set_setting(&db, "voice_pending_timeout_secs", 30).await.unwrap();
        assert_eq!(get_pending_timeout_secs(&db).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_unparseable_value_is_config_error() {
        let db = setup_test_db().await;
        set_setting(&db, "voice_database_max_lock_wait_ms", "soon").await.unwrap();

        let err = get_max_lock_wait_ms(&db).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
