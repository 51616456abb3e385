//! Settings database operations
//!
//! Get/set accessors for the key-value settings table.

use reconlab_common::{Error, Result};
use sqlx::{Pool, Sqlite};

/// Settings key holding the registry API token
pub const REGISTRY_API_TOKEN_KEY: &str = "registry_api_token";

/// Get registry API token from database
///
/// **Returns:** Some(token) if set, None otherwise
pub async fn get_registry_api_token(db: &Pool<Sqlite>) -> Result<Option<String>> {
    get_setting::<String>(db, REGISTRY_API_TOKEN_KEY).await
}

/// Set registry API token in database
pub async fn set_registry_api_token(db: &Pool<Sqlite>, token: String) -> Result<()> {
    set_setting(db, REGISTRY_API_TOKEN_KEY, token).await
}

/// Generic setting getter (internal)
async fn get_setting<T>(db: &Pool<Sqlite>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let row: Option<(Option<String>,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(db)
        .await
        .map_err(Error::Database)?;

    match row {
        Some((Some(value),)) => {
            let parsed = value
                .parse::<T>()
                .map_err(|e| Error::Config(format!("Parse setting failed: {}", e)))?;
            Ok(Some(parsed))
        }
        _ => Ok(None),
    }
}

/// Generic setting setter (internal)
async fn set_setting<T>(db: &Pool<Sqlite>, key: &str, value: T) -> Result<()>
where
    T: std::fmt::Display,
{
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(key)
    .bind(value.to_string())
    .execute(db)
    .await
    .map_err(Error::Database)?;

    Ok(())
}
