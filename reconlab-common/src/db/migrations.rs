//! Database schema migrations
//!
//! Versioned, idempotent migrations tracked in `schema_version`.
//!
//! # Migration Guidelines
//!
//! 1. **Never modify existing migrations** - databases upgrading from older versions rely on them
//! 2. **Always add new migrations** - one function per schema change
//! 3. **Use ALTER TABLE** - prefer it over DROP/CREATE to preserve data

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Current schema version
///
/// **IMPORTANT:** Increment this when adding new migrations
const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Get current schema version from database
///
/// Returns 0 if schema_version has no rows
async fn get_schema_version(pool: &SqlitePool) -> Result<i32> {
    let version: Option<i32> =
        sqlx::query_scalar("SELECT version FROM schema_version ORDER BY version DESC LIMIT 1")
            .fetch_optional(pool)
            .await?;

    Ok(version.unwrap_or(0))
}

/// Set schema version in database
async fn set_schema_version(pool: &SqlitePool, version: i32) -> Result<()> {
    sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await?;

    Ok(())
}

/// Run all pending migrations
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current_version = get_schema_version(pool).await?;

    if current_version == CURRENT_SCHEMA_VERSION {
        info!("Database schema is up to date (v{})", current_version);
        return Ok(());
    }

    if current_version > CURRENT_SCHEMA_VERSION {
        warn!(
            "Database schema version ({}) is newer than code version ({})",
            current_version, CURRENT_SCHEMA_VERSION
        );
        return Ok(());
    }

    info!(
        "Running database migrations: v{} -> v{}",
        current_version, CURRENT_SCHEMA_VERSION
    );

    if current_version < 1 {
        migrate_v1(pool).await?;
        set_schema_version(pool, 1).await?;
        info!("Migration v1 completed");
    }

    Ok(())
}

/// Migration v1: explicit candidate state on tasks
///
/// Older task tables stored "not yet attempted" as SQL NULL or, under some
/// JSON encodings, as the text `null`, and "attempted, no match" as `{}`.
/// This adds `candidate_state` and derives it from the stored payload.
async fn migrate_v1(pool: &SqlitePool) -> Result<()> {
    let has_column: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM pragma_table_info('tasks') WHERE name = 'candidate_state'",
    )
    .fetch_one(pool)
    .await?;

    if has_column > 0 {
        info!("  candidate_state column already exists - skipping");
        return Ok(());
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        "ALTER TABLE tasks ADD COLUMN candidate_state TEXT NOT NULL DEFAULT 'unattempted'",
    )
    .execute(&mut *tx)
    .await?;

    let backfilled = sqlx::query(
        r#"
        UPDATE tasks SET candidate_state = CASE
            WHEN candidate_data IS NULL OR TRIM(candidate_data) = 'null' THEN 'unattempted'
            WHEN REPLACE(candidate_data, ' ', '') = '{}' THEN 'not_found'
            ELSE 'found'
        END
        "#,
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query(
        "UPDATE tasks SET candidate_data = NULL WHERE candidate_state IN ('unattempted', 'not_found')",
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    info!("  Added candidate_state to tasks ({} rows backfilled)", backfilled);
    Ok(())
}
