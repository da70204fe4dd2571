//! Versioned schema for the archive database.
//!
//! The on-disk version lives in `PRAGMA user_version`. Opening an older
//! database applies each missing step in its own transaction; opening a
//! database written by a newer build is refused.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::{StoreError, StoreResult};

/// Version this build writes and understands.
pub const SCHEMA_VERSION: i64 = 3;

/// Statements for each step, indexed by the version they produce.
const STEPS: &[(i64, &[&str])] = &[
    (
        1,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'unknown',
                text TEXT NOT NULL,
                timestamp TEXT NOT NULL DEFAULT ''
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_messages_thread_id ON messages(thread_id)",
        ],
    ),
    (
        2,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS threads (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT ''
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
            "CREATE INDEX IF NOT EXISTS idx_messages_role ON messages(role)",
        ],
    ),
    (
        3,
        &[
            r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                message_id TEXT NOT NULL,
                rating TEXT NOT NULL DEFAULT '',
                comment TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL DEFAULT ''
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_feedback_message_id ON feedback(message_id)",
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                raw_json TEXT NOT NULL
            )
            "#,
        ],
    ),
];

pub async fn schema_version(pool: &SqlitePool) -> StoreResult<i64> {
    let version: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(pool)
        .await?;
    Ok(version)
}

/// Bring the database up to [`SCHEMA_VERSION`]. Returns the version found
/// before migrating.
pub async fn migrate(pool: &SqlitePool) -> StoreResult<i64> {
    let found = schema_version(pool).await?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::SchemaTooNew {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    for (version, statements) in STEPS.iter().filter(|(v, _)| *v > found) {
        apply_step(pool, *version, statements)
            .await
            .map_err(|source| StoreError::Migrate {
                version: *version,
                source,
            })?;
        tracing::info!(version, "applied schema step");
    }

    Ok(found)
}

async fn apply_step(pool: &SqlitePool, version: i64, statements: &[&str]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    for statement in statements {
        sqlx::query(statement).execute(&mut *tx).await?;
    }
    // PRAGMA does not accept bound parameters.
    sqlx::query(&format!("PRAGMA user_version = {}", version))
        .execute(&mut *tx)
        .await?;
    tx.commit().await
}

pub async fn run_migrations(config: &Config) -> StoreResult<i64> {
    let pool = db::connect(&config.db.path).await?;
    let result = migrate(&pool).await;
    pool.close().await;
    result
}
