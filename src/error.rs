//! Error taxonomy for the storage and ingest layers.
//!
//! Component seams return these typed errors; the worker and CLI convert
//! them into `anyhow` errors or `error` events at the operation boundary.

use thiserror::Error;

/// Failure inside the embedded store. The operation that produced it was
/// not applied.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("schema migration to version {version} failed: {source}")]
    Migrate {
        version: i64,
        #[source]
        source: sqlx::Error,
    },

    #[error("database schema version {found} is newer than supported version {supported}")]
    SchemaTooNew { found: i64, supported: i64 },

    #[error("collection '{collection}' has no index '{index}'")]
    UnknownIndex {
        collection: &'static str,
        index: String,
    },

    #[error("stored record in '{collection}' is malformed: {detail}")]
    Corrupt {
        collection: &'static str,
        detail: String,
    },

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while ingesting a single file.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Failed to parse {file}: {source}")]
    Parse {
        file: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
