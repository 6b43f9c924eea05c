//! Error types for the storage layer.

use std::time::Duration;

use thiserror::Error;

/// Any failure raised by a storage backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The named table does not exist.
    #[error("table '{0}' not found")]
    TableNotFound(String),

    /// The table name is not usable by the backend.
    #[error("invalid table name '{name}': {reason}")]
    InvalidTableName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A request was rejected before reaching storage.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A created table never became active.
    #[error("table '{table}' did not become active within {waited:?}")]
    ProvisioningTimeout {
        /// The table being provisioned.
        table: String,
        /// How long we polled before giving up.
        waited: Duration,
    },

    /// Item (de)serialization failed.
    #[error("item serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The DuckDB engine reported an error.
    #[error("duckdb error: {0}")]
    DuckDb(#[from] duckdb::Error),

    /// The backend is temporarily unable to serve the request.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Type alias for `Result<T, StoreError>`.
pub type Result<T> = std::result::Result<T, StoreError>;
