//! Error types for the Metroid client.

use chrono::{DateTime, Local};
use metroid_store::StoreError;
use thiserror::Error;

/// The main error type for all client operations.
#[derive(Error, Debug)]
pub enum MetroidError {
    /// A range query was issued with its start after its end.
    #[error("start date must not be after end date (start: {start}, end: {end})")]
    InvalidRange {
        /// The requested start.
        start: DateTime<Local>,
        /// The requested end.
        end: DateTime<Local>,
    },

    /// A stored item could not be decoded into a record.
    #[error("malformed record: {reason}")]
    MalformedRecord {
        /// What was wrong with the item.
        reason: String,
    },

    /// The storage backend failed.
    #[error("backend error: {0}")]
    Backend(#[from] StoreError),

    /// The table could not be created or never became active.
    #[error("failed to provision table '{table}': {source}")]
    TableProvisioning {
        /// The table being provisioned.
        table: String,
        /// The underlying backend failure.
        #[source]
        source: StoreError,
    },

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Configuration loaded but holds unusable values.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Which value was rejected and why.
        reason: String,
    },
}

impl MetroidError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        MetroidError::MalformedRecord {
            reason: reason.into(),
        }
    }
}

/// Type alias for `Result<T, MetroidError>`.
pub type Result<T> = std::result::Result<T, MetroidError>;
