//! Error types for the series store
//!
//! Write failures for individual points are reported in-band through
//! `IngestResponse`; everything here is a call-level failure. Absence of data
//! is never an error.

use crate::store::FieldType;
use thiserror::Error;

/// Call-level error for reads, aggregations and invalid requests.
#[derive(Debug, Error)]
pub enum SeriesError {
    /// Malformed definition, invalid target distance, bad percentile, ...
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A timestamp could not be parsed or normalized
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// A range read matched more points than one call may return
    #[error("range read matched {total} points, limit is {limit}; narrow the time range")]
    CapacityExceeded { limit: usize, total: usize },

    /// Failure reported by the backing document store
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl SeriesError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        SeriesError::InvalidInput(msg.into())
    }
}

/// Errors surfaced by a `DocumentStore` implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StorageError {
    #[error("storage timeout: {0}")]
    Timeout(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A field was written with a type incompatible with the partition mapping
    #[error("mapping conflict in {partition}: field '{field}' is {existing}, got {attempted}")]
    MappingConflict {
        partition: String,
        field: String,
        existing: FieldType,
        attempted: FieldType,
    },

    /// A stored document could not be decoded
    #[error("corrupt document: {0}")]
    Corrupt(String),
}

impl StorageError {
    /// Timeouts and unavailability are safe to retry (writes are idempotent)
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::Unavailable(_))
    }
}

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SeriesError>;
