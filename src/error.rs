//! Engine-wide error type.
//!
//! Errors fall into four groups that callers treat differently:
//!
//! - schema errors (`UnknownRecord`, `UnknownAttribute`, `InvalidSchema`) are
//!   programming errors raised while resolving the schema or validating a
//!   request against it, and are never worth retrying;
//! - query-shape errors (`InvalidMatch`, `InvalidQuery`, `InvalidPayload`,
//!   `UnsupportedOperator`) are rejected before any SQL reaches the driver;
//! - transactional errors (`Db`, `RecordNotFound`) abort the enclosing
//!   transaction, and the driver error is carried unmodified;
//! - registration errors (`InvalidComputation`, `NotInitialized`) come from
//!   the computation source-map layer. Dispatch itself cannot fail.

use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DbError;

/// Error returned by every fallible engine operation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Unknown record type '{0}'")]
    UnknownRecord(String),

    #[error("Record type '{record}' has no attribute '{attribute}'")]
    UnknownAttribute { record: String, attribute: String },

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid match expression on '{record}': {message}")]
    InvalidMatch { record: String, message: String },

    #[error("Invalid attribute query on '{record}': {message}")]
    InvalidQuery { record: String, message: String },

    #[error("Invalid payload for '{record}': {message}")]
    InvalidPayload { record: String, message: String },

    #[error("Operator '{operator}' is not supported by the {backend} backend")]
    UnsupportedOperator {
        operator: String,
        backend: &'static str,
    },

    #[error("Record '{record}' with id {id} does not exist")]
    RecordNotFound { record: String, id: i64 },

    #[error("Invalid computation '{computation}': {message}")]
    InvalidComputation {
        computation: String,
        message: String,
    },

    #[error("Source maps must be initialized before computations can be added")]
    NotInitialized,

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl EngineError {
    pub(crate) fn invalid_match(record: &str, message: impl Into<String>) -> Self {
        EngineError::InvalidMatch {
            record: record.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_query(record: &str, message: impl Into<String>) -> Self {
        EngineError::InvalidQuery {
            record: record.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_payload(record: &str, message: impl Into<String>) -> Self {
        EngineError::InvalidPayload {
            record: record.to_string(),
            message: message.into(),
        }
    }

    /// True for errors raised by the storage driver.
    pub fn is_driver_error(&self) -> bool {
        matches!(self, EngineError::Db(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;
