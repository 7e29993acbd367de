//! Error types for contentgate-state

use thiserror::Error;

/// Errors raised while connecting to or preparing the backing database.
#[derive(Error, Debug)]
pub enum StateError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("Database query failed: {0}")]
    Query(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

/// Errors returned by the storage traits.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The store cannot be reached; callers may retry later.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected or failed an operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// No record exists for the key.
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    /// An append did not carry the next sequence number of the log.
    #[error("sequence conflict: expected seq {expected}, got {actual}")]
    SequenceConflict { expected: u64, actual: u64 },

    /// A digest string was not 64 hex characters.
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// A stored payload could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
