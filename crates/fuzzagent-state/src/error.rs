//! Error types for fuzzagent-state

use thiserror::Error;

/// Errors produced by object storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object does not exist in the bucket
    #[error("Object not found in storage: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    /// Key escapes the bucket or is otherwise unusable
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// Backend failure (connectivity, permissions, disk)
    #[error("Object storage failure: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// True when the object was simply absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}

/// Errors produced by report sinks
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink was closed before the message was produced
    #[error("Report sink is closed")]
    Closed,

    /// Message could not be encoded
    #[error("Message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Delivery failed
    #[error("Message delivery failed: {0}")]
    Delivery(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
