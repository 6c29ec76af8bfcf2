//! Storage trait definitions for the fuzzing agent
//!
//! These traits define the two external seams the agent writes through:
//! - `ObjectStorage`: bucket/key blob storage (seeds, corpora, crash inputs)
//! - `ReportSink`: producer side of the message queue (run results, crashes)
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `fakes` module.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{SinkError, StorageError};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Result type for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

// ---------------------------------------------------------------------------
// ObjectStorage: bucket/key blobs
// ---------------------------------------------------------------------------

/// Bucket/key blob store.
///
/// Guarantees:
/// - `get_object` returns the exact bytes previously stored under the key.
/// - `put_object` overwrites silently.
/// - `delete_object` and `get_object` return `StorageError::NotFound` when absent.
/// - `list_objects` returns full keys sorted lexicographically.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `data` under `bucket/key`.
    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> StorageResult<()>;

    /// Fetch the object at `bucket/key`.
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>>;

    /// Delete the object at `bucket/key`.
    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()>;

    /// List keys in `bucket` starting with `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;
}

// ---------------------------------------------------------------------------
// ReportSink: outgoing messages
// ---------------------------------------------------------------------------

/// One message addressed to a downstream queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// Destination queue name
    pub queue: String,
    /// Message type name understood by the consumer (e.g. `agent.crash.new`)
    pub name: String,
    /// Message body
    pub body: serde_json::Value,
}

impl OutgoingMessage {
    pub fn new(queue: impl Into<String>, name: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            queue: queue.into(),
            name: name.into(),
            body,
        }
    }
}

/// Producer side of the downstream message queue.
///
/// `close` must be idempotent; producing after close fails with `SinkError::Closed`.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Deliver one message.
    async fn produce(&self, message: OutgoingMessage) -> SinkResult<()>;

    /// Flush and release the connection.
    async fn close(&self) -> SinkResult<()>;
}

/// Reject keys that are empty, absolute or climb out of the bucket.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let escapes = key
        .split('/')
        .any(|segment| segment == ".." || segment == ".");
    if key.is_empty() || key.starts_with('/') || escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key_accepts_nested_keys() {
        assert!(validate_key("fuzzer/rev/crashes/abc.bin").is_ok());
    }

    #[test]
    fn test_validate_key_rejects_escapes() {
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("a/../../b").is_err());
        assert!(validate_key("a/./b").is_err());
    }

    #[test]
    fn test_outgoing_message_new() {
        let msg = OutgoingMessage::new("scheduler", "agent.fuzzer.result", serde_json::json!({}));
        assert_eq!(msg.queue, "scheduler");
        assert_eq!(msg.name, "agent.fuzzer.result");
    }
}
