//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryObjectStorage` and `MemoryReportSink` that satisfy the trait
//! contracts without touching the filesystem or the network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{SinkError, StorageError};
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryObjectStorage
// ---------------------------------------------------------------------------

/// In-memory object store backed by a `BTreeMap<(bucket, key), bytes>`.
#[derive(Debug, Default)]
pub struct MemoryObjectStorage {
    objects: Mutex<BTreeMap<(String, String), Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put_object` fail with a backend error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Direct read for assertions.
    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        let objects = self.objects.lock().unwrap();
        objects.get(&(bucket.to_string(), key.to_string())).cloned()
    }

    /// Number of stored objects across all buckets.
    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn put_object(&self, bucket: &str, key: &str, data: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("write rejected".to_string()));
        }
        let mut objects = self.objects.lock().unwrap();
        objects.insert((bucket.to_string(), key.to_string()), data.to_vec());
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        self.object(bucket, key).ok_or_else(|| StorageError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        let mut objects = self.objects.lock().unwrap();
        objects
            .remove(&(bucket.to_string(), key.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemoryReportSink
// ---------------------------------------------------------------------------

/// In-memory sink recording every produced message in order.
#[derive(Debug, Default)]
pub struct MemoryReportSink {
    messages: Mutex<Vec<OutgoingMessage>>,
    closed: AtomicBool,
    close_calls: Mutex<u32>,
    fail_delivery: AtomicBool,
}

impl MemoryReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `produce` fail with a delivery error.
    pub fn fail_delivery(&self, fail: bool) {
        self.fail_delivery.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of all messages produced so far.
    pub fn messages(&self) -> Vec<OutgoingMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Messages carrying the given type name.
    pub fn messages_named(&self, name: &str) -> Vec<OutgoingMessage> {
        self.messages()
            .into_iter()
            .filter(|m| m.name == name)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// How many times `close` was invoked.
    pub fn close_calls(&self) -> u32 {
        *self.close_calls.lock().unwrap()
    }
}

#[async_trait]
impl ReportSink for MemoryReportSink {
    async fn produce(&self, message: OutgoingMessage) -> SinkResult<()> {
        if self.is_closed() {
            return Err(SinkError::Closed);
        }
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err(SinkError::Delivery("queue unavailable".to_string()));
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }

    async fn close(&self) -> SinkResult<()> {
        *self.close_calls.lock().unwrap() += 1;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
