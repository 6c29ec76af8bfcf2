//! JSONL spool sink.
//!
//! Appends every outgoing message as one JSON line to `<dir>/<queue>.jsonl`.
//! A queue forwarder (outside this process) ships the spool to the broker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::SinkError;
use crate::storage_traits::{OutgoingMessage, ReportSink, SinkResult};

const SPOOL_EXTENSION: &str = "jsonl";

struct SpoolState {
    closed: bool,
    writers: HashMap<String, File>,
}

/// Report sink writing newline-delimited JSON per queue.
pub struct SpoolReportSink {
    dir: PathBuf,
    state: Mutex<SpoolState>,
}

impl SpoolReportSink {
    /// Create a sink spooling into `dir`. Creates `dir` if needed.
    pub async fn new(dir: impl AsRef<Path>) -> SinkResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            state: Mutex::new(SpoolState {
                closed: false,
                writers: HashMap::new(),
            }),
        })
    }

    /// Path of the spool file for `queue`.
    pub fn queue_path(&self, queue: &str) -> PathBuf {
        self.dir.join(format!("{queue}.{SPOOL_EXTENSION}"))
    }
}

/// A queue name becomes one file directly under the spool directory.
fn validate_queue(queue: &str) -> SinkResult<()> {
    let nested = queue.contains('/') || queue.contains('\\');
    if queue.is_empty() || nested || queue == "." || queue == ".." {
        return Err(SinkError::Delivery(format!("invalid queue name: {queue}")));
    }
    Ok(())
}

#[async_trait]
impl ReportSink for SpoolReportSink {
    async fn produce(&self, message: OutgoingMessage) -> SinkResult<()> {
        validate_queue(&message.queue)?;

        let mut line = serde_json::to_vec(&message)?;
        line.push(b'\n');

        let mut state = self.state.lock().await;
        if state.closed {
            return Err(SinkError::Closed);
        }

        if !state.writers.contains_key(&message.queue) {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.queue_path(&message.queue))
                .await?;
            state.writers.insert(message.queue.clone(), file);
        }

        let writer = state
            .writers
            .get_mut(&message.queue)
            .ok_or_else(|| SinkError::Delivery("spool writer missing".to_string()))?;
        writer.write_all(&line).await?;
        writer.flush().await?;

        debug!(queue = %message.queue, name = %message.name, "message spooled");
        Ok(())
    }

    async fn close(&self) -> SinkResult<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(());
        }
        state.closed = true;

        for (queue, file) in state.writers.drain() {
            if let Err(e) = file.sync_all().await {
                warn!(queue = %queue, error = %e, "failed to sync spool file");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_spool_appends_lines_per_queue() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SpoolReportSink::new(dir.path()).await.unwrap();

        sink.produce(OutgoingMessage::new("scheduler", "a", json!({"n": 1})))
            .await
            .unwrap();
        sink.produce(OutgoingMessage::new("scheduler", "b", json!({"n": 2})))
            .await
            .unwrap();
        sink.produce(OutgoingMessage::new("crashes", "c", json!({"n": 3})))
            .await
            .unwrap();
        sink.close().await.unwrap();

        let text = std::fs::read_to_string(sink.queue_path("scheduler")).unwrap();
        let lines: Vec<OutgoingMessage> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].name, "a");
        assert_eq!(lines[1].body, json!({"n": 2}));

        let crashes = std::fs::read_to_string(sink.queue_path("crashes")).unwrap();
        assert_eq!(crashes.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_spool_rejects_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SpoolReportSink::new(dir.path()).await.unwrap();
        sink.close().await.unwrap();
        sink.close().await.unwrap();

        let err = sink
            .produce(OutgoingMessage::new("scheduler", "a", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Closed));
    }

    #[tokio::test]
    async fn test_spool_rejects_bad_queue_name() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SpoolReportSink::new(dir.path()).await.unwrap();
        let err = sink
            .produce(OutgoingMessage::new("../escape", "a", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Delivery(_)));
    }

    #[tokio::test]
    async fn test_spool_rejects_nested_queue_name() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SpoolReportSink::new(dir.path()).await.unwrap();
        for queue in ["a/b", "a\\b", "..", ""] {
            let err = sink
                .produce(OutgoingMessage::new(queue, "a", json!({})))
                .await
                .unwrap_err();
            assert!(matches!(err, SinkError::Delivery(_)), "queue {queue:?}");
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
