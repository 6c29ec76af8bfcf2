//! Fuzzagent-State: storage and reporting backends for the fuzzing agent
//!
//! The agent treats blob storage and the downstream message queue as opaque
//! collaborators. This crate defines the two seams and ships backends for them:
//!
//! - `ObjectStorage`: bucket/key blob store (`FsObjectStorage`, `MemoryObjectStorage`)
//! - `ReportSink`: outgoing run/crash messages (`SpoolReportSink`, `MemoryReportSink`)
//!
//! In-memory fakes live in the `fakes` module and are used by the agent's tests.

mod error;
pub mod fakes;
pub mod fs_storage;
pub mod spool;
pub mod storage_traits;

pub use error::{SinkError, StorageError};
pub use fs_storage::FsObjectStorage;
pub use spool::SpoolReportSink;
pub use storage_traits::{ObjectStorage, OutgoingMessage, ReportSink, SinkResult, StorageResult};
