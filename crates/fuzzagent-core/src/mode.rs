//! Pluggable run modes.
//!
//! The orchestrator does not know what a run does. It asks an [`Agent`] for
//! the [`RunMode`] matching the configured mode, runs it, and reads back the
//! status, statistics and crashes it produced.

use std::sync::Arc;

use async_trait::async_trait;

use crate::executor::RemoteExecutor;
use crate::output::{CrashRecord, Statistics, Status};
use crate::paths::AgentPaths;
use crate::settings::AppSettings;
use crate::transfer::FileTransfer;

/// Everything a run mode may use.
#[derive(Clone)]
pub struct ModeContext {
    pub settings: Arc<AppSettings>,
    pub executor: Arc<RemoteExecutor>,
    pub transfer: FileTransfer,
    pub paths: AgentPaths,
    pub run_id: String,
}

/// One kind of run.
///
/// `run` may fail with an [`crate::error::AgentError`] (classified and
/// reported with its own code) or any other error (reported as internal).
/// `finish` is called after `run` regardless of its outcome.
#[async_trait]
pub trait RunMode: Send {
    async fn run(&mut self) -> anyhow::Result<()>;

    /// Upload artifacts produced by the run.
    async fn finish(&mut self) -> anyhow::Result<()>;

    fn transfer(&self) -> &FileTransfer;

    /// Outcome of `run`, once classified.
    fn status(&self) -> Option<&Status>;

    fn set_status(&mut self, status: Status);

    fn statistics(&self) -> Option<Statistics>;

    fn crashes(&self) -> &[CrashRecord];

    /// Hand the crashes over for reporting.
    fn take_crashes(&mut self) -> Vec<CrashRecord>;
}

/// Factory choosing the run mode for a run.
pub trait Agent: Send + Sync {
    fn select_mode(&self, ctx: ModeContext) -> anyhow::Result<Box<dyn RunMode>>;
}
