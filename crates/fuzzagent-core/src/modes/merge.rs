//! Corpus minimisation.
//!
//! Merges the unmerged corpora left by fuzzing runs into the merged corpus,
//! then replaces the merged corpus and deletes what was consumed.

use async_trait::async_trait;
use tracing::info;

use super::{libfuzzer, ModeOutputs};
use crate::error::AgentError;
use crate::mode::{ModeContext, RunMode};

pub struct MergeMode {
    ctx: ModeContext,
    outputs: ModeOutputs,
    consumed: Vec<String>,
    merged: bool,
}

impl MergeMode {
    pub fn new(ctx: ModeContext) -> Self {
        Self {
            ctx,
            outputs: ModeOutputs::default(),
            consumed: Vec::new(),
            merged: false,
        }
    }
}

#[async_trait]
impl RunMode for MergeMode {
    async fn run(&mut self) -> anyhow::Result<()> {
        let ctx = &self.ctx;
        let fuzzer = &ctx.settings.fuzzer;
        ctx.paths.ensure_dirs().await?;
        ctx.transfer
            .download_merged_corpus(&ctx.paths.corpus())
            .await?;
        let consumed = ctx
            .transfer
            .download_unmerged_corpus(&ctx.paths.unmerged_corpus())
            .await?;
        if consumed.is_empty() {
            info!("no unmerged corpus, nothing to merge");
            return Ok(());
        }

        let log = ctx.paths.merge_log();
        let mut args = libfuzzer::base_args(ctx);
        args.push("-merge=1".to_string());
        args.push(ctx.paths.merged_corpus().display().to_string());
        args.push(ctx.paths.corpus().display().to_string());
        args.push(ctx.paths.unmerged_corpus().display().to_string());

        let request = libfuzzer::request(
            ctx,
            args,
            &log,
            fuzzer.time_limit + libfuzzer::SUPERVISOR_SLACK_SEC,
        );
        let exit_code = ctx.executor.exec_command(request).await?;
        if exit_code != 0 {
            let tail = libfuzzer::log_tail(&log).await;
            return Err(AgentError::launch("Corpus merge failed", Some(tail)).into());
        }

        info!(inputs = consumed.len(), "corpus merged");
        self.consumed = consumed;
        self.merged = true;
        Ok(())
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        if !self.merged {
            return Ok(());
        }
        self.ctx
            .transfer
            .upload_merged_corpus(&self.ctx.paths.merged_corpus())
            .await?;
        self.ctx
            .transfer
            .delete_unmerged_corpus(&self.consumed)
            .await?;
        Ok(())
    }

    mode_outputs!();
}
