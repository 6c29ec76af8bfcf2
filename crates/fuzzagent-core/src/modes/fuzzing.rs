//! Regular fuzzing session.
//!
//! Starts from the seeds and the merged corpus, fuzzes for the configured
//! iterations or time, and leaves the grown corpus behind as an unmerged
//! corpus for the next merge run.

use std::time::Instant;

use async_trait::async_trait;
use tracing::info;

use super::{libfuzzer, ModeOutputs};
use crate::error::AgentError;
use crate::mode::{ModeContext, RunMode};
use crate::output::Statistics;

pub struct FuzzingMode {
    ctx: ModeContext,
    outputs: ModeOutputs,
    fuzzed: bool,
}

impl FuzzingMode {
    pub fn new(ctx: ModeContext) -> Self {
        Self {
            ctx,
            outputs: ModeOutputs::default(),
            fuzzed: false,
        }
    }
}

#[async_trait]
impl RunMode for FuzzingMode {
    async fn run(&mut self) -> anyhow::Result<()> {
        let ctx = &self.ctx;
        let fuzzer = &ctx.settings.fuzzer;
        ctx.paths.ensure_dirs().await?;
        ctx.transfer.download_seeds(&ctx.paths.seeds()).await?;
        ctx.transfer
            .download_merged_corpus(&ctx.paths.corpus())
            .await?;

        let log = ctx.paths.fuzzer_log();
        let mut args = libfuzzer::base_args(ctx);
        args.push(format!("-runs={}", fuzzer.num_iterations));
        args.push(format!("-max_total_time={}", fuzzer.time_limit));
        args.push(ctx.paths.corpus().display().to_string());
        args.push(ctx.paths.seeds().display().to_string());

        let request = libfuzzer::request(
            ctx,
            args,
            &log,
            fuzzer.time_limit + libfuzzer::SUPERVISOR_SLACK_SEC,
        );
        let started = Instant::now();
        self.fuzzed = true;
        let exit_code = ctx.executor.exec_command(request).await?;
        self.outputs.statistics = Some(Statistics {
            work_time: started.elapsed().as_secs(),
        });

        self.outputs.crashes = libfuzzer::collect_crashes(ctx, &log).await?;
        info!(exit_code, crashes = self.outputs.crashes.len(), "fuzzing finished");

        if exit_code != 0 && self.outputs.crashes.is_empty() {
            let tail = libfuzzer::log_tail(&log).await;
            return Err(AgentError::launch("Fuzzer exited abnormally", Some(tail)).into());
        }
        Ok(())
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        if !self.fuzzed {
            return Ok(());
        }
        let uploaded = self
            .ctx
            .transfer
            .upload_unmerged_corpus(&self.ctx.run_id, &self.ctx.paths.corpus())
            .await?;
        info!(uploaded, "corpus saved for merging");
        Ok(())
    }

    mode_outputs!();
}
