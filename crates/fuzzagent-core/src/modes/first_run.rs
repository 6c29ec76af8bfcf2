//! Smoke run checking that the fuzzer starts on its seeds.

use async_trait::async_trait;
use tracing::info;

use super::{libfuzzer, ModeOutputs};
use crate::error::AgentError;
use crate::mode::{ModeContext, RunMode};

pub struct FirstRunMode {
    ctx: ModeContext,
    outputs: ModeOutputs,
}

impl FirstRunMode {
    pub fn new(ctx: ModeContext) -> Self {
        Self {
            ctx,
            outputs: ModeOutputs::default(),
        }
    }
}

#[async_trait]
impl RunMode for FirstRunMode {
    async fn run(&mut self) -> anyhow::Result<()> {
        let ctx = &self.ctx;
        let fuzzer = &ctx.settings.fuzzer;
        ctx.paths.ensure_dirs().await?;
        ctx.transfer.download_seeds(&ctx.paths.seeds()).await?;

        let log = ctx.paths.fuzzer_log();
        let mut args = libfuzzer::base_args(ctx);
        args.push(format!("-runs={}", fuzzer.num_iterations_firstrun));
        args.push(ctx.paths.corpus().display().to_string());
        args.push(ctx.paths.seeds().display().to_string());

        let request = libfuzzer::request(ctx, args, &log, fuzzer.time_limit_firstrun);
        let exit_code = ctx.executor.exec_command(request).await?;
        info!(exit_code, "first run finished");

        self.outputs.crashes = libfuzzer::collect_crashes(ctx, &log).await?;
        if exit_code != 0 && self.outputs.crashes.is_empty() {
            let tail = libfuzzer::log_tail(&log).await;
            return Err(AgentError::launch("Fuzzer failed on first run", Some(tail)).into());
        }
        Ok(())
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    mode_outputs!();
}
