//! libFuzzer-compatible run modes.

use crate::error::AgentError;
use crate::mode::{Agent, ModeContext, RunMode};
use crate::output::{CrashRecord, Statistics, Status};
use crate::settings::AgentMode;

/// Results a mode accumulates for the orchestrator.
#[derive(Debug, Default)]
pub(crate) struct ModeOutputs {
    status: Option<Status>,
    statistics: Option<Statistics>,
    crashes: Vec<CrashRecord>,
}

macro_rules! mode_outputs {
    () => {
        fn transfer(&self) -> &crate::transfer::FileTransfer {
            &self.ctx.transfer
        }

        fn status(&self) -> Option<&crate::output::Status> {
            self.outputs.status.as_ref()
        }

        fn set_status(&mut self, status: crate::output::Status) {
            self.outputs.status = Some(status);
        }

        fn statistics(&self) -> Option<crate::output::Statistics> {
            self.outputs.statistics
        }

        fn crashes(&self) -> &[crate::output::CrashRecord] {
            &self.outputs.crashes
        }

        fn take_crashes(&mut self) -> Vec<crate::output::CrashRecord> {
            std::mem::take(&mut self.outputs.crashes)
        }
    };
}

mod first_run;
mod fuzzing;
mod libfuzzer;
mod merge;

pub use first_run::FirstRunMode;
pub use fuzzing::FuzzingMode;
pub use merge::MergeMode;

/// Picks the libFuzzer mode matching the configured agent mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultAgent;

impl Agent for DefaultAgent {
    fn select_mode(&self, ctx: ModeContext) -> anyhow::Result<Box<dyn RunMode>> {
        let engine = ctx.settings.fuzzer.engine;
        if !engine.is_libfuzzer_compatible() {
            return Err(AgentError::config_invalid(format!(
                "engine {} is not supported by this agent",
                engine.as_str()
            ))
            .into());
        }

        Ok(match ctx.settings.agent.mode {
            AgentMode::Firstrun => Box::new(FirstRunMode::new(ctx)),
            AgentMode::Fuzzing => Box::new(FuzzingMode::new(ctx)),
            AgentMode::Merge => Box::new(MergeMode::new(ctx)),
        })
    }
}
