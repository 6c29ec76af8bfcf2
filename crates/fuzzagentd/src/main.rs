//! Fuzzagentd - control agent for one remote fuzzing run
//!
//! Configuration comes from flags or the matching environment variables
//! (see `fuzzagentd --help`). The process exit code tells the scheduler how
//! the run ended:
//!
//! - `0`: outcome reported, or cancelled before anything had to be reported
//! - `1`: startup failed or the run report could not be delivered
//! - `2`: agent error after the fuzzer ran, reported
//! - `3`: unexpected error after the fuzzer ran, reported

use std::process::ExitCode;

use clap::Parser;
use fuzzagent_core::{agent_entry, init_tracing, parse_level, AgentExitCode, AppSettings, DefaultAgent};

#[tokio::main]
async fn main() -> ExitCode {
    let settings = match AppSettings::try_parse() {
        Ok(settings) => settings,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                AgentExitCode::InitFailed.into()
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    init_tracing(settings.log_json, parse_level(&settings.log_level));
    tracing::info!(
        environment = ?settings.environment,
        version = env!("CARGO_PKG_VERSION"),
        "fuzzagentd starting"
    );

    agent_entry(&DefaultAgent, settings).await.into()
}
