//! Structured observability hooks for the agent run lifecycle.
//!
//! This module provides:
//! - a run-scoped span via [`run_span`], attached to the orchestrated future
//!   with `tracing::Instrument`
//! - emission functions for lifecycle events: run start and finish, remote exec
//!   completion, crash and result reports
//!
//! Every event carries an `event = "..."` field so log pipelines can filter on it.

use tracing::{info, warn};

/// Span tagging every log line of one run with its id and mode.
pub fn run_span(run_id: &str, mode: &str) -> tracing::Span {
    tracing::info_span!("fuzzagent.run", run_id = %run_id, mode = %mode)
}

/// Emit event: run started.
///
/// ```ignore
/// emit_run_started("Zx81...", "fuzzing");
/// // logs: event=run.started run_id=Zx81... mode=fuzzing
/// ```
pub fn emit_run_started(run_id: &str, mode: &str) {
    info!(event = "run.started", run_id = %run_id, mode = %mode);
}

/// Emit event: run finished with its status code and process exit code.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, status_code: &str, exit_code: u8) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        status_code = %status_code,
        exit_code = exit_code,
    );
}

/// Emit event: a remote command returned control to the agent.
pub fn emit_exec_finished(command: &str, runner_code: Option<i32>, duration_ms: u64) {
    info!(
        event = "exec.finished",
        command = %command,
        runner_code = ?runner_code,
        duration_ms = duration_ms,
    );
}

/// Emit event: one crash report produced.
pub fn emit_crash_reported(run_id: &str, crash_type: &str, offloaded: bool) {
    info!(
        event = "crash.reported",
        run_id = %run_id,
        crash_type = %crash_type,
        offloaded = offloaded,
    );
}

/// Emit event: the terminal run report was produced.
pub fn emit_report_sent(run_id: &str, status_code: &str, crash_count: usize) {
    info!(
        event = "report.sent",
        run_id = %run_id,
        status_code = %status_code,
        crash_count = crash_count,
    );
}

/// Emit event: the terminal report could not be delivered (warning level).
pub fn emit_report_failed(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "report.failed", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let span = run_span("test-run-id", "merge");
        let _entered = span.enter();
        emit_run_started("test-run-id", "merge");
    }
}
