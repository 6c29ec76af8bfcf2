//! Mapping failures onto report statuses and process exit codes.

use std::process::ExitCode;

use tracing::error;

use crate::error::AgentError;
use crate::output::Status;

/// Process exit code of one agent run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AgentExitCode {
    /// Report delivered, or cancelled before anything had to be reported
    Success = 0,
    /// Nothing could be reported: startup failed or the terminal report was lost
    InitFailed = 1,
    /// Agent error after the run phase
    AgentError = 2,
    /// Unclassified error after the run phase
    Unhandled = 3,
}

impl AgentExitCode {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<AgentExitCode> for ExitCode {
    fn from(code: AgentExitCode) -> Self {
        ExitCode::from(code.code())
    }
}

/// What the run phase ended with.
#[derive(Debug)]
pub enum RunOutcome {
    Completed,
    Cancelled,
    Failed(anyhow::Error),
}

impl RunOutcome {
    pub fn from_result(result: anyhow::Result<()>) -> Self {
        match result {
            Ok(()) => RunOutcome::Completed,
            Err(e) => RunOutcome::Failed(e),
        }
    }

    /// Status recorded on the run mode.
    pub fn status(&self) -> Status {
        match self {
            RunOutcome::Completed => Status::success(),
            RunOutcome::Cancelled => Status::from(&AgentError::Aborted),
            RunOutcome::Failed(err) => Status::from(&classify(err)),
        }
    }
}

/// Classify an error raised by the agent.
///
/// Agent errors keep their identity; anything else becomes a detail-less
/// internal error after its full chain is logged. Internal agent errors are
/// logged too since their details never reach the report.
pub fn classify(err: &anyhow::Error) -> AgentError {
    match err.downcast_ref::<AgentError>() {
        Some(agent_err) => {
            if agent_err.is_internal() {
                error!(error = %format!("{err:#}"), "internal error");
            }
            agent_err.clone()
        }
        None => {
            error!(error = ?err, "unhandled error");
            AgentError::internal()
        }
    }
}

/// Exit code for an error raised after the run phase.
pub fn post_run_exit_code(err: &anyhow::Error) -> AgentExitCode {
    if err.downcast_ref::<AgentError>().is_some() {
        AgentExitCode::AgentError
    } else {
        AgentExitCode::Unhandled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use anyhow::Context;

    #[test]
    fn test_agent_error_keeps_identity_through_context() {
        let err = Err::<(), _>(AgentError::RamLimitExceeded)
            .context("running fuzzer")
            .unwrap_err();
        assert_eq!(classify(&err), AgentError::RamLimitExceeded);
        assert_eq!(post_run_exit_code(&err), AgentExitCode::AgentError);
    }

    #[test]
    fn test_foreign_error_becomes_internal() {
        let err = anyhow::anyhow!("disk on fire");
        let classified = classify(&err);
        assert_eq!(classified.code(), codes::E_INTERNAL_ERROR);
        assert_eq!(classified.details(), None);
        assert_eq!(post_run_exit_code(&err), AgentExitCode::Unhandled);
    }

    #[test]
    fn test_outcome_status() {
        assert!(RunOutcome::Completed.status().is_success());
        assert_eq!(RunOutcome::Cancelled.status().code, codes::E_FUZZER_ABORTED);

        let failed = RunOutcome::from_result(Err(AgentError::launch("boom", None).into()));
        let status = failed.status();
        assert_eq!(status.code, codes::E_FUZZER_LAUNCH_ERROR);
        assert_eq!(status.message, "boom");
    }

    #[test]
    fn test_exit_code_values() {
        assert_eq!(AgentExitCode::Success.code(), 0);
        assert_eq!(AgentExitCode::InitFailed.code(), 1);
        assert_eq!(AgentExitCode::AgentError.code(), 2);
        assert_eq!(AgentExitCode::Unhandled.code(), 3);
    }
}
