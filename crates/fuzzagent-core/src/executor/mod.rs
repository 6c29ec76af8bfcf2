//! Remote process execution in the user container.
//!
//! Every command goes through the in-container supervisor: the agent writes a
//! [`RunnerConfig`] to the shared disk volume, execs the supervisor against it,
//! drains the session and then works out why the command stopped. Only one
//! exec may be in flight per container because the descriptor path is fixed.

mod exit;
mod runner_config;

pub use exit::{
    classify_runner_exit, classify_termination, parse_process_exit, RunnerExit, Termination,
};
pub use runner_config::{EnvVar, ExecRequest, RunnerConfig, RunnerStreams};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::cluster::{ClusterApi, ExecOptions};
use crate::error::{AgentError, Result};
use crate::obs;
use crate::paths::AgentPaths;
use crate::settings::RunnerSettings;
use crate::transport::{Channel, ExecSession};

/// Bound on each receive while draining a session.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(5);

/// Runs commands in the user container and classifies how they ended.
pub struct RemoteExecutor {
    cluster: Arc<dyn ClusterApi>,
    paths: AgentPaths,
    runner: RunnerSettings,
}

/// Output gathered from the supervisor.
#[derive(Debug, Default)]
struct RunnerOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl RunnerOutput {
    fn collect(&mut self, session: &mut ExecSession) {
        if let Some(bytes) = session.read_bytes(Channel::Stdout) {
            self.stdout.extend(bytes);
        }
        if let Some(bytes) = session.read_bytes(Channel::Stderr) {
            self.stderr.extend(bytes);
        }
    }

    fn output(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    fn logs(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

impl RemoteExecutor {
    pub fn new(cluster: Arc<dyn ClusterApi>, paths: AgentPaths, runner: RunnerSettings) -> Self {
        Self {
            cluster,
            paths,
            runner,
        }
    }

    pub fn paths(&self) -> &AgentPaths {
        &self.paths
    }

    /// Run `request` in the user container and return the process exit code.
    pub async fn exec_command(&self, request: ExecRequest) -> Result<i32> {
        let started = Instant::now();
        let config_path = self.paths.runner_config();

        RunnerConfig::new(&request, &self.runner)
            .write(&config_path)
            .await
            .map_err(|e| {
                error!(path = %config_path.display(), error = %e, "failed to write runner config");
                AgentError::internal()
            })?;

        let options = ExecOptions::new(vec![
            self.paths.runner_binary().to_string(),
            config_path.display().to_string(),
        ]);
        let mut session = self.cluster.exec(options).await.map_err(|e| {
            error!(error = %e, "failed to open exec session");
            AgentError::internal()
        })?;

        let mut output = RunnerOutput::default();
        while session.is_open() {
            session.update(Some(DRAIN_INTERVAL)).await;
            output.collect(&mut session);
        }

        let resolved = session.returncode();
        session.close_normal().await;
        let runner_code = match resolved {
            Ok(Some(code)) => code,
            Ok(None) => {
                error!("exec session closed without a return code");
                return Err(AgentError::internal());
            }
            Err(e) => {
                error!(error = %e, logs = %output.logs(), "failed to resolve runner exit code");
                return Err(AgentError::internal());
            }
        };

        obs::emit_exec_finished(
            request.command.first().map(String::as_str).unwrap_or_default(),
            Some(runner_code),
            started.elapsed().as_millis() as u64,
        );

        match classify_runner_exit(runner_code) {
            RunnerExit::TimeLimit => Err(AgentError::TimeLimitExceeded),
            RunnerExit::Ambiguous(code) => Err(self.disambiguate(code, &output).await),
            RunnerExit::Failed(code) => {
                error!(runner_code = code, logs = %output.logs(), "runner failed");
                Err(AgentError::internal())
            }
            RunnerExit::Completed => {
                let stdout = output.output();
                parse_process_exit(&stdout).ok_or_else(|| {
                    error!(output = %stdout, logs = %output.logs(), "wrong output from runner");
                    AgentError::internal()
                })
            }
        }
    }

    /// Resolve an ambiguous supervisor exit from the container state.
    async fn disambiguate(&self, runner_code: i32, output: &RunnerOutput) -> AgentError {
        let status = match self.cluster.read_container_status().await {
            Ok(status) => status,
            Err(e) => {
                error!(runner_code, error = %e, "failed to read container status");
                return AgentError::internal();
            }
        };

        match classify_termination(&status.state) {
            Termination::NotTerminated(state) => {
                error!(runner_code, state, "user container in unexpected state");
                AgentError::internal()
            }
            Termination::TmpfsLimit => {
                info!("no space left on container tmpfs");
                AgentError::TmpfsLimitExceeded
            }
            Termination::Aborted => {
                info!("container terminated");
                AgentError::Aborted
            }
            Termination::RamLimit => {
                info!("container OOMKilled");
                AgentError::RamLimitExceeded
            }
            Termination::Unknown { exit_code, reason } => {
                let monitor_logs = match self.cluster.read_container_logs().await {
                    Ok(logs) => logs,
                    Err(e) => format!("<unavailable: {e}>"),
                };
                error!(
                    runner_code,
                    exit_code,
                    reason = reason.as_deref().unwrap_or_default(),
                    runner_logs = %output.logs(),
                    monitor_logs = %monitor_logs,
                    "container killed for unknown reason"
                );
                AgentError::internal()
            }
        }
    }
}
