//! Descriptor handed to the in-container supervisor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::settings::RunnerSettings;

/// Command the supervisor should run, and how.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub cwd: PathBuf,
    pub env: BTreeMap<String, String>,
    pub stdin_file: Option<PathBuf>,
    pub stdout_file: Option<PathBuf>,
    pub stderr_file: Option<PathBuf>,
    /// Wall-clock limit in seconds enforced by the supervisor
    pub time_limit: Option<u64>,
}

impl ExecRequest {
    pub fn new<I, S>(command: I, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            cwd: cwd.into(),
            ..Self::default()
        }
    }

    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    pub fn stdin_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin_file = Some(path.into());
        self
    }

    pub fn stdout_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout_file = Some(path.into());
        self
    }

    pub fn stderr_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.stderr_file = Some(path.into());
        self
    }

    pub fn time_limit(mut self, seconds: u64) -> Self {
        self.time_limit = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerStreams {
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

/// JSON document read by the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub command: Vec<String>,
    pub env: Vec<EnvVar>,
    pub cwd: PathBuf,
    pub streams: RunnerStreams,
    pub poll_interval_ms: u64,
    pub grace_period_sec: u64,
    pub run_timeout_sec: Option<u64>,
}

impl RunnerConfig {
    pub fn new(request: &ExecRequest, runner: &RunnerSettings) -> Self {
        Self {
            command: request.command.clone(),
            env: request
                .env
                .iter()
                .map(|(name, value)| EnvVar {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
            cwd: request.cwd.clone(),
            streams: RunnerStreams {
                stdin: request.stdin_file.clone(),
                stdout: request.stdout_file.clone(),
                stderr: request.stderr_file.clone(),
            },
            poll_interval_ms: runner.poll_interval_ms,
            grace_period_sec: runner.grace_period_sec,
            run_timeout_sec: request.time_limit,
        }
    }

    /// Replace the descriptor at `path`.
    pub async fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_vec(self)?;
        tokio::fs::write(path, json).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_runner_config_document() {
        let request = ExecRequest::new(["./target", "-runs=10"], "/mnt/disk")
            .env("ASAN_OPTIONS", "abort_on_error=1")
            .stdout_file("/mnt/tmpfs/fuzzer.log")
            .time_limit(30);
        let runner = RunnerSettings {
            poll_interval_ms: 250,
            grace_period_sec: 5,
        };
        let config = RunnerConfig::new(&request, &runner);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runner.json");
        config.write(&path).await.unwrap();

        let written: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            written,
            json!({
                "command": ["./target", "-runs=10"],
                "env": [{"name": "ASAN_OPTIONS", "value": "abort_on_error=1"}],
                "cwd": "/mnt/disk",
                "streams": {"stdin": null, "stdout": "/mnt/tmpfs/fuzzer.log", "stderr": null},
                "poll_interval_ms": 250,
                "grace_period_sec": 5,
                "run_timeout_sec": 30,
            })
        );
    }
}
