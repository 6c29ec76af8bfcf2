//! Report payloads.
//!
//! Everything the agent sends downstream: the terminal run result, one message
//! per crash, and the pieces they are built from.

use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{codes, AgentError};
use crate::settings::FuzzerSettings;

/// Message type of the terminal run report.
pub const RUN_RESULT_MESSAGE: &str = "agent.fuzzer.result";

/// Message type of a crash report.
pub const NEW_CRASH_MESSAGE: &str = "agent.crash.new";

/// Outcome status carried by every run report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub code: String,
    pub message: String,
    pub details: Option<String>,
}

impl Status {
    pub fn success() -> Self {
        Self {
            code: codes::E_SUCCESS.to_string(),
            message: "Success".to_string(),
            details: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == codes::E_SUCCESS
    }
}

impl From<&AgentError> for Status {
    fn from(err: &AgentError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.message().to_string(),
            details: err.details().map(str::to_string),
        }
    }
}

/// Resource usage snapshot written by the in-container monitor.
///
/// The monitor writes `{"tmpfs", "memory"}`; reports carry `{"disk", "ram"}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    #[serde(alias = "tmpfs")]
    pub disk: u64,
    #[serde(alias = "memory")]
    pub ram: u64,
}

impl Metrics {
    pub fn zeroed() -> Self {
        Self::default()
    }

    /// Read the snapshot at `path`. Missing or corrupt files are errors.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read metrics from {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("corrupt metrics snapshot at {}", path.display()))
    }

    /// Like [`Metrics::load`] but falls back to zeroes.
    pub async fn load_or_zeroed(path: &Path) -> Self {
        match Self::load(path).await {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "using zeroed metrics");
                Self::zeroed()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Seconds the fuzzer actually ran
    pub work_time: u64,
}

/// One defect found during the run.
///
/// Carries the input either inline (base64) or as a reference into the data
/// bucket, never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashRecord {
    /// crash, oom, timeout, leak
    #[serde(rename = "type")]
    pub crash_type: String,
    input_id: Option<String>,
    input: Option<String>,
    pub output: String,
    pub reproduced: bool,
}

impl CrashRecord {
    /// Crash carrying its base64-encoded input inline.
    pub fn inline(
        crash_type: impl Into<String>,
        input_base64: impl Into<String>,
        output: impl Into<String>,
        reproduced: bool,
    ) -> Self {
        Self {
            crash_type: crash_type.into(),
            input_id: None,
            input: Some(input_base64.into()),
            output: output.into(),
            reproduced,
        }
    }

    pub fn input(&self) -> Option<&str> {
        self.input.as_deref()
    }

    pub fn input_id(&self) -> Option<&str> {
        self.input_id.as_deref()
    }

    /// Length of the inline input in base64 characters.
    pub fn inline_len(&self) -> usize {
        self.input.as_ref().map_or(0, String::len)
    }

    /// Replace the inline input with a storage reference.
    pub fn offload(&mut self, input_id: impl Into<String>) {
        self.input = None;
        self.input_id = Some(input_id.into());
    }
}

/// Payload of the terminal report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AgentResult {
    Success {
        status: Status,
        metrics: Metrics,
        crash_count: usize,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        statistics: Option<Statistics>,
    },
    Error {
        status: Status,
        metrics: Metrics,
    },
}

impl AgentResult {
    pub fn status(&self) -> &Status {
        match self {
            AgentResult::Success { status, .. } | AgentResult::Error { status, .. } => status,
        }
    }
}

/// Fields identifying the fuzzer in every message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub user_id: String,
    pub project_id: String,
    pub pool_id: String,
    pub fuzzer_id: String,
    pub fuzzer_rev: String,
    pub fuzzer_engine: String,
    pub fuzzer_lang: String,
}

impl From<&FuzzerSettings> for RunIdentity {
    fn from(fuzzer: &FuzzerSettings) -> Self {
        Self {
            user_id: fuzzer.user_id.clone(),
            project_id: fuzzer.project_id.clone(),
            pool_id: fuzzer.pool_id.clone(),
            fuzzer_id: fuzzer.id.clone(),
            fuzzer_rev: fuzzer.rev.clone(),
            fuzzer_engine: fuzzer.engine.as_str().to_string(),
            fuzzer_lang: fuzzer.lang.as_str().to_string(),
        }
    }
}

/// Body of `agent.fuzzer.result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResultMessage {
    #[serde(flatten)]
    pub identity: RunIdentity,
    pub session_id: String,
    pub agent_mode: String,
    pub start_time: String,
    pub finish_time: String,
    pub agent_result: AgentResult,
}

/// Body of `agent.crash.new`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashMessage {
    #[serde(flatten)]
    pub identity: RunIdentity,
    pub crash: CrashRecord,
    /// Shared by every crash of one run: the run finish time
    pub created: String,
}
