//! Control-plane access for the sibling container.
//!
//! Only what the agent consumes is modelled: the lifecycle state of the user
//! container, its logs, and exec sessions into it.

mod kube;

pub use kube::KubeClient;

use async_trait::async_trait;
use serde::Deserialize;

use crate::transport::{ExecSession, StreamOptions};

/// Errors produced by the control-plane client.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClusterError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Control plane returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Control plane unreachable: {0}")]
    Transport(String),

    #[error("Invalid control plane configuration: {0}")]
    Config(String),

    #[error("Unexpected control plane response: {0}")]
    Decode(String),
}

/// Result type for control-plane operations.
pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// Lifecycle state of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Waiting { reason: Option<String> },
    Terminated { exit_code: i32, reason: Option<String> },
}

impl ContainerState {
    pub fn label(&self) -> &'static str {
        match self {
            ContainerState::Running => "Running",
            ContainerState::Waiting { .. } => "Waiting",
            ContainerState::Terminated { .. } => "Terminated",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ContainerState::Running)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    pub name: String,
    pub state: ContainerState,
}

/// Parameters of one exec session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    pub command: Vec<String>,
    pub streams: StreamOptions,
    pub stdin: bool,
    pub tty: bool,
}

impl ExecOptions {
    /// Non-interactive command with stdout and stderr kept apart.
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            streams: StreamOptions::default(),
            stdin: false,
            tty: false,
        }
    }
}

/// Narrow control-plane interface consumed by the executor and orchestrator.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// State of the user container.
    async fn read_container_status(&self) -> ClusterResult<ContainerStatus>;

    /// Logs of the user container (the resource monitor's output).
    async fn read_container_logs(&self) -> ClusterResult<String>;

    /// Open an exec session into the user container.
    async fn exec(&self, options: ExecOptions) -> ClusterResult<ExecSession>;
}

// ---------------------------------------------------------------------------
// Pod status decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Pod {
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PodStatus {
    #[serde(default)]
    container_statuses: Vec<RawContainerStatus>,
}

#[derive(Debug, Deserialize)]
struct RawContainerStatus {
    name: String,
    #[serde(default)]
    state: RawState,
}

#[derive(Debug, Default, Deserialize)]
struct RawState {
    #[serde(default)]
    running: Option<serde_json::Value>,
    #[serde(default)]
    waiting: Option<RawWaiting>,
    #[serde(default)]
    terminated: Option<RawTerminated>,
}

#[derive(Debug, Deserialize)]
struct RawWaiting {
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTerminated {
    exit_code: i32,
    #[serde(default)]
    reason: Option<String>,
}

impl From<RawState> for ContainerState {
    fn from(raw: RawState) -> Self {
        if let Some(t) = raw.terminated {
            ContainerState::Terminated {
                exit_code: t.exit_code,
                reason: t.reason,
            }
        } else if raw.running.is_some() {
            ContainerState::Running
        } else {
            ContainerState::Waiting {
                reason: raw.waiting.and_then(|w| w.reason),
            }
        }
    }
}

/// Pick the status of `container` out of a pod document.
pub(crate) fn container_status_from_pod(
    pod: &[u8],
    container: &str,
) -> ClusterResult<ContainerStatus> {
    let pod: Pod = serde_json::from_slice(pod).map_err(|e| ClusterError::Decode(e.to_string()))?;
    pod.status
        .into_iter()
        .flat_map(|s| s.container_statuses)
        .find(|c| c.name == container)
        .map(|c| ContainerStatus {
            name: c.name,
            state: c.state.into(),
        })
        .ok_or_else(|| ClusterError::NotFound(format!("container {container} in pod status")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod(statuses: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({"status": {"containerStatuses": statuses}})).unwrap()
    }

    #[test]
    fn test_selects_named_container() {
        let raw = pod(json!([
            {"name": "agent", "state": {"running": {"startedAt": "2024-01-01T00:00:00Z"}}},
            {"name": "user", "state": {"terminated": {"exitCode": 101, "reason": "Error"}}},
        ]));
        let status = container_status_from_pod(&raw, "user").unwrap();
        assert_eq!(
            status.state,
            ContainerState::Terminated {
                exit_code: 101,
                reason: Some("Error".into())
            }
        );
        let agent = container_status_from_pod(&raw, "agent").unwrap();
        assert!(agent.state.is_running());
    }

    #[test]
    fn test_waiting_and_empty_state() {
        let raw = pod(json!([
            {"name": "user", "state": {"waiting": {"reason": "ContainerCreating"}}},
            {"name": "other"},
        ]));
        assert_eq!(
            container_status_from_pod(&raw, "user").unwrap().state,
            ContainerState::Waiting {
                reason: Some("ContainerCreating".into())
            }
        );
        assert_eq!(
            container_status_from_pod(&raw, "other").unwrap().state.label(),
            "Waiting"
        );
    }

    #[test]
    fn test_missing_container_is_not_found() {
        let raw = pod(json!([]));
        assert!(matches!(
            container_status_from_pod(&raw, "user"),
            Err(ClusterError::NotFound(_))
        ));
        assert!(matches!(
            container_status_from_pod(b"{}", "user"),
            Err(ClusterError::NotFound(_))
        ));
        assert!(matches!(
            container_status_from_pod(b"oops", "user"),
            Err(ClusterError::Decode(_))
        ));
    }
}
