//! Waiting for the user container to come up.

use std::time::Duration;

use tracing::{debug, error, info};

use crate::cluster::ClusterApi;
use crate::error::AgentError;

/// Bounded polling schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    pub retries: u32,
    pub interval: Duration,
}

impl ReadinessPolicy {
    pub fn new(retries: u32, interval: Duration) -> Self {
        Self {
            retries: retries.max(1),
            interval,
        }
    }
}

/// Poll until the user container is running.
///
/// Control-plane failures propagate as they are. Running out of attempts is
/// an internal agent error.
pub async fn wait_until_running(
    cluster: &dyn ClusterApi,
    policy: ReadinessPolicy,
) -> anyhow::Result<()> {
    let mut last_state = String::new();
    for attempt in 1..=policy.retries {
        let status = cluster.read_container_status().await?;
        if status.state.is_running() {
            info!(attempt, container = %status.name, "user container is running");
            return Ok(());
        }

        last_state = status.state.label().to_string();
        debug!(attempt, state = %last_state, "user container not running yet");
        if attempt < policy.retries {
            tokio::time::sleep(policy.interval).await;
        }
    }

    error!(
        attempts = policy.retries,
        state = %last_state,
        "user container did not start"
    );
    Err(AgentError::internal().into())
}
