use std::path::Path;
use std::sync::Arc;

use fuzzagent_core::cluster::{ClusterError, ContainerState};
use fuzzagent_core::fakes::{test_settings, FakeCluster, ScriptedSocket};
use fuzzagent_core::transport::Channel;
use fuzzagent_core::{AgentError, AgentPaths, ExecRequest, RemoteExecutor};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn executor(dir: &Path, cluster: Arc<FakeCluster>) -> RemoteExecutor {
    let settings = test_settings(dir);
    RemoteExecutor::new(cluster, AgentPaths::new(&settings), settings.runner.clone())
}

fn request(dir: &Path) -> ExecRequest {
    ExecRequest::new(["./target", "-runs=10"], dir).time_limit(30)
}

fn terminated(exit_code: i32, reason: Option<&str>) -> ContainerState {
    ContainerState::Terminated {
        exit_code,
        reason: reason.map(str::to_string),
    }
}

async fn exec_with(
    runner_code: i32,
    state: Option<ContainerState>,
) -> (Arc<FakeCluster>, Result<i32, AgentError>) {
    let dir = tempfile::tempdir().unwrap();
    let mut cluster = FakeCluster::new()
        .session(ScriptedSocket::finished("", runner_code))
        .logs("monitor: exceeded something");
    if let Some(state) = state {
        cluster = cluster.status(state);
    }
    let cluster = Arc::new(cluster);
    let result = executor(dir.path(), cluster.clone())
        .exec_command(request(dir.path()))
        .await;
    (cluster, result)
}

// ---------------------------------------------------------------------------
// Completed supervisor
// ---------------------------------------------------------------------------

#[tokio::test]
async fn process_exit_code_comes_from_stdout() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new().session(ScriptedSocket::finished("7\n", 0)));

    let code = executor(dir.path(), cluster.clone())
        .exec_command(request(dir.path()))
        .await
        .unwrap();

    assert_eq!(code, 7);
    assert_eq!(cluster.status_reads(), 0);

    let execs = cluster.execs();
    assert_eq!(execs.len(), 1);
    let config_path = dir.path().join("runner.json");
    assert_eq!(
        execs[0].command,
        vec!["/bin/runner".to_string(), config_path.display().to_string()]
    );

    let config: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&config_path).unwrap()).unwrap();
    assert_eq!(config["command"][0], "./target");
    assert_eq!(config["run_timeout_sec"], 30);
}

#[tokio::test]
async fn stdout_split_across_frames_is_joined() {
    let dir = tempfile::tempdir().unwrap();
    let socket = ScriptedSocket::new()
        .data(Channel::Stdout, b"4")
        .data(Channel::Stderr, b"runner chatter")
        .data(Channel::Stdout, b"2")
        .exit_status(0)
        .close_frame();
    let cluster = Arc::new(FakeCluster::new().session(socket));

    let code = executor(dir.path(), cluster)
        .exec_command(request(dir.path()))
        .await
        .unwrap();
    assert_eq!(code, 42);
}

#[tokio::test]
async fn garbage_stdout_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new().session(ScriptedSocket::finished("abc", 0)));

    let err = executor(dir.path(), cluster)
        .exec_command(request(dir.path()))
        .await
        .unwrap_err();
    assert!(err.is_internal());
}

#[tokio::test]
async fn missing_exit_status_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let socket = ScriptedSocket::new()
        .data(Channel::Stdout, b"0")
        .fail("connection reset");
    let cluster = Arc::new(FakeCluster::new().session(socket));

    let err = executor(dir.path(), cluster)
        .exec_command(request(dir.path()))
        .await
        .unwrap_err();
    assert!(err.is_internal());
}

#[tokio::test]
async fn exec_failure_is_internal_error() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(
        FakeCluster::new().exec_error(ClusterError::Transport("refused".into())),
    );

    let err = executor(dir.path(), cluster)
        .exec_command(request(dir.path()))
        .await
        .unwrap_err();
    assert!(err.is_internal());
}

// ---------------------------------------------------------------------------
// Supervisor exit codes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn time_limit_needs_no_status_query() {
    let (cluster, result) = exec_with(101, Some(terminated(101, None))).await;
    assert_eq!(result.unwrap_err(), AgentError::TimeLimitExceeded);
    assert_eq!(cluster.status_reads(), 0);
}

#[tokio::test]
async fn other_supervisor_failure_is_internal() {
    let (cluster, result) = exec_with(1, None).await;
    assert!(result.unwrap_err().is_internal());
    assert_eq!(cluster.status_reads(), 0);
}

#[tokio::test]
async fn ambiguous_codes_resolve_from_container_state() {
    for runner_code in [102, 137, 143] {
        let (cluster, result) = exec_with(runner_code, Some(terminated(101, None))).await;
        assert_eq!(result.unwrap_err(), AgentError::TmpfsLimitExceeded);
        assert_eq!(cluster.status_reads(), 1);

        let (_, result) = exec_with(runner_code, Some(terminated(102, None))).await;
        assert_eq!(result.unwrap_err(), AgentError::Aborted);

        let (_, result) = exec_with(runner_code, Some(terminated(137, Some("OOMKilled")))).await;
        assert_eq!(result.unwrap_err(), AgentError::RamLimitExceeded);

        let (_, result) = exec_with(runner_code, Some(terminated(1, Some("Error")))).await;
        assert!(result.unwrap_err().is_internal());
    }
}

#[tokio::test]
async fn ambiguous_code_with_live_container_is_internal() {
    let (_, result) = exec_with(137, Some(ContainerState::Running)).await;
    assert!(result.unwrap_err().is_internal());

    let (_, result) = exec_with(143, Some(ContainerState::Waiting { reason: None })).await;
    assert!(result.unwrap_err().is_internal());
}

#[tokio::test]
async fn unreadable_container_status_is_internal() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(
        FakeCluster::new()
            .session(ScriptedSocket::finished("", 137))
            .status_error(ClusterError::NotFound("pod".into())),
    );

    let err = executor(dir.path(), cluster.clone())
        .exec_command(request(dir.path()))
        .await
        .unwrap_err();
    assert!(err.is_internal());
    assert_eq!(cluster.status_reads(), 1);
}
