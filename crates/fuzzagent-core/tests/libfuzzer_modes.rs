use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use fuzzagent_core::fakes::{settings_args, FakeCluster, ScriptedSocket};
use fuzzagent_core::mode::Agent;
use fuzzagent_core::{
    AgentError, AgentPaths, AppSettings, DefaultAgent, FileTransfer, ModeContext, RemoteExecutor,
    RunMode,
};
use fuzzagent_state::fakes::MemoryObjectStorage;
use fuzzagent_state::ObjectStorage;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn settings(dir: &Path, mode: &str, engine: &str) -> Arc<AppSettings> {
    let args: Vec<String> = settings_args(dir)
        .into_iter()
        .map(|arg| {
            if arg.starts_with("--agent-mode=") {
                format!("--agent-mode={mode}")
            } else if arg.starts_with("--fuzzer-engine=") {
                format!("--fuzzer-engine={engine}")
            } else {
                arg
            }
        })
        .collect();
    Arc::new(AppSettings::try_parse_from(args).unwrap())
}

fn context(
    settings: Arc<AppSettings>,
    cluster: Arc<FakeCluster>,
    storage: Arc<MemoryObjectStorage>,
) -> ModeContext {
    let paths = AgentPaths::new(&settings);
    let executor = RemoteExecutor::new(cluster, paths.clone(), settings.runner.clone());
    ModeContext {
        transfer: FileTransfer::new(storage, &settings),
        executor: Arc::new(executor),
        settings,
        paths,
        run_id: "run1".to_string(),
    }
}

fn select(
    dir: &Path,
    mode: &str,
    cluster: Arc<FakeCluster>,
    storage: Arc<MemoryObjectStorage>,
) -> Box<dyn RunMode> {
    DefaultAgent
        .select_mode(context(settings(dir, mode, "libfuzzer"), cluster, storage))
        .unwrap()
}

fn write_file(path: PathBuf, contents: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

// ---------------------------------------------------------------------------
// Mode selection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn afl_engines_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = context(
        settings(dir.path(), "fuzzing", "afl"),
        Arc::new(FakeCluster::new()),
        Arc::new(MemoryObjectStorage::new()),
    );

    let err = DefaultAgent.select_mode(ctx).err().unwrap();
    assert!(matches!(
        err.downcast_ref::<AgentError>(),
        Some(AgentError::ConfigInvalid { .. })
    ));
}

// ---------------------------------------------------------------------------
// Fuzzing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fuzzing_collects_crashes_and_saves_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryObjectStorage::new());
    storage.put_object("fuzzers", "f/r/seeds/seed-1", b"seed").await.unwrap();
    storage
        .put_object("data", "f/r/corpus/merged/known", b"known")
        .await
        .unwrap();

    let root = dir.path().to_path_buf();
    let cluster = Arc::new(
        FakeCluster::new()
            .session(ScriptedSocket::finished("1", 0))
            .on_exec(move |_| {
                write_file(root.join("crashes/crash-1234"), "boom");
                write_file(root.join("crashes/slow-unit-5"), "ignored");
                write_file(root.join("corpus/fresh"), "fresh");
            }),
    );

    let mut mode = select(dir.path(), "fuzzing", cluster.clone(), storage.clone());
    mode.run().await.unwrap();

    assert_eq!(std::fs::read(dir.path().join("seeds/seed-1")).unwrap(), b"seed");
    assert_eq!(std::fs::read(dir.path().join("corpus/known")).unwrap(), b"known");

    let crashes = mode.crashes();
    assert_eq!(crashes.len(), 1);
    assert_eq!(crashes[0].crash_type, "crash");
    assert_eq!(crashes[0].input(), Some("Ym9vbQ=="));
    assert!(!crashes[0].reproduced);
    assert!(mode.statistics().is_some());

    let config: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("runner.json")).unwrap()).unwrap();
    let command: Vec<String> = serde_json::from_value(config["command"].clone()).unwrap();
    assert_eq!(command[0], dir.path().join("target").display().to_string());
    assert!(command.contains(&"-runs=1000".to_string()));
    assert!(command.contains(&"-max_total_time=60".to_string()));
    assert!(command.contains(&"-rss_limit_mb=2048".to_string()));
    assert_eq!(config["run_timeout_sec"], 120);

    mode.finish().await.unwrap();
    assert_eq!(
        storage.object("data", "f/r/corpus/tmp/run1/fresh").unwrap(),
        b"fresh"
    );
    assert_eq!(
        storage.object("data", "f/r/corpus/tmp/run1/known").unwrap(),
        b"known"
    );
}

#[tokio::test]
async fn fuzzing_failure_without_crashes_is_launch_error() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new().session(ScriptedSocket::finished("1", 0)));

    let mut mode = select(dir.path(), "fuzzing", cluster, Arc::new(MemoryObjectStorage::new()));
    let err = mode.run().await.unwrap_err();

    match err.downcast_ref::<AgentError>() {
        Some(AgentError::LaunchError { message, .. }) => {
            assert_eq!(message, "Fuzzer exited abnormally")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn fuzzing_that_never_started_uploads_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryObjectStorage::new());
    let cluster = Arc::new(FakeCluster::new());

    let mut mode = select(dir.path(), "fuzzing", cluster, storage.clone());
    write_file(dir.path().join("corpus/stale"), "stale");
    mode.finish().await.unwrap();
    assert!(storage.is_empty());
}

// ---------------------------------------------------------------------------
// First run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_run_uses_first_run_limits() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new().session(ScriptedSocket::finished("0", 0)));

    let mut mode = select(dir.path(), "firstrun", cluster, Arc::new(MemoryObjectStorage::new()));
    mode.run().await.unwrap();
    assert!(mode.crashes().is_empty());

    let config: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dir.path().join("runner.json")).unwrap()).unwrap();
    let command: Vec<String> = serde_json::from_value(config["command"].clone()).unwrap();
    assert!(command.contains(&"-runs=10".to_string()));
    assert_eq!(config["run_timeout_sec"], 10);
}

#[tokio::test]
async fn first_run_resource_limit_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(
        FakeCluster::new()
            .session(ScriptedSocket::finished("", 137))
            .status(fuzzagent_core::ContainerState::Terminated {
                exit_code: 137,
                reason: Some("OOMKilled".into()),
            }),
    );

    let mut mode = select(dir.path(), "firstrun", cluster, Arc::new(MemoryObjectStorage::new()));
    let err = mode.run().await.unwrap_err();
    assert_eq!(
        err.downcast_ref::<AgentError>(),
        Some(&AgentError::RamLimitExceeded)
    );
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

#[tokio::test]
async fn merge_without_unmerged_corpus_is_a_noop() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new());
    let storage = Arc::new(MemoryObjectStorage::new());

    let mut mode = select(dir.path(), "merge", cluster.clone(), storage.clone());
    mode.run().await.unwrap();
    mode.finish().await.unwrap();

    assert!(cluster.execs().is_empty());
    assert!(storage.is_empty());
}

#[tokio::test]
async fn merge_replaces_corpus_and_consumes_unmerged() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryObjectStorage::new());
    storage.put_object("data", "f/r/corpus/merged/old", b"old").await.unwrap();
    storage
        .put_object("data", "f/r/corpus/tmp/runA/new", b"new")
        .await
        .unwrap();

    let root = dir.path().to_path_buf();
    let cluster = Arc::new(
        FakeCluster::new()
            .session(ScriptedSocket::finished("0", 0))
            .on_exec(move |_| write_file(root.join("corpus_merged/new"), "new")),
    );

    let mut mode = select(dir.path(), "merge", cluster, storage.clone());
    mode.run().await.unwrap();
    assert_eq!(
        std::fs::read(dir.path().join("corpus_unmerged/runA/new")).unwrap(),
        b"new"
    );

    mode.finish().await.unwrap();
    assert_eq!(storage.object("data", "f/r/corpus/merged/new").unwrap(), b"new");
    assert!(storage.object("data", "f/r/corpus/merged/old").is_none());
    assert!(storage.object("data", "f/r/corpus/tmp/runA/new").is_none());
}

#[tokio::test]
async fn failed_merge_keeps_unmerged_corpus() {
    let dir = tempfile::tempdir().unwrap();
    let storage = Arc::new(MemoryObjectStorage::new());
    storage
        .put_object("data", "f/r/corpus/tmp/runA/new", b"new")
        .await
        .unwrap();
    let cluster = Arc::new(FakeCluster::new().session(ScriptedSocket::finished("1", 0)));

    let mut mode = select(dir.path(), "merge", cluster, storage.clone());
    assert!(mode.run().await.is_err());
    mode.finish().await.unwrap();
    assert!(storage.object("data", "f/r/corpus/tmp/runA/new").is_some());
}
