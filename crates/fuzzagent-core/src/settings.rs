//! Agent configuration.
//!
//! One [`AppSettings`] value is parsed at start-up (command line first, then the
//! environment) and passed explicitly to every component. Every option has an
//! environment variable so the pod spec can configure the agent without
//! arguments.

use std::path::PathBuf;

use clap::{Args, Parser, ValueEnum};
use serde::{Deserialize, Serialize};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
    Test,
}

/// What the agent does in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Short smoke run validating that the fuzzer starts at all
    Firstrun,
    /// Regular fuzzing session
    Fuzzing,
    /// Corpus minimisation over merged and unmerged corpora
    Merge,
}

impl AgentMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentMode::Firstrun => "firstrun",
            AgentMode::Fuzzing => "fuzzing",
            AgentMode::Merge => "merge",
        }
    }
}

/// Fuzzing engine the target was built against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum EngineId {
    #[value(name = "afl")]
    #[serde(rename = "afl")]
    Afl,
    #[value(name = "afl.rs")]
    #[serde(rename = "afl.rs")]
    AflRs,
    #[value(name = "sharpfuzz-afl")]
    #[serde(rename = "sharpfuzz-afl")]
    SharpfuzzAfl,
    #[value(name = "libfuzzer")]
    #[serde(rename = "libfuzzer")]
    Libfuzzer,
    #[value(name = "jazzer")]
    #[serde(rename = "jazzer")]
    Jazzer,
    #[value(name = "atheris")]
    #[serde(rename = "atheris")]
    Atheris,
    #[value(name = "cargo-fuzz")]
    #[serde(rename = "cargo-fuzz")]
    CargoFuzz,
    #[value(name = "go-fuzz-libfuzzer")]
    #[serde(rename = "go-fuzz-libfuzzer")]
    GoFuzzLibfuzzer,
    #[value(name = "sharpfuzz-libfuzzer")]
    #[serde(rename = "sharpfuzz-libfuzzer")]
    SharpfuzzLibfuzzer,
}

impl EngineId {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineId::Afl => "afl",
            EngineId::AflRs => "afl.rs",
            EngineId::SharpfuzzAfl => "sharpfuzz-afl",
            EngineId::Libfuzzer => "libfuzzer",
            EngineId::Jazzer => "jazzer",
            EngineId::Atheris => "atheris",
            EngineId::CargoFuzz => "cargo-fuzz",
            EngineId::GoFuzzLibfuzzer => "go-fuzz-libfuzzer",
            EngineId::SharpfuzzLibfuzzer => "sharpfuzz-libfuzzer",
        }
    }

    /// Engines driven through the libFuzzer command-line interface.
    pub fn is_libfuzzer_compatible(&self) -> bool {
        matches!(
            self,
            EngineId::Libfuzzer
                | EngineId::Jazzer
                | EngineId::Atheris
                | EngineId::CargoFuzz
                | EngineId::GoFuzzLibfuzzer
                | EngineId::SharpfuzzLibfuzzer
        )
    }
}

/// Language of the fuzz target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LangId {
    Go,
    Cpp,
    Rust,
    Java,
    Swift,
    Python,
}

impl LangId {
    pub fn as_str(&self) -> &'static str {
        match self {
            LangId::Go => "go",
            LangId::Cpp => "cpp",
            LangId::Rust => "rust",
            LangId::Java => "java",
            LangId::Swift => "swift",
            LangId::Python => "python",
        }
    }
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "fuzzagentd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Control agent for remote fuzzing runs", long_about = None)]
pub struct AppSettings {
    #[arg(long, env = "ENVIRONMENT", value_enum)]
    pub environment: Environment,

    /// Default log verbosity when RUST_LOG is not set
    #[arg(long, env = "AGENT_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit JSON log lines
    #[arg(long, env = "AGENT_LOG_JSON")]
    pub log_json: bool,

    #[command(flatten)]
    pub kubernetes: KubernetesSettings,

    #[command(flatten)]
    pub runner: RunnerSettings,

    #[command(flatten)]
    pub paths: PathsSettings,

    #[command(flatten)]
    pub agent: AgentSettings,

    #[command(flatten)]
    pub fuzzer: FuzzerSettings,

    #[command(flatten)]
    pub storage: StorageSettings,

    #[command(flatten)]
    pub message_queue: MessageQueueSettings,
}

#[derive(Debug, Clone, Args)]
pub struct KubernetesSettings {
    #[arg(long = "k8s-namespace", env = "KUBERNETES_NAMESPACE")]
    pub namespace: String,

    #[arg(long = "k8s-pod-name", env = "KUBERNETES_POD_NAME")]
    pub pod_name: String,

    /// Sibling container running the fuzz target
    #[arg(long = "k8s-user-container", env = "KUBERNETES_USER_CONTAINER")]
    pub user_container: String,

    #[arg(
        long = "k8s-api-url",
        env = "KUBERNETES_API_URL",
        default_value = "https://kubernetes.default.svc"
    )]
    pub api_url: String,

    #[arg(
        long = "k8s-token-path",
        env = "KUBERNETES_TOKEN_PATH",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount/token"
    )]
    pub token_path: PathBuf,

    #[arg(
        long = "k8s-ca-path",
        env = "KUBERNETES_CA_PATH",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt"
    )]
    pub ca_path: PathBuf,
}

/// Tunables handed to the in-container supervisor.
#[derive(Debug, Clone, Args)]
pub struct RunnerSettings {
    #[arg(long = "runner-poll-interval-ms", env = "RUNNER_POLL_INTERVAL_MS")]
    pub poll_interval_ms: u64,

    #[arg(long = "runner-grace-period-sec", env = "RUNNER_GRACE_PERIOD_SEC")]
    pub grace_period_sec: u64,
}

#[derive(Debug, Clone, Args)]
pub struct PathsSettings {
    /// Supervisor binary inside the user container
    #[arg(long = "path-runner-binary", env = "PATH_RUNNER_BINARY")]
    pub runner_binary: String,

    /// Resource usage snapshot written by the in-container monitor
    #[arg(long = "path-metrics", env = "PATH_METRICS")]
    pub metrics: PathBuf,

    /// Disk volume shared with the user container
    #[arg(long = "path-volume-disk", env = "PATH_VOLUME_DISK", value_parser = existing_dir)]
    pub volume_disk: PathBuf,

    /// Tmpfs volume shared with the user container
    #[arg(long = "path-volume-tmpfs", env = "PATH_VOLUME_TMPFS", value_parser = existing_dir)]
    pub volume_tmpfs: PathBuf,
}

#[derive(Debug, Clone, Args)]
pub struct AgentSettings {
    #[arg(long = "agent-mode", env = "AGENT_MODE", value_enum)]
    pub mode: AgentMode,

    /// Fuzz target binary, relative to the disk volume
    #[arg(long = "agent-default-target", env = "AGENT_DEFAULT_TARGET")]
    pub default_target: String,

    /// How many times the sibling container is polled before giving up
    #[arg(
        long = "agent-readiness-retries",
        env = "AGENT_READINESS_RETRIES",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub readiness_retries: u32,

    #[arg(
        long = "agent-readiness-interval-ms",
        env = "AGENT_READINESS_INTERVAL_MS",
        default_value_t = 1000
    )]
    pub readiness_interval_ms: u64,
}

/// Identity and limits of the fuzzer under test.
#[derive(Debug, Clone, Args)]
pub struct FuzzerSettings {
    #[arg(long = "fuzzer-session-id", env = "FUZZER_SESSION_ID")]
    pub session_id: String,

    #[arg(long = "fuzzer-user-id", env = "FUZZER_USER_ID")]
    pub user_id: String,

    #[arg(long = "fuzzer-project-id", env = "FUZZER_PROJECT_ID")]
    pub project_id: String,

    #[arg(long = "fuzzer-pool-id", env = "FUZZER_POOL_ID")]
    pub pool_id: String,

    #[arg(long = "fuzzer-id", env = "FUZZER_ID")]
    pub id: String,

    #[arg(long = "fuzzer-rev", env = "FUZZER_REV")]
    pub rev: String,

    #[arg(long = "fuzzer-lang", env = "FUZZER_LANG", value_enum)]
    pub lang: LangId,

    #[arg(long = "fuzzer-engine", env = "FUZZER_ENGINE", value_enum)]
    pub engine: EngineId,

    /// Megabytes
    #[arg(long = "fuzzer-ram-limit", env = "FUZZER_RAM_LIMIT", value_parser = positive)]
    pub ram_limit: u64,

    /// Seconds
    #[arg(long = "fuzzer-time-limit", env = "FUZZER_TIME_LIMIT", value_parser = positive)]
    pub time_limit: u64,

    #[arg(
        long = "fuzzer-time-limit-firstrun",
        env = "FUZZER_TIME_LIMIT_FIRSTRUN",
        value_parser = positive
    )]
    pub time_limit_firstrun: u64,

    #[arg(
        long = "fuzzer-num-iterations",
        env = "FUZZER_NUM_ITERATIONS",
        value_parser = positive
    )]
    pub num_iterations: u64,

    #[arg(
        long = "fuzzer-num-iterations-firstrun",
        env = "FUZZER_NUM_ITERATIONS_FIRSTRUN",
        value_parser = positive
    )]
    pub num_iterations_firstrun: u64,

    /// Largest crash input (base64 characters) sent inline with the report
    #[arg(
        long = "fuzzer-crash-max-size",
        env = "FUZZER_CRASH_MAX_SIZE",
        value_parser = positive
    )]
    pub crash_max_size: u64,
}

#[derive(Debug, Clone, Args)]
pub struct StorageSettings {
    /// Root directory of the object store
    #[arg(long = "storage-root", env = "S3_ROOT")]
    pub root: PathBuf,

    #[arg(long = "bucket-fuzzers", env = "S3_BUCKET_FUZZERS")]
    pub bucket_fuzzers: String,

    #[arg(long = "bucket-data", env = "S3_BUCKET_DATA")]
    pub bucket_data: String,
}

#[derive(Debug, Clone, Args)]
pub struct MessageQueueSettings {
    /// Spool directory picked up by the queue forwarder
    #[arg(long = "mq-spool-dir", env = "MQ_SPOOL_DIR")]
    pub spool_dir: PathBuf,

    #[arg(long = "mq-queue-scheduler", env = "MQ_QUEUE_SCHEDULER")]
    pub scheduler_queue: String,

    #[arg(long = "mq-queue-crash-analyzer", env = "MQ_QUEUE_CRASH_ANALYZER")]
    pub crash_analyzer_queue: String,
}

fn positive(value: &str) -> Result<u64, String> {
    match value.trim().parse::<u64>() {
        Ok(0) => Err("must be greater than zero".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

fn existing_dir(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if !path.exists() {
        return Err("Directory does not exist".to_string());
    }
    if !path.is_dir() {
        return Err("Provided path is not a directory".to_string());
    }
    Ok(path)
}
