//! Fuzzagent Core Library
//!
//! Control plane of the fuzzing agent: exec transport into the user container,
//! exit disambiguation, file transfer, run modes and the run orchestrator.

pub mod cluster;
pub mod error;
pub mod executor;
pub mod fakes;
pub mod measure;
pub mod mode;
pub mod modes;
pub mod obs;
pub mod orchestrator;
pub mod output;
pub mod paths;
pub mod settings;
pub mod telemetry;
pub mod transfer;
pub mod transport;

pub use cluster::{
    ClusterApi, ClusterError, ClusterResult, ContainerState, ContainerStatus, ExecOptions,
    KubeClient,
};
pub use error::{codes, AgentError, ErrorKind, Result};
pub use executor::{ExecRequest, RemoteExecutor};
pub use measure::RunMeasurement;
pub use mode::{Agent, ModeContext, RunMode};
pub use modes::DefaultAgent;
pub use orchestrator::{
    run_agent_with, AgentExitCode, CancelTrigger, Orchestrator, Services, SignalGuard,
};
#[cfg(unix)]
pub use orchestrator::agent_entry;
pub use output::{AgentResult, CrashRecord, Metrics, Statistics, Status};
pub use paths::AgentPaths;
pub use settings::AppSettings;
pub use telemetry::{init_tracing, parse_level};
pub use transfer::FileTransfer;
pub use transport::{Channel, ExecSession, StreamOptions};
