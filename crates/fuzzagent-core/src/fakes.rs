//! Test doubles for the control plane, the exec socket and run modes.
//!
//! Used by this crate's unit tests and by the integration tests under `tests/`.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::Parser;

use crate::cluster::{ClusterApi, ClusterError, ClusterResult, ContainerState, ContainerStatus, ExecOptions};
use crate::error::AgentError;
use crate::mode::{Agent, ModeContext, RunMode};
use crate::output::{CrashRecord, Statistics, Status};
use crate::settings::AppSettings;
use crate::transfer::FileTransfer;
use crate::transport::{Channel, ExecSession, Frame, FrameSocket, TransportError, TransportResult};

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Complete command line for a fuzzing run rooted at `dir`.
pub fn settings_args(dir: &Path) -> Vec<String> {
    let d = dir.display();
    let mut args: Vec<String> = [
        "fuzzagentd",
        "--environment=test",
        "--k8s-namespace=ns",
        "--k8s-pod-name=pod",
        "--k8s-user-container=user",
        "--runner-poll-interval-ms=100",
        "--runner-grace-period-sec=5",
        "--path-runner-binary=/bin/runner",
        "--agent-mode=fuzzing",
        "--agent-default-target=target",
        "--fuzzer-session-id=s",
        "--fuzzer-user-id=u",
        "--fuzzer-project-id=p",
        "--fuzzer-pool-id=pl",
        "--fuzzer-id=f",
        "--fuzzer-rev=r",
        "--fuzzer-lang=rust",
        "--fuzzer-engine=cargo-fuzz",
        "--fuzzer-ram-limit=2048",
        "--fuzzer-time-limit=60",
        "--fuzzer-time-limit-firstrun=10",
        "--fuzzer-num-iterations=1000",
        "--fuzzer-num-iterations-firstrun=10",
        "--fuzzer-crash-max-size=1024",
        "--bucket-fuzzers=fuzzers",
        "--bucket-data=data",
        "--mq-queue-scheduler=scheduler",
        "--mq-queue-crash-analyzer=crash-analyzer",
    ]
    .into_iter()
    .map(String::from)
    .collect();

    args.push(format!("--path-metrics={d}/metrics.json"));
    args.push(format!("--path-volume-disk={d}"));
    args.push(format!("--path-volume-tmpfs={d}"));
    args.push(format!("--storage-root={d}/storage"));
    args.push(format!("--mq-spool-dir={d}/spool"));
    args
}

/// Parsed [`settings_args`].
pub fn test_settings(dir: &Path) -> AppSettings {
    AppSettings::try_parse_from(settings_args(dir)).expect("test settings must parse")
}

// ---------------------------------------------------------------------------
// ScriptedSocket
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum Scripted {
    Frame(Frame),
    Fail(String),
    End,
}

/// What the agent did to a [`ScriptedSocket`].
#[derive(Debug, Default)]
pub struct SocketLog {
    pub sent: Vec<Vec<u8>>,
    pub closed: Option<(u16, String)>,
    pub close_calls: u32,
}

/// Frame socket replaying a fixed script.
///
/// An exhausted script reads as end of stream unless `then_hang` was set.
#[derive(Debug, Default)]
pub struct ScriptedSocket {
    script: VecDeque<Scripted>,
    hang: bool,
    log: Arc<Mutex<SocketLog>>,
}

impl ScriptedSocket {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supervisor that printed `stdout` and exited with `runner_code`.
    pub fn finished(stdout: &str, runner_code: i32) -> Self {
        Self::new()
            .data(Channel::Stdout, stdout.as_bytes())
            .exit_status(runner_code)
            .close_frame()
    }

    pub fn data(self, channel: Channel, payload: &[u8]) -> Self {
        let mut frame = Vec::with_capacity(payload.len() + 1);
        frame.push(channel.id());
        frame.extend_from_slice(payload);
        self.raw(frame)
    }

    pub fn raw(mut self, frame: Vec<u8>) -> Self {
        self.script.push_back(Scripted::Frame(Frame::Data(frame)));
        self
    }

    pub fn close_frame(mut self) -> Self {
        self.script.push_back(Scripted::Frame(Frame::Close));
        self
    }

    pub fn fail(mut self, reason: &str) -> Self {
        self.script.push_back(Scripted::Fail(reason.to_string()));
        self
    }

    pub fn end_of_stream(mut self) -> Self {
        self.script.push_back(Scripted::End);
        self
    }

    /// Block forever once the script runs out.
    pub fn then_hang(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Error-channel status for a command exiting with `code`.
    pub fn exit_status(self, code: i32) -> Self {
        let status = if code == 0 {
            serde_json::json!({"metadata": {}, "status": "Success"})
        } else {
            serde_json::json!({
                "metadata": {},
                "status": "Failure",
                "reason": "NonZeroExitCode",
                "details": {"causes": [{"reason": "ExitCode", "message": code.to_string()}]},
            })
        };
        self.data(Channel::Error, status.to_string().as_bytes())
    }

    pub fn log(&self) -> Arc<Mutex<SocketLog>> {
        self.log.clone()
    }
}

#[async_trait]
impl FrameSocket for ScriptedSocket {
    async fn send(&mut self, payload: Vec<u8>) -> TransportResult<()> {
        self.log.lock().unwrap().sent.push(payload);
        Ok(())
    }

    async fn recv(&mut self) -> Option<TransportResult<Frame>> {
        match self.script.pop_front() {
            Some(Scripted::Frame(frame)) => Some(Ok(frame)),
            Some(Scripted::Fail(reason)) => Some(Err(TransportError::Socket(reason))),
            Some(Scripted::End) => None,
            None if self.hang => {
                std::future::pending::<()>().await;
                None
            }
            None => None,
        }
    }

    async fn close(&mut self, code: u16, reason: &str) -> TransportResult<()> {
        let mut log = self.log.lock().unwrap();
        log.close_calls += 1;
        log.closed = Some((code, reason.to_string()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeCluster
// ---------------------------------------------------------------------------

type ExecHook = Box<dyn Fn(&ExecOptions) + Send + Sync>;

/// Control plane serving scripted container states and exec sessions.
///
/// Status results are consumed in order and the last one repeats; with none
/// configured the container is running. Each exec consumes one session.
#[derive(Default)]
pub struct FakeCluster {
    statuses: Mutex<VecDeque<ClusterResult<ContainerState>>>,
    sessions: Mutex<VecDeque<ClusterResult<ScriptedSocket>>>,
    logs: Mutex<Option<String>>,
    execs: Mutex<Vec<ExecOptions>>,
    status_reads: AtomicUsize,
    on_exec: Option<ExecHook>,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(self, state: ContainerState) -> Self {
        self.statuses.lock().unwrap().push_back(Ok(state));
        self
    }

    pub fn status_error(self, err: ClusterError) -> Self {
        self.statuses.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn session(self, socket: ScriptedSocket) -> Self {
        self.sessions.lock().unwrap().push_back(Ok(socket));
        self
    }

    pub fn exec_error(self, err: ClusterError) -> Self {
        self.sessions.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn logs(self, logs: &str) -> Self {
        *self.logs.lock().unwrap() = Some(logs.to_string());
        self
    }

    /// Run `hook` on every exec, before the session is handed out.
    pub fn on_exec(mut self, hook: impl Fn(&ExecOptions) + Send + Sync + 'static) -> Self {
        self.on_exec = Some(Box::new(hook));
        self
    }

    pub fn status_reads(&self) -> usize {
        self.status_reads.load(Ordering::SeqCst)
    }

    pub fn execs(&self) -> Vec<ExecOptions> {
        self.execs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn read_container_status(&self) -> ClusterResult<ContainerStatus> {
        self.status_reads.fetch_add(1, Ordering::SeqCst);
        let mut statuses = self.statuses.lock().unwrap();
        let next = if statuses.len() > 1 {
            statuses.pop_front()
        } else {
            statuses.front().cloned()
        };
        let state = next.unwrap_or(Ok(ContainerState::Running))?;
        Ok(ContainerStatus {
            name: "user".to_string(),
            state,
        })
    }

    async fn read_container_logs(&self) -> ClusterResult<String> {
        self.logs
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClusterError::NotFound("logs".to_string()))
    }

    async fn exec(&self, options: ExecOptions) -> ClusterResult<ExecSession> {
        self.execs.lock().unwrap().push(options.clone());
        if let Some(hook) = &self.on_exec {
            hook(&options);
        }
        let socket = self
            .sessions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ClusterError::Transport("no scripted session".to_string())))?;
        Ok(ExecSession::new(Box::new(socket), options.streams))
    }
}

// ---------------------------------------------------------------------------
// ScriptedAgent
// ---------------------------------------------------------------------------

/// How one phase of a [`ScriptedAgent`] mode behaves.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    Fail(AgentError),
    /// Fail with an error that is not an [`AgentError`]
    Unhandled(String),
    Panic,
    Hang,
}

impl Behavior {
    async fn perform(&self) -> anyhow::Result<()> {
        match self {
            Behavior::Succeed => Ok(()),
            Behavior::Fail(err) => Err(err.clone().into()),
            Behavior::Unhandled(msg) => Err(anyhow::anyhow!("{msg}")),
            Behavior::Panic => panic!("scripted panic"),
            Behavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

/// Counts of calls into scripted modes.
#[derive(Debug, Default)]
pub struct ModeCalls {
    pub selected: AtomicUsize,
    pub runs: AtomicUsize,
    pub finishes: AtomicUsize,
}

impl ModeCalls {
    pub fn selected(&self) -> usize {
        self.selected.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn finishes(&self) -> usize {
        self.finishes.load(Ordering::SeqCst)
    }
}

/// Agent whose mode follows a script instead of running a fuzzer.
#[derive(Debug, Clone)]
pub struct ScriptedAgent {
    run: Behavior,
    finish: Behavior,
    crashes: Vec<CrashRecord>,
    statistics: Option<Statistics>,
    select_error: Option<AgentError>,
    calls: Arc<ModeCalls>,
}

impl Default for ScriptedAgent {
    fn default() -> Self {
        Self {
            run: Behavior::Succeed,
            finish: Behavior::Succeed,
            crashes: Vec::new(),
            statistics: None,
            select_error: None,
            calls: Arc::default(),
        }
    }
}

impl ScriptedAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(mut self, behavior: Behavior) -> Self {
        self.run = behavior;
        self
    }

    pub fn finish(mut self, behavior: Behavior) -> Self {
        self.finish = behavior;
        self
    }

    pub fn crash(mut self, crash: CrashRecord) -> Self {
        self.crashes.push(crash);
        self
    }

    pub fn statistics(mut self, statistics: Statistics) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn reject(mut self, err: AgentError) -> Self {
        self.select_error = Some(err);
        self
    }

    pub fn calls(&self) -> Arc<ModeCalls> {
        self.calls.clone()
    }
}

impl Agent for ScriptedAgent {
    fn select_mode(&self, ctx: ModeContext) -> anyhow::Result<Box<dyn RunMode>> {
        self.calls.selected.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.select_error {
            return Err(err.clone().into());
        }
        Ok(Box::new(ScriptedMode {
            transfer: ctx.transfer,
            script: self.clone(),
            status: None,
            crashes: Vec::new(),
        }))
    }
}

struct ScriptedMode {
    transfer: FileTransfer,
    script: ScriptedAgent,
    status: Option<Status>,
    crashes: Vec<CrashRecord>,
}

#[async_trait]
impl RunMode for ScriptedMode {
    async fn run(&mut self) -> anyhow::Result<()> {
        self.script.calls.runs.fetch_add(1, Ordering::SeqCst);
        self.crashes = self.script.crashes.clone();
        self.script.run.perform().await
    }

    async fn finish(&mut self) -> anyhow::Result<()> {
        self.script.calls.finishes.fetch_add(1, Ordering::SeqCst);
        self.script.finish.perform().await
    }

    fn transfer(&self) -> &FileTransfer {
        &self.transfer
    }

    fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    fn statistics(&self) -> Option<Statistics> {
        self.script.statistics
    }

    fn crashes(&self) -> &[CrashRecord] {
        &self.crashes
    }

    fn take_crashes(&mut self) -> Vec<CrashRecord> {
        std::mem::take(&mut self.crashes)
    }
}
