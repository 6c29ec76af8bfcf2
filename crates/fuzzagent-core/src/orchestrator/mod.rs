//! Run orchestration.
//!
//! One agent run: wait for the user container, run the selected mode under
//! cancellation, then upload artifacts, report crashes and deliver exactly one
//! terminal report. The report sink is closed on every path, panics included.
//!
//! Exit codes follow [`AgentExitCode`]: run-phase failures are reported in a
//! regular report and exit 0; failures after the run phase are reported as
//! error reports and exit 2 (agent error) or 3 (anything else); 1 means no
//! report could be delivered.

mod crash;
mod outcome;
mod readiness;
mod report;
mod signals;

pub use crash::{crash_input_id, generate_run_id, offload_oversized};
pub use outcome::{classify, post_run_exit_code, AgentExitCode, RunOutcome};
pub use readiness::{wait_until_running, ReadinessPolicy};
pub use report::{ReportError, Reporter};
pub use signals::{CancelTrigger, SignalGuard};

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use futures::FutureExt;
use fuzzagent_state::{FsObjectStorage, ObjectStorage, ReportSink, SpoolReportSink};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::cluster::{ClusterApi, KubeClient};
use crate::error::AgentError;
use crate::executor::RemoteExecutor;
use crate::measure::{rfc3339, RunMeasurement};
use crate::mode::{Agent, ModeContext};
use crate::obs;
use crate::output::{AgentResult, Metrics, Status};
use crate::paths::AgentPaths;
use crate::settings::AppSettings;
use crate::transfer::FileTransfer;

/// External collaborators of one run.
#[derive(Clone)]
pub struct Services {
    pub cluster: Arc<dyn ClusterApi>,
    pub storage: Arc<dyn ObjectStorage>,
    pub sink: Arc<dyn ReportSink>,
}

impl Services {
    /// Connect the production backends.
    pub async fn connect(settings: Arc<AppSettings>) -> anyhow::Result<Self> {
        let cluster = KubeClient::from_settings(&settings.kubernetes)
            .await
            .context("failed to create control plane client")?;
        let storage = FsObjectStorage::new(&settings.storage.root)
            .context("failed to open object storage")?;
        let sink = SpoolReportSink::new(&settings.message_queue.spool_dir)
            .await
            .context("failed to start report sink")?;

        Ok(Self {
            cluster: Arc::new(cluster),
            storage: Arc::new(storage),
            sink: Arc::new(sink),
        })
    }
}

/// How `drive` ended when it did not fail.
enum Driven {
    /// Terminal report delivered with this status code
    Reported(String),
    CancelledBeforeRun,
}

/// Exit code plus the status code that was (or should have been) reported.
struct RunEnd {
    exit: AgentExitCode,
    status_code: String,
}

pub struct Orchestrator {
    settings: Arc<AppSettings>,
    cluster: Arc<dyn ClusterApi>,
    paths: AgentPaths,
    transfer: FileTransfer,
    reporter: Reporter,
    readiness: ReadinessPolicy,
}

impl Orchestrator {
    pub fn new(settings: Arc<AppSettings>, services: Services) -> Self {
        let paths = AgentPaths::new(&settings);
        let transfer = FileTransfer::new(services.storage, &settings);
        let reporter = Reporter::new(services.sink, settings.clone());
        let readiness = ReadinessPolicy::new(
            settings.agent.readiness_retries,
            Duration::from_millis(settings.agent.readiness_interval_ms),
        );

        Self {
            settings,
            cluster: services.cluster,
            paths,
            transfer,
            reporter,
            readiness,
        }
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Drive one run to its terminal report and close the sink.
    pub async fn run(&self, agent: &dyn Agent, cancel: CancellationToken) -> AgentExitCode {
        let run_id = generate_run_id();
        let span = obs::run_span(&run_id, self.settings.agent.mode.as_str());
        let measurement = Mutex::new(None);
        let started = Instant::now();

        let body = AssertUnwindSafe(self.run_body(agent, &cancel, &run_id, &measurement))
            .catch_unwind()
            .instrument(span.clone())
            .await;
        let end = match body {
            Ok(end) => end,
            Err(panic) => {
                self.on_panic(panic, &run_id, &measurement)
                    .instrument(span.clone())
                    .await
            }
        };

        self.reporter.close().instrument(span).await;
        obs::emit_run_finished(
            &run_id,
            started.elapsed().as_millis() as u64,
            &end.status_code,
            end.exit.code(),
        );
        end.exit
    }

    async fn run_body(
        &self,
        agent: &dyn Agent,
        cancel: &CancellationToken,
        run_id: &str,
        measurement: &Mutex<Option<RunMeasurement>>,
    ) -> RunEnd {
        match self.drive(agent, cancel, run_id, measurement).await {
            Ok(Driven::Reported(status_code)) => RunEnd {
                exit: AgentExitCode::Success,
                status_code,
            },
            Ok(Driven::CancelledBeforeRun) => {
                info!("cancelled before the run started");
                self.report_failure(&AgentError::Aborted, run_id, measurement, AgentExitCode::Success)
                    .await
            }
            Err(err) => {
                let exit = post_run_exit_code(&err);
                let agent_err = classify(&err);
                error!(code = agent_err.code(), error = %agent_err, "agent run failed");
                self.report_failure(&agent_err, run_id, measurement, exit)
                    .await
            }
        }
    }

    async fn drive(
        &self,
        agent: &dyn Agent,
        cancel: &CancellationToken,
        run_id: &str,
        measurement: &Mutex<Option<RunMeasurement>>,
    ) -> anyhow::Result<Driven> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Driven::CancelledBeforeRun),
            ready = wait_until_running(self.cluster.as_ref(), self.readiness) => ready?,
        }

        let executor = RemoteExecutor::new(
            self.cluster.clone(),
            self.paths.clone(),
            self.settings.runner.clone(),
        );
        let ctx = ModeContext {
            settings: self.settings.clone(),
            executor: Arc::new(executor),
            transfer: self.transfer.clone(),
            paths: self.paths.clone(),
            run_id: run_id.to_string(),
        };
        let mut mode = agent.select_mode(ctx)?;

        obs::emit_run_started(run_id, self.settings.agent.mode.as_str());
        let mut run_measurement = RunMeasurement::start();
        store(measurement, run_measurement);
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => RunOutcome::Cancelled,
            result = mode.run() => RunOutcome::from_result(result),
        };
        run_measurement.finalize();
        store(measurement, run_measurement);

        let status = outcome.status();
        info!(status = %status.code, "run phase finished");
        mode.set_status(status);

        let metrics = Metrics::load(self.paths.metrics()).await?;
        mode.finish().await?;

        let finish = run_measurement
            .finish_time()
            .unwrap_or_else(|| run_measurement.start_time());
        let created = rfc3339(finish);
        let crashes = mode.take_crashes();
        let crash_count = crashes.len();
        for mut crash in crashes {
            let offloaded = offload_oversized(
                &mut crash,
                self.settings.fuzzer.crash_max_size,
                run_id,
                mode.transfer(),
            )
            .await?;
            let crash_type = crash.crash_type.clone();
            self.reporter.send_crash(crash, &created).await?;
            obs::emit_crash_reported(run_id, &crash_type, offloaded);
        }

        let status = mode.status().cloned().unwrap_or_else(Status::success);
        let status_code = status.code.clone();
        let result = AgentResult::Success {
            status,
            metrics,
            crash_count,
            statistics: mode.statistics(),
        };
        self.reporter.send_result(result, &run_measurement).await?;
        obs::emit_report_sent(run_id, &status_code, crash_count);
        Ok(Driven::Reported(status_code))
    }

    /// Send the error-shaped terminal report.
    async fn report_failure(
        &self,
        err: &AgentError,
        run_id: &str,
        measurement: &Mutex<Option<RunMeasurement>>,
        exit: AgentExitCode,
    ) -> RunEnd {
        let status = Status::from(err);
        let status_code = status.code.clone();
        if self.reporter.has_reported() {
            warn!(status = %status_code, "run already reported, dropping failure report");
            return RunEnd { exit, status_code };
        }

        let metrics = Metrics::load_or_zeroed(self.paths.metrics()).await;
        let run_measurement = load(measurement).unwrap_or_else(RunMeasurement::start);
        let result = AgentResult::Error { status, metrics };
        match self.reporter.send_result(result, &run_measurement).await {
            Ok(()) => {
                obs::emit_report_sent(run_id, &status_code, 0);
                RunEnd { exit, status_code }
            }
            Err(e) => {
                obs::emit_report_failed(run_id, &e);
                RunEnd {
                    exit: AgentExitCode::InitFailed,
                    status_code,
                }
            }
        }
    }

    async fn on_panic(
        &self,
        panic: Box<dyn Any + Send>,
        run_id: &str,
        measurement: &Mutex<Option<RunMeasurement>>,
    ) -> RunEnd {
        error!(panic = panic_message(panic.as_ref()), "agent run panicked");
        self.report_failure(
            &AgentError::internal(),
            run_id,
            measurement,
            AgentExitCode::Unhandled,
        )
        .await
    }
}

fn store(slot: &Mutex<Option<RunMeasurement>>, measurement: RunMeasurement) {
    *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(measurement);
}

fn load(slot: &Mutex<Option<RunMeasurement>>) -> Option<RunMeasurement> {
    *slot.lock().unwrap_or_else(|e| e.into_inner())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// Build the collaborators with `connect`, then run once.
///
/// Cancellation while connecting exits 0 without a report; a connection
/// failure exits 1.
pub async fn run_agent_with<F, Fut>(
    agent: &dyn Agent,
    settings: Arc<AppSettings>,
    cancel: CancellationToken,
    connect: F,
) -> AgentExitCode
where
    F: FnOnce(Arc<AppSettings>) -> Fut,
    Fut: Future<Output = anyhow::Result<Services>>,
{
    info!(
        mode = settings.agent.mode.as_str(),
        engine = settings.fuzzer.engine.as_str(),
        fuzzer = %settings.fuzzer.id,
        rev = %settings.fuzzer.rev,
        "starting agent"
    );

    let services = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            info!("cancelled during initialization");
            return AgentExitCode::Success;
        }
        connected = connect(settings.clone()) => match connected {
            Ok(services) => services,
            Err(e) => {
                error!(error = ?e, "initialization failed");
                return AgentExitCode::InitFailed;
            }
        },
    };

    Orchestrator::new(settings, services).run(agent, cancel).await
}

/// Production entry: signal handling around one run with real backends.
#[cfg(unix)]
pub async fn agent_entry(agent: &dyn Agent, settings: AppSettings) -> AgentExitCode {
    let trigger = CancelTrigger::new(CancellationToken::new());
    let guard = match SignalGuard::install(trigger.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            error!(error = %e, "failed to install signal handlers");
            return AgentExitCode::InitFailed;
        }
    };

    let code = run_agent_with(
        agent,
        Arc::new(settings),
        trigger.token().clone(),
        Services::connect,
    )
    .await;
    guard.release().await;
    code
}
