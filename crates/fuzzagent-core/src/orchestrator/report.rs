//! Delivery of crash and run reports.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fuzzagent_state::{OutgoingMessage, ReportSink, SinkError};
use tracing::{debug, warn};

use crate::measure::{rfc3339, RunMeasurement};
use crate::output::{
    AgentResult, CrashMessage, CrashRecord, RunIdentity, RunResultMessage, NEW_CRASH_MESSAGE,
    RUN_RESULT_MESSAGE,
};
use crate::settings::AppSettings;

/// Errors raised while reporting.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Terminal report already delivered")]
    AlreadyReported,

    #[error("Cannot encode report: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Sends one run's messages. At most one terminal report gets through.
pub struct Reporter {
    sink: Arc<dyn ReportSink>,
    settings: Arc<AppSettings>,
    identity: RunIdentity,
    delivered: AtomicBool,
}

impl Reporter {
    pub fn new(sink: Arc<dyn ReportSink>, settings: Arc<AppSettings>) -> Self {
        let identity = RunIdentity::from(&settings.fuzzer);
        Self {
            sink,
            settings,
            identity,
            delivered: AtomicBool::new(false),
        }
    }

    /// Whether the terminal report has been delivered.
    pub fn has_reported(&self) -> bool {
        self.delivered.load(Ordering::SeqCst)
    }

    pub async fn send_crash(&self, crash: CrashRecord, created: &str) -> Result<(), ReportError> {
        let body = CrashMessage {
            identity: self.identity.clone(),
            crash,
            created: created.to_string(),
        };
        let message = OutgoingMessage::new(
            &self.settings.message_queue.crash_analyzer_queue,
            NEW_CRASH_MESSAGE,
            serde_json::to_value(&body)?,
        );
        self.sink.produce(message).await?;
        Ok(())
    }

    /// Deliver the terminal report.
    ///
    /// An unfinished measurement is finalized now. Fails without sending if a
    /// terminal report already went out.
    pub async fn send_result(
        &self,
        result: AgentResult,
        measurement: &RunMeasurement,
    ) -> Result<(), ReportError> {
        if self.has_reported() {
            warn!("refusing to send a second run report");
            return Err(ReportError::AlreadyReported);
        }

        let mut measurement = *measurement;
        measurement.finalize();
        let finish = measurement
            .finish_time()
            .unwrap_or_else(|| measurement.start_time());

        let body = RunResultMessage {
            identity: self.identity.clone(),
            session_id: self.settings.fuzzer.session_id.clone(),
            agent_mode: self.settings.agent.mode.as_str().to_string(),
            start_time: rfc3339(measurement.start_time()),
            finish_time: rfc3339(finish),
            agent_result: result,
        };
        let message = OutgoingMessage::new(
            &self.settings.message_queue.scheduler_queue,
            RUN_RESULT_MESSAGE,
            serde_json::to_value(&body)?,
        );
        self.sink.produce(message).await?;
        self.delivered.store(true, Ordering::SeqCst);
        debug!(status = %body.agent_result.status().code, "run report delivered");
        Ok(())
    }

    /// Flush and close the sink. Failures are logged.
    pub async fn close(&self) {
        if let Err(e) = self.sink.close().await {
            warn!(error = %e, "failed to close report sink");
        }
    }
}
