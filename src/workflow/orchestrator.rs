use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn, Instrument};

use crate::telemetry::{create_workflow_span, generate_correlation_id};
use crate::transport::{MultipartPayload, Transport};
use crate::workflow::classifier::{self, Outcome};
use crate::workflow::event_log::{LogEntry, LogSeverity};
use crate::workflow::state_machine::{
    CallFailure, InvoiceDocument, Stage, StepInfo, WorkflowError, WorkflowEvent, WorkflowMachine,
    WorkflowSession,
};

/// Default pacing between the visual confirmation stages.
pub const DEFAULT_STAGE_PACING: Duration = Duration::from_secs(3);

/// Default interval of the second-stage status poll.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Status markers in a finalize reply that arm the second-stage poll.
const IN_PROGRESS_STATUSES: &[&str] = &["processing", "in_progress"];

/// Async command surface over the [`WorkflowMachine`].
///
/// Owns the session for the lifetime of one invoice attempt, issues the
/// network calls that advance it, and schedules the paced delays and the
/// periodic status poll as tracked tasks. `teardown` aborts every pending
/// timer and seals the event log, so nothing mutates the session after
/// disposal.
pub struct WorkflowOrchestrator {
    machine: Arc<Mutex<WorkflowMachine>>,
    transport: Arc<dyn Transport>,
    trigger_url: String,
    stage_pacing: Duration,
    poll_interval: Duration,
    in_flight: Arc<AtomicBool>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    correlation_id: String,
}

impl WorkflowOrchestrator {
    pub fn new(transport: Arc<dyn Transport>, trigger_url: impl Into<String>) -> Self {
        Self {
            machine: Arc::new(Mutex::new(WorkflowMachine::new())),
            transport,
            trigger_url: trigger_url.into(),
            stage_pacing: DEFAULT_STAGE_PACING,
            poll_interval: DEFAULT_POLL_INTERVAL,
            in_flight: Arc::new(AtomicBool::new(false)),
            timers: Mutex::new(Vec::new()),
            correlation_id: generate_correlation_id(),
        }
    }

    pub fn with_stage_pacing(mut self, pacing: Duration) -> Self {
        self.stage_pacing = pacing;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Trigger the remote workflow. Succeeds only when the reply carries a
    /// resume address; on any failure the stage stays at `Start` so the
    /// user can retry.
    pub async fn start(&self) -> Result<(), WorkflowError> {
        let span = self.command_span("start").await;
        async {
            if self.machine.lock().await.stage() != Stage::Start {
                debug!("start ignored: workflow already triggered");
                return Ok(());
            }
            let Some(_guard) = self.begin_call() else {
                return Ok(());
            };

            self.machine.lock().await.note(
                LogSeverity::Info,
                format!("Triggering workflow at: {}", self.trigger_url),
            );

            let body = json!({
                "action": "start_process",
                "timestamp": Utc::now().to_rfc3339(),
            });

            let event = match self.transport.send_json(&self.trigger_url, &body).await {
                Ok(parsed) => match parsed.json {
                    Some(reply) => match classifier::resume_address(&reply) {
                        Some(resume_url) => WorkflowEvent::TriggerAccepted { resume_url },
                        None => WorkflowEvent::TriggerRejected {
                            failure: CallFailure::MissingResumeUrl,
                        },
                    },
                    None => WorkflowEvent::TriggerRejected {
                        failure: CallFailure::InvalidBody { text: parsed.text },
                    },
                },
                Err(err) => WorkflowEvent::TriggerRejected {
                    failure: err.into(),
                },
            };

            self.machine.lock().await.apply(event)
        }
        .instrument(span)
        .await
    }

    /// Attach or remove the invoice document. Pure state update.
    pub async fn set_document(
        &self,
        document: Option<InvoiceDocument>,
    ) -> Result<(), WorkflowError> {
        let event = match document {
            Some(document) => WorkflowEvent::DocumentAttached { document },
            None => WorkflowEvent::DocumentRemoved,
        };
        self.machine.lock().await.apply(event)
    }

    /// Upload the attached document to the resume address. Silently a
    /// no-op when the document or the resume address is missing, or when
    /// another call is already in flight.
    pub async fn submit(&self) -> Result<(), WorkflowError> {
        let span = self.command_span("submit").await;
        async {
            let (document, resume_url) = {
                let machine = self.machine.lock().await;
                if machine.stage() != Stage::AwaitingUpload {
                    debug!(stage = machine.stage().as_str(), "submit ignored: wrong stage");
                    return Ok(());
                }
                let session = machine.session();
                match (&session.document, &session.resume_url) {
                    (Some(document), Some(resume_url)) => (document.clone(), resume_url.clone()),
                    _ => {
                        debug!("submit ignored: document or resume URL missing");
                        return Ok(());
                    }
                }
            };
            let Some(_guard) = self.begin_call() else {
                return Ok(());
            };

            {
                let mut machine = self.machine.lock().await;
                machine.apply(WorkflowEvent::SubmissionStarted)?;
                machine.note(
                    LogSeverity::Info,
                    format!("Sending file to workflow engine: {resume_url}"),
                );
            }

            let payload = MultipartPayload {
                file_name: document.name.clone(),
                content_type: document.content_type.clone(),
                bytes: document.bytes,
                fields: vec![
                    ("resumeUrl".to_string(), resume_url.clone()),
                    ("action".to_string(), "process_invoice".to_string()),
                ],
            };

            match self.transport.send_multipart(&resume_url, payload).await {
                // A transport failure is not a terminal business failure;
                // the engine may still be processing asynchronously, so the
                // paced advance runs regardless.
                Err(err) => {
                    self.machine
                        .lock()
                        .await
                        .apply(WorkflowEvent::SubmissionFailed {
                            failure: err.into(),
                        })?;
                    self.schedule_paced_advance().await;
                }
                Ok(parsed) => {
                    self.machine.lock().await.note(
                        LogSeverity::Success,
                        "Invoice sent successfully to workflow engine",
                    );
                    match parsed.json {
                        None => {
                            self.machine
                                .lock()
                                .await
                                .apply(WorkflowEvent::SubmissionFailed {
                                    failure: CallFailure::InvalidBody { text: parsed.text },
                                })?;
                            self.schedule_paced_advance().await;
                        }
                        Some(reply) if classifier::is_ack_marker(&reply) => {
                            self.machine
                                .lock()
                                .await
                                .apply(WorkflowEvent::SubmissionAcknowledged)?;
                        }
                        Some(reply) => {
                            let result = classifier::classify(&reply);
                            let outcome = result.outcome;
                            self.machine
                                .lock()
                                .await
                                .apply(WorkflowEvent::SubmissionClassified { result })?;
                            if outcome != Outcome::Ack {
                                self.schedule_paced_advance().await;
                            }
                        }
                    }
                }
            }

            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Send the completion marker to the resume address. On success the
    /// reply becomes the terminal result and the stage is forced to
    /// `Resolved`; on failure the stage is left unchanged.
    pub async fn finalize(&self) -> Result<(), WorkflowError> {
        let span = self.command_span("finalize").await;
        async {
            let resume_url = self.machine.lock().await.session().resume_url.clone();
            let Some(resume_url) = resume_url else {
                self.machine
                    .lock()
                    .await
                    .note(LogSeverity::Error, "No resume URL available for webhook call");
                return Ok(());
            };
            let Some(_guard) = self.begin_call() else {
                return Ok(());
            };

            self.machine
                .lock()
                .await
                .note(LogSeverity::Info, "Calling completion webhook...");

            let body = json!({"finalresponse": "success"});
            match self.transport.send_json(&resume_url, &body).await {
                Ok(parsed) => {
                    let reply = match parsed.json {
                        Some(reply) => reply,
                        // An empty body means the webhook completed; other
                        // non-JSON text is wrapped as a plain message.
                        None if parsed.text.trim().is_empty() => {
                            json!({"success": true, "message": "Webhook completed successfully"})
                        }
                        None => json!({"message": parsed.text}),
                    };
                    let result = classifier::classify(&reply);
                    self.machine
                        .lock()
                        .await
                        .apply(WorkflowEvent::FinalizeSucceeded { result })?;
                    self.maybe_arm_second_stage(&reply).await;
                }
                Err(err) => {
                    self.machine
                        .lock()
                        .await
                        .apply(WorkflowEvent::FinalizeFailed {
                            failure: err.into(),
                        })?;
                }
            }

            Ok(())
        }
        .instrument(span)
        .await
    }

    /// Start the periodic second-stage status poll against a secondary
    /// address. Each reply is shallow-merged into the last known result.
    /// The poll stops only at teardown; a terminal status value does not
    /// cancel it, matching the engine's observed contract.
    pub async fn poll_second_stage(&self, secondary_url: impl Into<String>, interval: Duration) {
        let url = secondary_url.into();
        // The timers lock is held across the disposal check and the spawn,
        // so a concurrent teardown either sees the handle or the sealed
        // machine stops the poll from being armed at all.
        let mut timers = self.timers.lock().await;
        {
            let mut machine = self.machine.lock().await;
            if machine.is_sealed() {
                debug!("status poll not armed: session disposed");
                return;
            }
            machine.note(
                LogSeverity::Info,
                format!("Polling submission status at: {url}"),
            );
        }

        let machine = Arc::clone(&self.machine);
        let transport = Arc::clone(&self.transport);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick of a tokio interval fires immediately; the
            // poll is meant to wait one full interval before checking.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let body = json!({"action": "checkStatus"});
                match transport.send_json(&url, &body).await {
                    Ok(parsed) => match parsed.json {
                        Some(patch) => {
                            let _ = machine
                                .lock()
                                .await
                                .apply(WorkflowEvent::StatusMerged { patch });
                        }
                        None => {
                            warn!("status check returned a non-JSON body");
                        }
                    },
                    Err(err) => {
                        machine
                            .lock()
                            .await
                            .note(LogSeverity::Warning, format!("Status check failed: {err}"));
                    }
                }
            }
        });
        timers.push(handle);
    }

    /// Cancel every pending timer and seal the machine. The session is
    /// frozen afterwards: no log entry may be appended, no event applies,
    /// and no new timer can be scheduled. The timers lock is held until
    /// the machine is sealed, so a timer cannot slip in between the drain
    /// and the seal.
    pub async fn teardown(&self) {
        let mut timers = self.timers.lock().await;
        for handle in timers.drain(..) {
            handle.abort();
        }
        self.machine.lock().await.seal();
        debug!("workflow session torn down");
    }

    pub async fn stage(&self) -> Stage {
        self.machine.lock().await.stage()
    }

    /// Read-only snapshot of the session for the presentation layer.
    pub async fn snapshot(&self) -> WorkflowSession {
        self.machine.lock().await.snapshot()
    }

    pub async fn log_entries(&self) -> Vec<LogEntry> {
        self.machine.lock().await.log_entries().to_vec()
    }

    pub async fn step_report(&self) -> Vec<StepInfo> {
        self.machine.lock().await.step_report()
    }

    /// Tracing span for one orchestrator command, carrying the session's
    /// correlation id and the stage the command was issued at.
    async fn command_span(&self, operation: &str) -> tracing::Span {
        create_workflow_span(
            operation,
            Some(self.stage().await.as_str()),
            Some(&self.correlation_id),
        )
    }

    /// Reentrancy guard: one outbound call at a time. A re-entrant call
    /// while one is in flight is a no-op.
    fn begin_call(&self) -> Option<InFlightGuard> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            Some(InFlightGuard(Arc::clone(&self.in_flight)))
        } else {
            debug!("call already in flight, ignoring re-entrant invocation");
            None
        }
    }

    /// Spawn the paced two-step advance toward resolution. The delays pace
    /// the UI feedback only; they are tracked so teardown can cancel them.
    /// Nothing is scheduled once the session is disposed, so a reply that
    /// lands after teardown cannot re-arm the pipeline.
    async fn schedule_paced_advance(&self) {
        let mut timers = self.timers.lock().await;
        if self.machine.lock().await.is_sealed() {
            debug!("paced advance not scheduled: session disposed");
            return;
        }
        let machine = Arc::clone(&self.machine);
        let pacing = self.stage_pacing;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(pacing).await;
            if machine
                .lock()
                .await
                .apply(WorkflowEvent::ConfirmationReached)
                .is_err()
            {
                return;
            }
            tokio::time::sleep(pacing).await;
            let _ = machine.lock().await.apply(WorkflowEvent::ResolutionReached);
        });
        timers.push(handle);
    }

    /// Arm the second-stage poll when a finalize reply carries a secondary
    /// address together with an in-progress status marker.
    async fn maybe_arm_second_stage(&self, reply: &Value) {
        let secondary = reply
            .get("resumeUrlStage2")
            .and_then(Value::as_str)
            .map(str::to_string);
        let in_progress = reply
            .get("status")
            .and_then(Value::as_str)
            .map(|status| {
                IN_PROGRESS_STATUSES
                    .iter()
                    .any(|marker| status.eq_ignore_ascii_case(marker))
            })
            .unwrap_or(false);

        if let (Some(url), true) = (secondary, in_progress) {
            self.poll_second_stage(url, self.poll_interval).await;
        }
    }
}

/// Clears the in-flight flag when the call finishes, whichever path it
/// takes out of the orchestrator.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{ParsedBody, TransportError};

    struct NoCallTransport;

    #[async_trait::async_trait]
    impl Transport for NoCallTransport {
        async fn send_json(
            &self,
            _url: &str,
            _body: &Value,
        ) -> Result<ParsedBody, TransportError> {
            panic!("no network call expected");
        }

        async fn send_multipart(
            &self,
            _url: &str,
            _payload: MultipartPayload,
        ) -> Result<ParsedBody, TransportError> {
            panic!("no network call expected");
        }
    }

    fn orchestrator() -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(Arc::new(NoCallTransport), "https://engine.test/trigger")
    }

    #[test]
    fn in_flight_guard_admits_one_call_at_a_time() {
        let orchestrator = orchestrator();
        let guard = orchestrator.begin_call();
        assert!(guard.is_some());
        assert!(orchestrator.begin_call().is_none());

        drop(guard);
        assert!(orchestrator.begin_call().is_some());
    }

    #[test]
    fn set_document_touches_no_network() {
        tokio_test::block_on(async {
            let orchestrator = orchestrator();
            let document =
                InvoiceDocument::new("invoice.xml", "text/xml", b"<Invoice/>".to_vec());

            orchestrator.set_document(Some(document)).await.unwrap();
            assert!(orchestrator.snapshot().await.document.is_some());

            orchestrator.set_document(None).await.unwrap();
            assert!(orchestrator.snapshot().await.document.is_none());
        });
    }
}
