use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::transport::TransportError;
use crate::workflow::classifier::{NormalizedResult, Outcome};
use crate::workflow::event_log::{EventLog, LogEntry, LogSeverity};

/// Stage of one invoice submission attempt. Exactly one stage is active
/// at a time; it is the single source of truth for what the presentation
/// layer renders and which command is currently permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Start,
    AwaitingUpload,
    Submitting,
    AwaitingConfirmation,
    Resolved,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::AwaitingUpload => "awaiting-upload",
            Stage::Submitting => "submitting",
            Stage::AwaitingConfirmation => "awaiting-confirmation",
            Stage::Resolved => "resolved",
        }
    }
}

/// The invoice file the user attached. Metadata is kept for logging and
/// display; the bytes ride along for the multipart upload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceDocument {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl InvoiceDocument {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            size: bytes.len() as u64,
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// Why a network call failed, split the way the log lines differ.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// No response received at all.
    Unreachable { detail: String },
    /// Response received with a status outside 200-299.
    BadStatus { status: u16, body: String },
    /// Status was fine but the body did not decode as expected.
    InvalidBody { text: String },
    /// Trigger reply parsed but carried no resume address under any
    /// known spelling.
    MissingResumeUrl,
}

impl From<TransportError> for CallFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network { detail } => CallFailure::Unreachable { detail },
            TransportError::Http { status, body } => CallFailure::BadStatus { status, body },
            TransportError::Parse { detail } => CallFailure::InvalidBody { text: detail },
        }
    }
}

/// Events that drive the submission state machine. Network and timer
/// outcomes are fed in by the orchestrator; the machine itself performs
/// no I/O.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    TriggerAccepted { resume_url: String },
    TriggerRejected { failure: CallFailure },
    DocumentAttached { document: InvoiceDocument },
    DocumentRemoved,
    SubmissionStarted,
    SubmissionAcknowledged,
    SubmissionClassified { result: NormalizedResult },
    SubmissionFailed { failure: CallFailure },
    ConfirmationReached,
    ResolutionReached,
    FinalizeSucceeded { result: NormalizedResult },
    FinalizeFailed { failure: CallFailure },
    StatusMerged { patch: Value },
}

impl WorkflowEvent {
    fn describe(&self) -> &'static str {
        match self {
            WorkflowEvent::TriggerAccepted { .. } => "trigger-accepted",
            WorkflowEvent::TriggerRejected { .. } => "trigger-rejected",
            WorkflowEvent::DocumentAttached { .. } => "document-attached",
            WorkflowEvent::DocumentRemoved => "document-removed",
            WorkflowEvent::SubmissionStarted => "submission-started",
            WorkflowEvent::SubmissionAcknowledged => "submission-acknowledged",
            WorkflowEvent::SubmissionClassified { .. } => "submission-classified",
            WorkflowEvent::SubmissionFailed { .. } => "submission-failed",
            WorkflowEvent::ConfirmationReached => "confirmation-reached",
            WorkflowEvent::ResolutionReached => "resolution-reached",
            WorkflowEvent::FinalizeSucceeded { .. } => "finalize-succeeded",
            WorkflowEvent::FinalizeFailed { .. } => "finalize-failed",
            WorkflowEvent::StatusMerged { .. } => "status-merged",
        }
    }
}

/// Errors surfaced by the state machine itself.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("event {event} not allowed in stage {stage:?}")]
    InvalidTransition { stage: Stage, event: &'static str },
}

/// Audit record of one stage change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransitionRecord {
    pub from: Stage,
    pub to: Stage,
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

/// The long-lived aggregate for one invoice attempt, exposed to the
/// presentation layer as a read-only snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowSession {
    pub stage: Stage,
    pub resume_url: Option<String>,
    pub document: Option<InvoiceDocument>,
    pub last_result: Option<NormalizedResult>,
    /// Sticky: once true, stays true for the rest of the session.
    pub errored: bool,
}

impl Default for WorkflowSession {
    fn default() -> Self {
        Self {
            stage: Stage::Start,
            resume_url: None,
            document: None,
            last_result: None,
            errored: false,
        }
    }
}

/// Per-stage display status derived from the session, matching what the
/// step indicator renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Completed,
    Current,
    Pending,
    Error,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Completed => "completed",
            StepStatus::Current => "current",
            StepStatus::Pending => "pending",
            StepStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInfo {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub status: StepStatus,
}

/// Invoice submission state machine.
///
/// Owns the session, the ordered event log and the stage transition
/// history. All mutation goes through [`WorkflowMachine::apply`]; the
/// async orchestrator feeds it network and timer outcomes.
#[derive(Debug)]
pub struct WorkflowMachine {
    session: WorkflowSession,
    log: EventLog,
    history: Vec<StageTransitionRecord>,
}

impl Default for WorkflowMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowMachine {
    pub fn new() -> Self {
        let mut log = EventLog::new();
        log.info("Waiting for workflow to start...");
        log.success("Invoice portal initialized");
        log.info("Ready to process invoices");

        Self {
            session: WorkflowSession::default(),
            log,
            history: Vec::new(),
        }
    }

    pub fn session(&self) -> &WorkflowSession {
        &self.session
    }

    pub fn snapshot(&self) -> WorkflowSession {
        self.session.clone()
    }

    pub fn stage(&self) -> Stage {
        self.session.stage
    }

    pub fn log_entries(&self) -> &[LogEntry] {
        self.log.entries()
    }

    pub fn history(&self) -> &[StageTransitionRecord] {
        &self.history
    }

    /// Append a free-form log line outside of any transition. Used by the
    /// orchestrator for call announcements ("Sending file to ...").
    pub fn note(&mut self, severity: LogSeverity, message: impl Into<String>) {
        self.log.append(message, severity);
    }

    /// Seal the event log at teardown; no entry may land afterwards.
    pub fn seal(&mut self) {
        self.log.seal();
    }

    pub fn is_sealed(&self) -> bool {
        self.log.is_sealed()
    }

    /// Apply one event. Stale timer events are tolerated as no-ops;
    /// combinations that make no sense at the current stage are rejected.
    /// A sealed machine is disposed: every event is dropped so nothing
    /// mutates the session after teardown, not even a reply that was
    /// already in flight when the session was torn down.
    pub fn apply(&mut self, event: WorkflowEvent) -> Result<(), WorkflowError> {
        if self.log.is_sealed() {
            debug!(event = event.describe(), "event ignored: session disposed");
            return Ok(());
        }
        let stage = self.session.stage;
        match (stage, &event) {
            (Stage::Start, WorkflowEvent::TriggerAccepted { resume_url }) => {
                self.log.success("Workflow triggered successfully");
                self.log.info(format!("Resume URL received: {resume_url}"));
                self.session.resume_url = Some(resume_url.clone());
                self.transition(Stage::AwaitingUpload, &event);
            }
            (Stage::Start, WorkflowEvent::TriggerRejected { failure }) => {
                // Stage stays at Start so the user can retry.
                self.log_trigger_failure(failure);
            }

            (_, WorkflowEvent::DocumentAttached { document }) => {
                self.log.success(format!("File uploaded: {}", document.name));
                self.session.document = Some(document.clone());
            }
            (_, WorkflowEvent::DocumentRemoved) => {
                self.log.info("File removed");
                self.session.document = None;
            }

            (Stage::AwaitingUpload, WorkflowEvent::SubmissionStarted) => {
                self.log.info("Processing invoice...");
                self.transition(Stage::Submitting, &event);
            }

            (Stage::Submitting, WorkflowEvent::SubmissionAcknowledged) => {
                self.log
                    .info("Workflow started, waiting for engine response...");
            }
            (Stage::Submitting, WorkflowEvent::SubmissionClassified { result }) => {
                self.record_result(result.clone());
            }
            (Stage::Submitting, WorkflowEvent::SubmissionFailed { failure }) => {
                self.session.errored = true;
                self.log_submission_failure(failure);
                // Keep the raw text of a malformed body around for display.
                if let CallFailure::InvalidBody { text } = failure {
                    self.session.last_result = Some(NormalizedResult::invalid_body(text.clone()));
                }
            }

            (Stage::Submitting, WorkflowEvent::ConfirmationReached) => {
                if !self.session.errored {
                    self.log.info("Invoice processing step started");
                }
                self.transition(Stage::AwaitingConfirmation, &event);
            }
            (Stage::AwaitingConfirmation, WorkflowEvent::ResolutionReached) => {
                if self.session.errored {
                    self.log.error("Invoice processing unsuccessful");
                } else {
                    self.log.success("Invoice processing completed");
                }
                self.transition(Stage::Resolved, &event);
            }

            // A teardown racing a timer, or finalize() jumping ahead of the
            // paced advance, can leave a stale timer event behind.
            (_, WorkflowEvent::ConfirmationReached) | (_, WorkflowEvent::ResolutionReached) => {
                debug!(stage = stage.as_str(), event = event.describe(), "stale timer event");
            }

            (_, WorkflowEvent::FinalizeSucceeded { result }) => {
                self.log
                    .success(format!("Webhook response received: {}", result.raw));
                self.session.last_result = Some(result.clone());
                if stage != Stage::Resolved {
                    self.transition(Stage::Resolved, &event);
                }
            }
            (_, WorkflowEvent::FinalizeFailed { failure }) => {
                self.log
                    .error(format!("Error calling webhook: {}", failure_detail(failure)));
            }

            (_, WorkflowEvent::StatusMerged { patch }) => {
                self.merge_status(patch);
            }

            (stage, event) => {
                warn!(
                    stage = stage.as_str(),
                    event = event.describe(),
                    "invalid workflow transition"
                );
                return Err(WorkflowError::InvalidTransition {
                    stage,
                    event: event.describe(),
                });
            }
        }
        Ok(())
    }

    /// Derived step indicator statuses, a pure projection of the session.
    pub fn step_report(&self) -> Vec<StepInfo> {
        let stage = self.session.stage;
        let errored = self.session.errored;

        let start = StepInfo {
            id: "start",
            title: "Start Process",
            description: "Initiate your invoice process",
            status: if self.session.resume_url.is_some() {
                StepStatus::Completed
            } else {
                StepStatus::Current
            },
        };

        if self.session.resume_url.is_none() {
            return vec![start];
        }

        let upload_status = match stage {
            Stage::AwaitingUpload => StepStatus::Current,
            Stage::Submitting | Stage::AwaitingConfirmation | Stage::Resolved => {
                StepStatus::Completed
            }
            _ => StepStatus::Pending,
        };
        let sending_status = match stage {
            Stage::Submitting => StepStatus::Current,
            Stage::AwaitingConfirmation | Stage::Resolved => StepStatus::Completed,
            _ => StepStatus::Pending,
        };
        let processing_status = if errored {
            StepStatus::Error
        } else {
            match stage {
                Stage::AwaitingConfirmation => StepStatus::Current,
                Stage::Resolved => StepStatus::Completed,
                _ => StepStatus::Pending,
            }
        };
        let processed_status = if errored {
            StepStatus::Error
        } else if stage == Stage::Resolved {
            StepStatus::Current
        } else {
            StepStatus::Pending
        };

        vec![
            start,
            StepInfo {
                id: "upload",
                title: "Upload Invoice",
                description: "Provide xml file",
                status: upload_status,
            },
            StepInfo {
                id: "sending",
                title: "Sending invoice",
                description: "Accessing engine API",
                status: sending_status,
            },
            StepInfo {
                id: "processing",
                title: "Invoice Processing",
                description: "Waiting for receiving confirmation",
                status: processing_status,
            },
            StepInfo {
                id: "processed",
                title: "Invoice Processed",
                description: "Status of invoice",
                status: processed_status,
            },
        ]
    }

    fn transition(&mut self, to: Stage, event: &WorkflowEvent) {
        let from = self.session.stage;
        info!(
            from = from.as_str(),
            to = to.as_str(),
            event = event.describe(),
            "workflow stage transition"
        );
        self.history.push(StageTransitionRecord {
            from,
            to,
            event: event.describe().to_string(),
            timestamp: Utc::now(),
        });
        self.session.stage = to;
    }

    fn record_result(&mut self, result: NormalizedResult) {
        match result.outcome {
            Outcome::Success => {
                self.log.success("Engine response received successfully!");
                if let Some(id) = &result.tracking_id {
                    self.log.info(format!("Tracking ID: {id}"));
                }
                if let Some(number) = &result.invoice_number {
                    self.log.info(format!("Invoice Number: {number}"));
                }
                if let Some(external) = &result.external_tracking_id {
                    self.log.info(format!("External Tracking ID: {external}"));
                }
                if let Some(received) = &result.date_received {
                    self.log.info(format!("Date Received: {received}"));
                }
            }
            Outcome::Error => {
                self.session.errored = true;
                let message = result
                    .error_message
                    .clone()
                    .or_else(|| result.error_code.clone())
                    .unwrap_or_else(|| "unknown error".to_string());
                self.log
                    .error(format!("Error from workflow engine: {message}"));
                if let Some(track) = &result.internal_track_id {
                    self.log.error(format!("Internal Track ID: {track}"));
                }
                if let Some(ts) = &result.error_timestamp {
                    self.log.error(format!("Timestamp: {ts}"));
                }
            }
            Outcome::Ack => {
                self.log.info("Waiting for engine response...");
            }
        }
        self.session.last_result = Some(result);
    }

    fn log_trigger_failure(&mut self, failure: &CallFailure) {
        match failure {
            CallFailure::Unreachable { detail } => {
                self.log.error(format!(
                    "Network error: unable to reach the workflow endpoint ({detail})"
                ));
            }
            CallFailure::BadStatus { status, body } => {
                self.log.error(format!(
                    "Error triggering workflow: HTTP error! status: {status} - {body}"
                ));
            }
            CallFailure::InvalidBody { text } => {
                self.log.error(format!(
                    "Error triggering workflow: response is not valid data: {text}"
                ));
            }
            CallFailure::MissingResumeUrl => {
                self.log
                    .error("Error triggering workflow: no resume URL received");
            }
        }
    }

    fn log_submission_failure(&mut self, failure: &CallFailure) {
        match failure {
            CallFailure::Unreachable { detail } => {
                self.log.error(format!(
                    "Network error: unable to connect to the workflow endpoint: {detail}"
                ));
                self.log.error(
                    "This usually means the webhook-waiting endpoint is not properly configured",
                );
            }
            CallFailure::BadStatus { status, body } => {
                self.log.error(format!(
                    "Error sending invoice: HTTP error! status: {status} - {body}"
                ));
            }
            CallFailure::InvalidBody { text } => {
                self.log
                    .error(format!("Response is not valid data: {text}"));
            }
            CallFailure::MissingResumeUrl => {
                self.log.error("Error sending invoice: no resume URL");
            }
        }
    }

    /// Shallow-merge a status-check reply into the last known result and
    /// log the submission status when present.
    fn merge_status(&mut self, patch: &Value) {
        let status_line = patch
            .get("ksefSubmissionStatus")
            .and_then(Value::as_str)
            .map(|s| s.to_string());

        match &mut self.session.last_result {
            Some(result) => {
                if let (Value::Object(target), Value::Object(source)) =
                    (&mut result.raw, patch)
                {
                    for (key, value) in source {
                        target.insert(key.clone(), value.clone());
                    }
                } else {
                    result.raw = patch.clone();
                }
            }
            None => {
                self.session.last_result =
                    Some(crate::workflow::classifier::classify(patch));
            }
        }

        match status_line {
            Some(status) => self.log.info(format!("Submission status: {status}")),
            None => self.log.info(format!("Status update received: {patch}")),
        }
    }
}

fn failure_detail(failure: &CallFailure) -> String {
    match failure {
        CallFailure::Unreachable { detail } => detail.clone(),
        CallFailure::BadStatus { status, body } => {
            format!("HTTP error! status: {status} - {body}")
        }
        CallFailure::InvalidBody { text } => text.clone(),
        CallFailure::MissingResumeUrl => "no resume URL available".to_string(),
    }
}
