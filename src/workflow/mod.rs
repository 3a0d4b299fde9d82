//! Invoice submission workflow core.
//!
//! This module owns the entire multi-stage submission process: trigger the
//! remote automation workflow, upload the invoice document to the resume
//! address it returns, interpret the asynchronous replies and report a
//! terminal outcome.
//!
//! # Architecture
//!
//! - **State Machine**: stage tracking, session aggregate, transition
//!   history and the append-only event log
//! - **Response Classifier**: normalizes heterogeneous engine replies
//!   (ack / success / error) across field-name spellings
//! - **Orchestrator**: async command surface issuing network calls and
//!   scheduling paced delays and the periodic status poll
//!
//! Data flows one direction: commands go through the orchestrator, the
//! presentation layer only reads session snapshots and the event log.

pub mod classifier;
pub mod event_log;
pub mod orchestrator;
pub mod state_machine;

pub use classifier::{classify, NormalizedResult, Outcome};
pub use event_log::{EventLog, LogEntry, LogSeverity};
pub use orchestrator::{WorkflowOrchestrator, DEFAULT_POLL_INTERVAL, DEFAULT_STAGE_PACING};
pub use state_machine::{
    CallFailure, InvoiceDocument, Stage, StageTransitionRecord, StepInfo, StepStatus,
    WorkflowError, WorkflowEvent, WorkflowMachine, WorkflowSession,
};
