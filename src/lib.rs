// Invoice Relay Library - Workflow Submission Orchestration
// This exposes the core components for testing and integration

pub mod config;
pub mod telemetry;
pub mod transport;
pub mod workflow;

// Re-export key types for easy access
pub use config::{config, InvoiceRelayConfig};
pub use telemetry::{generate_correlation_id, init_telemetry, shutdown_telemetry};
pub use transport::{HttpTransport, MultipartPayload, ParsedBody, Transport, TransportError};
pub use workflow::{
    classify, CallFailure, InvoiceDocument, LogEntry, LogSeverity, NormalizedResult, Outcome,
    Stage, StepInfo, StepStatus, WorkflowError, WorkflowEvent, WorkflowMachine,
    WorkflowOrchestrator, WorkflowSession,
};
