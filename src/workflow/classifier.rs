//! Classification of workflow engine replies.
//!
//! The upstream engine has gone through several schema revisions, so the
//! same logical field arrives under different spellings depending on the
//! workflow version. Classification checks every known alias and prefers
//! the first non-empty one, which tolerates schema drift without any
//! version negotiation. Replies sometimes arrive as an array; only the
//! first element carries the result, the rest are discarded.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Resume-address spellings returned by the trigger call.
const RESUME_URL_ALIASES: &[&str] = &["resumeUrl", "webhookUrl"];

/// Tracking-id spellings in a successful submission reply.
const TRACKING_ID_ALIASES: &[&str] = &["xfxTrackingId", "id"];

/// Invoice-number spellings in a successful submission reply.
const INVOICE_NUMBER_ALIASES: &[&str] = &["invoiceNo", "number"];

/// Any of these marks the reply as an error result, regardless of what
/// else is present.
const ERROR_ALIASES: &[&str] = &["error", "errorMessage", "errorCode"];

/// Marker the engine sends when it accepted the upload but has not yet
/// produced a business result.
const ACK_MARKER: &str = "Workflow was started";

/// Business outcome of a classified reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Request accepted, no business result yet.
    Ack,
    /// Submission tracked: both a tracking id and an invoice number present.
    Success,
    /// The engine reported an error.
    Error,
}

/// Normalized view of a reply body. `raw` always retains the original
/// payload for diagnostic display, whatever the outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResult {
    pub outcome: Outcome,
    pub tracking_id: Option<String>,
    pub invoice_number: Option<String>,
    pub external_tracking_id: Option<String>,
    pub date_received: Option<String>,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub internal_track_id: Option<String>,
    pub error_timestamp: Option<String>,
    pub raw: Value,
}

impl NormalizedResult {
    /// Wrap a non-JSON reply body as an error result, keeping the raw text.
    pub fn invalid_body(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            outcome: Outcome::Error,
            tracking_id: None,
            invoice_number: None,
            external_tracking_id: None,
            date_received: None,
            error_message: Some(text.clone()),
            error_code: None,
            internal_track_id: None,
            error_timestamp: None,
            raw: Value::String(text),
        }
    }
}

/// Classify a decoded reply body into a [`NormalizedResult`].
///
/// Order matters: error aliases win over success fields, success requires
/// both a tracking id and an invoice number, the ack marker is checked
/// last, and anything unrecognized is an ack with only the raw payload
/// retained.
pub fn classify(body: &Value) -> NormalizedResult {
    let payload = first_element(body);

    let tracking_id = first_non_empty(payload, TRACKING_ID_ALIASES);
    let invoice_number = first_non_empty(payload, INVOICE_NUMBER_ALIASES);
    let error_message = first_non_empty(payload, &["errorMessage", "error"]);
    let error_code = first_non_empty(payload, &["errorCode"]);

    let outcome = if ERROR_ALIASES.iter().any(|key| is_present(payload, key)) {
        Outcome::Error
    } else if tracking_id.is_some() && invoice_number.is_some() {
        Outcome::Success
    } else {
        // Known ack marker and unrecognized shapes both land here.
        Outcome::Ack
    };

    NormalizedResult {
        outcome,
        tracking_id,
        invoice_number,
        external_tracking_id: first_non_empty(payload, &["externalTrackingId"]),
        date_received: first_non_empty(payload, &["dateReceivedUtc"]),
        error_message,
        error_code,
        internal_track_id: first_non_empty(payload, &["internalTrackID"]),
        error_timestamp: first_non_empty(payload, &["timestamp"]),
        raw: payload.clone(),
    }
}

/// True when the reply is only the "workflow was started" acknowledgement.
pub fn is_ack_marker(body: &Value) -> bool {
    first_element(body)
        .get("message")
        .and_then(Value::as_str)
        .map(|m| m == ACK_MARKER)
        .unwrap_or(false)
}

/// Extract the resume address from a trigger reply, checking every
/// historically used spelling.
pub fn resume_address(body: &Value) -> Option<String> {
    first_non_empty(first_element(body), RESUME_URL_ALIASES)
}

/// Arrays collapse to their first element; everything past it is discarded.
fn first_element(body: &Value) -> &Value {
    match body {
        Value::Array(items) => items.first().unwrap_or(&Value::Null),
        other => other,
    }
}

/// Resolve an aliased field, preferring the first non-empty spelling.
/// Non-string scalars (e.g. a numeric id) are stringified.
fn first_non_empty(payload: &Value, aliases: &[&str]) -> Option<String> {
    for key in aliases {
        match payload.get(*key) {
            Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => continue,
        }
    }
    None
}

/// Presence test for classification: a field counts only when it carries
/// something truthy (`error: false`, `null` and `""` do not flag an error).
fn is_present(payload: &Value, key: &str) -> bool {
    match payload.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}
