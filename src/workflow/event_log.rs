use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Severity of a single event log line, mirrored by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Info,
    Success,
    Warning,
    Error,
}

/// One line of the session's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: LogSeverity,
}

/// Append-only, ordered event log for one workflow session.
///
/// Entries are ordered by monotonically increasing id; nothing is ever
/// reordered or deduplicated. Sealing the log (at session teardown) drops
/// any further appends so no entry can land after disposal.
#[derive(Debug)]
pub struct EventLog {
    entries: Vec<LogEntry>,
    next_id: u64,
    sealed: bool,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_id: 1,
            sealed: false,
        }
    }

    /// Append an entry. Ignored once the log is sealed.
    pub fn append(&mut self, message: impl Into<String>, severity: LogSeverity) {
        if self.sealed {
            debug!("event log sealed, dropping entry");
            return;
        }
        let entry = LogEntry {
            id: self.next_id,
            timestamp: Utc::now(),
            message: message.into(),
            severity,
        };
        self.next_id += 1;
        self.entries.push(entry);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.append(message, LogSeverity::Info);
    }

    pub fn success(&mut self, message: impl Into<String>) {
        self.append(message, LogSeverity::Success);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.append(message, LogSeverity::Warning);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.append(message, LogSeverity::Error);
    }

    /// Seal the log; every subsequent append is dropped.
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_insertion_order_and_monotonic_ids() {
        let mut log = EventLog::new();
        log.info("first");
        log.error("second");
        log.success("third");

        let ids: Vec<u64> = log.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(log.entries()[1].message, "second");
        assert_eq!(log.entries()[1].severity, LogSeverity::Error);
    }

    #[test]
    fn sealed_log_drops_appends() {
        let mut log = EventLog::new();
        log.info("before teardown");
        log.seal();
        log.error("after teardown");

        assert!(log.is_sealed());
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().map(|e| e.message.as_str()), Some("before teardown"));
    }
}
