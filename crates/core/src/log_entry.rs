//! Server-side log lines emitted while a sync job runs.

use serde::{Deserialize, Serialize};

use crate::types::{Seq, Timestamp};

/// Severity of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warning")]
    Warning,
    #[serde(alias = "error")]
    Error,
    #[serde(alias = "success")]
    Success,
}

/// One immutable log line, uniquely identified by `seq` within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: Seq,
    pub timestamp: Timestamp,
    pub level: LogLevel,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wire_entry() {
        let json = r#"{"seq":7,"timestamp":"2026-03-01T10:00:00Z","level":"SUCCESS","message":"done"}"#;
        let entry: LogEntry = serde_json::from_str(json).unwrap();

        assert_eq!(entry.seq, 7);
        assert_eq!(entry.level, LogLevel::Success);
        assert_eq!(entry.message, "done");
        assert_eq!(entry.timestamp.to_rfc3339(), "2026-03-01T10:00:00+00:00");
    }

    #[test]
    fn accepts_lowercase_level() {
        let json = r#"{"seq":1,"timestamp":"2026-03-01T10:00:00Z","level":"warning","message":"slow"}"#;
        let entry: LogEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.level, LogLevel::Warning);
    }

    #[test]
    fn rejects_unknown_level() {
        let json = r#"{"seq":1,"timestamp":"2026-03-01T10:00:00Z","level":"DEBUG","message":"x"}"#;
        assert!(serde_json::from_str::<LogEntry>(json).is_err());
    }
}
