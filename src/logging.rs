//! Structured JSON event log for session-lifecycle milestones.
//!
//! Covers the handful of event kinds this protocol actually has. Routine
//! per-datagram tracing goes through plain `log::debug!`/`log::info!` calls
//! instead — this logger is only for the higher-signal events an operator
//! might `jq` over.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
}

/// One structured, newline-delimited JSON log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub event: String,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

impl LogEntry {
    fn new(level: LogLevel, event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            timestamp: humantime::format_rfc3339(SystemTime::now()).to_string(),
            level,
            event: event.into(),
            data,
        }
    }

    fn emit(&self) {
        if let Ok(json) = serde_json::to_string(self) {
            println!("{json}");
        }
    }
}

/// Session-lifecycle events a server operator would want to grep/`jq` for.
pub struct SessionLog;

impl SessionLog {
    pub fn created(session_id: &str, addr: std::net::SocketAddr, filename: &str, chunk_count: usize) {
        LogEntry::new(
            LogLevel::Info,
            "session_created",
            serde_json::json!({
                "session_id": session_id,
                "peer": addr.to_string(),
                "filename": filename,
                "chunk_count": chunk_count,
            }),
        )
        .emit();
    }

    pub fn completed(session_id: &str, addr: std::net::SocketAddr) {
        LogEntry::new(
            LogLevel::Info,
            "session_completed",
            serde_json::json!({
                "session_id": session_id,
                "peer": addr.to_string(),
            }),
        )
        .emit();
    }

    pub fn reaped(session_id: &str, addr: std::net::SocketAddr) {
        LogEntry::new(
            LogLevel::Warn,
            "session_reaped",
            serde_json::json!({
                "session_id": session_id,
                "peer": addr.to_string(),
            }),
        )
        .emit();
    }
}
