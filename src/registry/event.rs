//! Restream event log entries

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Success,
    Warning,
    Danger,
}

impl std::fmt::Display for EventLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventLevel::Info => "info",
            EventLevel::Success => "success",
            EventLevel::Warning => "warning",
            EventLevel::Danger => "danger",
        };
        f.write_str(s)
    }
}

/// An immutable, timestamped log entry scoped to one restream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub level: EventLevel,
    #[serde(rename = "msg")]
    pub message: String,
    pub time: DateTime<Utc>,
}

impl Event {
    pub fn new(level: EventLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            time: Utc::now(),
        }
    }
}
