use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::trace_repo::{EventRow, SpanRow};
use crate::job::Phase;

/// Span lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    Running,
    Completed,
    Failed,
    Skipped,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Running => "running",
            SpanStatus::Completed => "completed",
            SpanStatus::Failed => "failed",
            SpanStatus::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<SpanStatus> {
        match s {
            "running" => Some(SpanStatus::Running),
            "completed" => Some(SpanStatus::Completed),
            "failed" => Some(SpanStatus::Failed),
            "skipped" => Some(SpanStatus::Skipped),
            _ => None,
        }
    }
}

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

impl EventLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventLevel::Info => "info",
            EventLevel::Warn => "warn",
            EventLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<EventLevel> {
        match s {
            "info" => Some(EventLevel::Info),
            "warn" => Some(EventLevel::Warn),
            "error" => Some(EventLevel::Error),
            _ => None,
        }
    }
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

/// A span in the job trace. Spans form a tree rooted at the single `job`
/// span created at trace initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Span {
    pub span_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
    pub status: SpanStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

impl Span {
    pub fn from_row(row: &SpanRow) -> Self {
        Self {
            span_id: row.span_id.clone(),
            parent_span_id: row.parent_span_id.clone(),
            name: row.name.clone(),
            phase: row.phase.as_deref().and_then(Phase::parse),
            status: SpanStatus::parse(&row.status).unwrap_or(SpanStatus::Running),
            started_at: parse_timestamp(&row.started_at),
            ended_at: row.ended_at.as_deref().map(parse_timestamp),
            attributes: serde_json::from_str(&row.attributes)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// A point event in the job trace, ordered by `sequence_no`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub sequence_no: i64,
    pub ts: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    pub name: String,
    pub level: EventLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub attributes: serde_json::Value,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duplicate_count: Option<i64>,
}

impl Event {
    pub fn from_row(row: &EventRow) -> Self {
        Self {
            event_id: row.event_id.clone(),
            sequence_no: row.seq,
            ts: parse_timestamp(&row.ts),
            span_id: row.span_id.clone(),
            name: row.name.clone(),
            level: EventLevel::parse(&row.level).unwrap_or(EventLevel::Info),
            message: row.message.clone(),
            attributes: serde_json::from_str(&row.attributes)
                .unwrap_or(serde_json::Value::Null),
            is_duplicate: row.is_duplicate,
            duplicate_index: row.duplicate_index,
            duplicate_count: row.duplicate_count,
        }
    }
}

/// Input for appending an event. Span defaults to the job's currently
/// active span when not given, so call sites don't need to thread span
/// identity everywhere.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub name: String,
    pub level: EventLevel,
    pub span_id: Option<String>,
    pub message: Option<String>,
    pub attributes: serde_json::Value,
}

impl EventInput {
    pub fn info(name: &str) -> Self {
        Self {
            name: name.to_string(),
            level: EventLevel::Info,
            span_id: None,
            message: None,
            attributes: serde_json::json!({}),
        }
    }

    pub fn warn(name: &str) -> Self {
        Self {
            level: EventLevel::Warn,
            ..Self::info(name)
        }
    }

    pub fn error(name: &str) -> Self {
        Self {
            level: EventLevel::Error,
            ..Self::info(name)
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.message = Some(message.to_string());
        self
    }

    pub fn with_span(mut self, span_id: &str) -> Self {
        self.span_id = Some(span_id.to_string());
        self
    }

    pub fn with_attributes(mut self, attributes: serde_json::Value) -> Self {
        self.attributes = attributes;
        self
    }
}

/// Full trace of a job: spans, events, and the active-span pointer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceView {
    pub job_id: String,
    pub spans: Vec<Span>,
    pub events: Vec<Event>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_span_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_span_status_roundtrip() {
        for s in [
            SpanStatus::Running,
            SpanStatus::Completed,
            SpanStatus::Failed,
            SpanStatus::Skipped,
        ] {
            assert_eq!(SpanStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(SpanStatus::parse("other"), None);
    }

    #[test]
    fn test_event_input_builders() {
        let input = EventInput::warn("slow_response")
            .with_message("upstream took 30s")
            .with_span("span-1")
            .with_attributes(serde_json::json!({"elapsedMs": 30000}));
        assert_eq!(input.level, EventLevel::Warn);
        assert_eq!(input.span_id.as_deref(), Some("span-1"));
        assert_eq!(input.attributes["elapsedMs"], 30000);
    }

    #[test]
    fn test_span_from_row_tolerates_bad_phase() {
        let row = crate::db::trace_repo::SpanRow {
            span_id: "s".to_string(),
            job_id: "j".to_string(),
            parent_span_id: None,
            name: "job".to_string(),
            phase: Some("no_such_phase".to_string()),
            status: "completed".to_string(),
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            ended_at: None,
            attributes: "{}".to_string(),
        };
        let span = Span::from_row(&row);
        assert!(span.phase.is_none());
        assert_eq!(span.status, SpanStatus::Completed);
    }
}
