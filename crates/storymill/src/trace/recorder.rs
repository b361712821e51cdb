//! Append-only trace recorder backed by the job database.

use chrono::{Duration, Utc};
use sha2::{Digest, Sha256};

use crate::db::trace_repo::{self, EventDraft, SpanRow};
use crate::db::{job_repo, Database, DatabaseError};
use crate::job::Phase;

use super::types::{Event, EventInput, Span, SpanStatus, TraceView};

/// Name of the root span created at trace initialization.
pub const ROOT_SPAN_NAME: &str = "job";

/// Sliding window for duplicate-event detection.
const DUPLICATE_WINDOW_SECS: i64 = 10;

/// Records spans and events for jobs. Cloning is cheap (inner `Arc` via
/// `Database`); the persisted trace is the only state.
#[derive(Clone)]
pub struct TraceRecorder {
    db: Database,
}

impl TraceRecorder {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates the root `job` span for a job. Idempotent: if the root span
    /// already exists its id is returned unchanged.
    pub fn initialize_trace(&self, job_id: &str) -> Result<String, DatabaseError> {
        if let Some(existing) = trace_repo::find_span_by_name(&self.db, job_id, ROOT_SPAN_NAME)? {
            return Ok(existing.span_id);
        }

        let span_id = uuid::Uuid::new_v4().to_string();
        let row = SpanRow {
            span_id: span_id.clone(),
            job_id: job_id.to_string(),
            parent_span_id: None,
            name: ROOT_SPAN_NAME.to_string(),
            phase: None,
            status: SpanStatus::Running.as_str().to_string(),
            started_at: Utc::now().to_rfc3339(),
            ended_at: None,
            attributes: "{}".to_string(),
        };
        trace_repo::insert_span(&self.db, &row)?;
        job_repo::set_current_span(&self.db, job_id, Some(&span_id))?;
        Ok(span_id)
    }

    /// Starts a child span and makes it the job's active span. The parent
    /// defaults to the root span when not given.
    pub fn start_span(
        &self,
        job_id: &str,
        name: &str,
        phase: Option<Phase>,
        parent_span_id: Option<&str>,
    ) -> Result<String, DatabaseError> {
        let parent = match parent_span_id {
            Some(p) => Some(p.to_string()),
            None => trace_repo::find_span_by_name(&self.db, job_id, ROOT_SPAN_NAME)?
                .map(|s| s.span_id),
        };

        let span_id = uuid::Uuid::new_v4().to_string();
        let row = SpanRow {
            span_id: span_id.clone(),
            job_id: job_id.to_string(),
            parent_span_id: parent,
            name: name.to_string(),
            phase: phase.map(|p| p.as_str().to_string()),
            status: SpanStatus::Running.as_str().to_string(),
            started_at: Utc::now().to_rfc3339(),
            ended_at: None,
            attributes: "{}".to_string(),
        };
        trace_repo::insert_span(&self.db, &row)?;
        job_repo::set_current_span(&self.db, job_id, Some(&span_id))?;
        Ok(span_id)
    }

    /// Ends a span. Ending an already-ended span is a no-op. The job's
    /// active-span pointer moves back to the span's parent when this span
    /// was the active one.
    pub fn end_span(
        &self,
        job_id: &str,
        span_id: &str,
        status: SpanStatus,
    ) -> Result<bool, DatabaseError> {
        let ended =
            trace_repo::end_span(&self.db, span_id, status.as_str(), &Utc::now().to_rfc3339())?;
        if ended {
            if let Some(job) = job_repo::find_by_id(&self.db, job_id)? {
                if job.current_span_id.as_deref() == Some(span_id) {
                    let parent = trace_repo::find_span(&self.db, span_id)?
                        .and_then(|s| s.parent_span_id);
                    job_repo::set_current_span(&self.db, job_id, parent.as_deref())?;
                }
            }
        }
        Ok(ended)
    }

    /// Appends an event. When no explicit span is given the job's current
    /// span is used. Repeated identical deliveries within the duplicate
    /// window are annotated (index/count), never dropped.
    pub fn add_event(&self, job_id: &str, input: EventInput) -> Result<Event, DatabaseError> {
        let span_id = match input.span_id {
            Some(s) => Some(s),
            None => job_repo::find_by_id(&self.db, job_id)?.and_then(|j| j.current_span_id),
        };

        let attributes = serde_json::to_string(&input.attributes)
            .unwrap_or_else(|_| "{}".to_string());
        let fingerprint = event_fingerprint(&input.name, span_id.as_deref(), &attributes);

        let now = Utc::now();
        let window_start = (now - Duration::seconds(DUPLICATE_WINDOW_SECS)).to_rfc3339();

        let draft = EventDraft {
            event_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            span_id,
            name: input.name,
            level: input.level.as_str().to_string(),
            message: input.message,
            attributes,
            fingerprint,
            ts: now.to_rfc3339(),
        };

        let row = trace_repo::append_event(&self.db, &draft, &window_start)?;
        Ok(Event::from_row(&row))
    }

    /// Loads the full trace of a job.
    pub fn trace_view(&self, job_id: &str) -> Result<TraceView, DatabaseError> {
        let spans = trace_repo::spans_for_job(&self.db, job_id)?
            .iter()
            .map(Span::from_row)
            .collect();
        let events = trace_repo::events_for_job(&self.db, job_id)?
            .iter()
            .map(Event::from_row)
            .collect();
        let current_span_id =
            job_repo::find_by_id(&self.db, job_id)?.and_then(|j| j.current_span_id);
        Ok(TraceView {
            job_id: job_id.to_string(),
            spans,
            events,
            current_span_id,
        })
    }

    /// Whether an event with the given name was ever recorded for a job.
    pub fn has_event(&self, job_id: &str, name: &str) -> Result<bool, DatabaseError> {
        trace_repo::has_event_named(&self.db, job_id, name)
    }
}

/// Content fingerprint for duplicate detection: hash of name, span and
/// canonical attribute JSON (serde_json maps serialize with sorted keys).
fn event_fingerprint(name: &str, span_id: Option<&str>, attributes_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\n");
    hasher.update(span_id.unwrap_or("").as_bytes());
    hasher.update(b"\n");
    hasher.update(attributes_json.as_bytes());
    hex::encode(hasher.finalize())
}
