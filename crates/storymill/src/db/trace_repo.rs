//! Trace repository — append-only span/event rows.
//!
//! Event rows carry a monotonically increasing `seq` assigned by SQLite
//! (AUTOINCREMENT) at append time, independent of wall-clock skew between
//! producers. Duplicate deliveries are detected by content fingerprint
//! within a sliding window and annotated, never dropped.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw span row.
#[derive(Debug, Clone)]
pub struct SpanRow {
    pub span_id: String,
    pub job_id: String,
    pub parent_span_id: Option<String>,
    pub name: String,
    pub phase: Option<String>,
    pub status: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub attributes: String,
}

impl SpanRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            span_id: row.get("span_id")?,
            job_id: row.get("job_id")?,
            parent_span_id: row.get("parent_span_id")?,
            name: row.get("name")?,
            phase: row.get("phase")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            attributes: row.get("attributes")?,
        })
    }
}

/// A raw event row.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub seq: i64,
    pub event_id: String,
    pub job_id: String,
    pub span_id: Option<String>,
    pub name: String,
    pub level: String,
    pub message: Option<String>,
    pub attributes: String,
    pub fingerprint: String,
    pub is_duplicate: bool,
    pub duplicate_index: Option<i64>,
    pub duplicate_count: Option<i64>,
    pub ts: String,
}

impl EventRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            seq: row.get("seq")?,
            event_id: row.get("event_id")?,
            job_id: row.get("job_id")?,
            span_id: row.get("span_id")?,
            name: row.get("name")?,
            level: row.get("level")?,
            message: row.get("message")?,
            attributes: row.get("attributes")?,
            fingerprint: row.get("fingerprint")?,
            is_duplicate: row.get::<_, i64>("is_duplicate")? != 0,
            duplicate_index: row.get("duplicate_index")?,
            duplicate_count: row.get("duplicate_count")?,
            ts: row.get("ts")?,
        })
    }
}

/// Draft of an event to append; seq and duplicate annotations are
/// assigned at append time.
#[derive(Debug, Clone)]
pub struct EventDraft {
    pub event_id: String,
    pub job_id: String,
    pub span_id: Option<String>,
    pub name: String,
    pub level: String,
    pub message: Option<String>,
    pub attributes: String,
    pub fingerprint: String,
    pub ts: String,
}

/// Inserts a new span.
pub fn insert_span(db: &Database, span: &SpanRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO trace_spans (span_id, job_id, parent_span_id, name, phase, status,
             started_at, ended_at, attributes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                span.span_id,
                span.job_id,
                span.parent_span_id,
                span.name,
                span.phase,
                span.status,
                span.started_at,
                span.ended_at,
                span.attributes,
            ],
        )?;
        Ok(())
    })
}

/// Ends a span. A span may only be ended once; ending an already-ended
/// span is a no-op (the `ended_at IS NULL` guard). Returns whether this
/// call actually ended it.
pub fn end_span(
    db: &Database,
    span_id: &str,
    status: &str,
    ended_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE trace_spans SET status = ?2, ended_at = ?3
             WHERE span_id = ?1 AND ended_at IS NULL",
            params![span_id, status, ended_at],
        )?;
        Ok(affected == 1)
    })
}

/// Finds a span by id.
pub fn find_span(db: &Database, span_id: &str) -> Result<Option<SpanRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM trace_spans WHERE span_id = ?1",
                params![span_id],
                SpanRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Finds the root span of a job by name.
pub fn find_span_by_name(
    db: &Database,
    job_id: &str,
    name: &str,
) -> Result<Option<SpanRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM trace_spans WHERE job_id = ?1 AND name = ?2
                 ORDER BY started_at ASC LIMIT 1",
                params![job_id, name],
                SpanRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// All spans of a job in start order.
pub fn spans_for_job(db: &Database, job_id: &str) -> Result<Vec<SpanRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn
            .prepare("SELECT * FROM trace_spans WHERE job_id = ?1 ORDER BY started_at ASC")?;
        let rows: Vec<SpanRow> = stmt
            .query_map(params![job_id], SpanRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Appends one event, assigning `seq` and duplicate annotations inside a
/// single transaction so concurrent appenders serialize cleanly.
///
/// `window_start` is the RFC3339 lower bound of the duplicate-detection
/// window: an identical fingerprint appended at or after it makes the new
/// event a duplicate. The whole group's `duplicate_count` is refreshed so
/// every member carries the final count.
pub fn append_event(
    db: &Database,
    draft: &EventDraft,
    window_start: &str,
) -> Result<EventRow, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;

        let prior: i64 = tx.query_row(
            "SELECT COUNT(*) FROM trace_events
             WHERE job_id = ?1 AND fingerprint = ?2 AND ts >= ?3",
            params![draft.job_id, draft.fingerprint, window_start],
            |r| r.get(0),
        )?;

        let is_duplicate = prior > 0;
        let duplicate_index = if is_duplicate { Some(prior + 1) } else { None };

        tx.execute(
            "INSERT INTO trace_events (event_id, job_id, span_id, name, level, message,
             attributes, fingerprint, is_duplicate, duplicate_index, duplicate_count, ts)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                draft.event_id,
                draft.job_id,
                draft.span_id,
                draft.name,
                draft.level,
                draft.message,
                draft.attributes,
                draft.fingerprint,
                is_duplicate as i64,
                duplicate_index,
                if is_duplicate { Some(prior + 1) } else { None },
                draft.ts,
            ],
        )?;
        let seq = tx.last_insert_rowid();

        if is_duplicate {
            // Refresh the group count, including the first delivery.
            tx.execute(
                "UPDATE trace_events SET duplicate_count = ?4
                 WHERE job_id = ?1 AND fingerprint = ?2 AND ts >= ?3",
                params![draft.job_id, draft.fingerprint, window_start, prior + 1],
            )?;
        }

        tx.commit()?;

        let row = conn.query_row(
            "SELECT * FROM trace_events WHERE seq = ?1",
            params![seq],
            EventRow::from_row,
        )?;
        Ok(row)
    })
}

/// All events of a job in append order.
pub fn events_for_job(db: &Database, job_id: &str) -> Result<Vec<EventRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM trace_events WHERE job_id = ?1 ORDER BY seq ASC")?;
        let rows: Vec<EventRow> = stmt
            .query_map(params![job_id], EventRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Whether any event with the given name exists for a job. Used by the
/// start route to refuse re-dispatch when an ack is already recorded.
pub fn has_event_named(db: &Database, job_id: &str, name: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM trace_events WHERE job_id = ?1 AND name = ?2",
            params![job_id, name],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::job_repo::{self, JobRow};

    const PHASES: &[&str] = &["extract", "template", "store", "ingest"];

    fn test_db_with_job(job_id: &str) -> Database {
        let db = Database::open_in_memory().unwrap();
        let job = JobRow {
            id: job_id.to_string(),
            status: "queued".to_string(),
            correlation: "{}".to_string(),
            parameters: "{}".to_string(),
            secret_hash: "h".to_string(),
            extracted_text: None,
            current_span_id: None,
            result: None,
            error: None,
            created_at: "2026-01-01T00:00:00+00:00".to_string(),
            updated_at: "2026-01-01T00:00:00+00:00".to_string(),
        };
        job_repo::insert(&db, &job, PHASES).unwrap();
        db
    }

    fn sample_span(job_id: &str, span_id: &str, name: &str) -> SpanRow {
        SpanRow {
            span_id: span_id.to_string(),
            job_id: job_id.to_string(),
            parent_span_id: None,
            name: name.to_string(),
            phase: None,
            status: "running".to_string(),
            started_at: "2026-01-01T00:00:00+00:00".to_string(),
            ended_at: None,
            attributes: "{}".to_string(),
        }
    }

    fn sample_draft(job_id: &str, name: &str, fingerprint: &str, ts: &str) -> EventDraft {
        EventDraft {
            event_id: uuid::Uuid::new_v4().to_string(),
            job_id: job_id.to_string(),
            span_id: None,
            name: name.to_string(),
            level: "info".to_string(),
            message: None,
            attributes: "{}".to_string(),
            fingerprint: fingerprint.to_string(),
            ts: ts.to_string(),
        }
    }

    #[test]
    fn test_end_span_is_idempotent() {
        let db = test_db_with_job("j1");
        insert_span(&db, &sample_span("j1", "s1", "job")).unwrap();

        assert!(end_span(&db, "s1", "completed", "2026-01-01T00:01:00+00:00").unwrap());
        // Second end is a no-op and must not overwrite the first outcome.
        assert!(!end_span(&db, "s1", "failed", "2026-01-01T00:02:00+00:00").unwrap());

        let span = find_span(&db, "s1").unwrap().unwrap();
        assert_eq!(span.status, "completed");
        assert_eq!(span.ended_at.as_deref(), Some("2026-01-01T00:01:00+00:00"));
    }

    #[test]
    fn test_event_seq_strictly_increasing() {
        let db = test_db_with_job("j2");
        let mut last_seq = 0;
        for i in 0..5 {
            let draft = sample_draft(
                "j2",
                &format!("event_{}", i),
                &format!("fp-{}", i),
                "2026-01-01T00:00:01+00:00",
            );
            let row = append_event(&db, &draft, "2026-01-01T00:00:00+00:00").unwrap();
            assert!(row.seq > last_seq);
            last_seq = row.seq;
        }
    }

    #[test]
    fn test_duplicate_detection_annotates_not_drops() {
        let db = test_db_with_job("j3");
        let ts = "2026-01-01T00:00:05+00:00";
        let window = "2026-01-01T00:00:00+00:00";

        let first = append_event(&db, &sample_draft("j3", "callback", "same-fp", ts), window)
            .unwrap();
        assert!(!first.is_duplicate);

        let second = append_event(&db, &sample_draft("j3", "callback", "same-fp", ts), window)
            .unwrap();
        assert!(second.is_duplicate);
        assert_eq!(second.duplicate_index, Some(2));
        assert_eq!(second.duplicate_count, Some(2));

        let third = append_event(&db, &sample_draft("j3", "callback", "same-fp", ts), window)
            .unwrap();
        assert_eq!(third.duplicate_index, Some(3));

        // All three preserved, group count refreshed on all members.
        let events = events_for_job(&db, "j3").unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].duplicate_count, Some(3));
        assert_eq!(events[2].duplicate_count, Some(3));
    }

    #[test]
    fn test_duplicate_window_excludes_old_events() {
        let db = test_db_with_job("j4");
        append_event(
            &db,
            &sample_draft("j4", "ping", "fp", "2026-01-01T00:00:00+00:00"),
            "2026-01-01T00:00:00+00:00",
        )
        .unwrap();

        // Same fingerprint, but the window starts after the first event.
        let later = append_event(
            &db,
            &sample_draft("j4", "ping", "fp", "2026-01-01T01:00:00+00:00"),
            "2026-01-01T00:59:50+00:00",
        )
        .unwrap();
        assert!(!later.is_duplicate);
    }

    #[test]
    fn test_has_event_named() {
        let db = test_db_with_job("j5");
        assert!(!has_event_named(&db, "j5", "extraction_dispatched").unwrap());
        append_event(
            &db,
            &sample_draft(
                "j5",
                "extraction_dispatched",
                "fp-d",
                "2026-01-01T00:00:00+00:00",
            ),
            "2026-01-01T00:00:00+00:00",
        )
        .unwrap();
        assert!(has_event_named(&db, "j5", "extraction_dispatched").unwrap());
    }

    #[test]
    fn test_spans_for_job_ordered() {
        let db = test_db_with_job("j6");
        let mut root = sample_span("j6", "root", "job");
        root.started_at = "2026-01-01T00:00:00+00:00".to_string();
        insert_span(&db, &root).unwrap();

        let mut child = sample_span("j6", "child", "phase.extract");
        child.parent_span_id = Some("root".to_string());
        child.started_at = "2026-01-01T00:00:01+00:00".to_string();
        insert_span(&db, &child).unwrap();

        let spans = spans_for_job(&db, "j6").unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].span_id, "root");
        assert_eq!(spans[1].parent_span_id.as_deref(), Some("root"));
    }
}
