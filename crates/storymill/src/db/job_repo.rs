//! Job repository — CRUD and guarded updates for the `jobs` and
//! `job_steps` tables.
//!
//! All status mutations are targeted UPDATEs with a status guard in the
//! WHERE clause, so concurrent writers can never clobber each other's
//! transitions; the affected-row count tells the caller whether it won.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub status: String,
    pub correlation: String,
    pub parameters: String,
    pub secret_hash: String,
    pub extracted_text: Option<String>,
    pub current_span_id: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            status: row.get("status")?,
            correlation: row.get("correlation")?,
            parameters: row.get("parameters")?,
            secret_hash: row.get("secret_hash")?,
            extracted_text: row.get("extracted_text")?,
            current_span_id: row.get("current_span_id")?,
            result: row.get("result")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// A raw step row from the database.
#[derive(Debug, Clone)]
pub struct StepRow {
    pub job_id: String,
    pub phase: String,
    pub position: i64,
    pub status: String,
    pub started_at: Option<String>,
    pub ended_at: Option<String>,
    pub error: Option<String>,
    pub details: Option<String>,
}

impl StepRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            phase: row.get("phase")?,
            position: row.get("position")?,
            status: row.get("status")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            error: row.get("error")?,
            details: row.get("details")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub status: Option<String>,
    pub batch_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row together with its pending steps.
pub fn insert(db: &Database, job: &JobRow, phases: &[&str]) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO jobs (id, status, correlation, parameters, secret_hash,
             extracted_text, current_span_id, result, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                job.id,
                job.status,
                job.correlation,
                job.parameters,
                job.secret_hash,
                job.extracted_text,
                job.current_span_id,
                job.result,
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        for (position, phase) in phases.iter().enumerate() {
            tx.execute(
                "INSERT INTO job_steps (job_id, phase, position, status) VALUES (?1, ?2, ?3, 'pending')",
                params![job.id, phase, position as i64],
            )?;
        }
        tx.commit()?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Loads the steps of a job in declared phase order.
pub fn steps_for_job(db: &Database, job_id: &str) -> Result<Vec<StepRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM job_steps WHERE job_id = ?1 ORDER BY position ASC")?;
        let rows: Vec<StepRow> = stmt
            .query_map(params![job_id], StepRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Loads a single step.
pub fn find_step(
    db: &Database,
    job_id: &str,
    phase: &str,
) -> Result<Option<StepRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM job_steps WHERE job_id = ?1 AND phase = ?2",
                params![job_id, phase],
                StepRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref status) = filter.status {
            conditions.push(format!("status = ?{}", param_values.len() + 1));
            param_values.push(Box::new(status.clone()));
        }
        if let Some(ref batch_id) = filter.batch_id {
            conditions.push(format!(
                "json_extract(correlation, '$.batchId') = ?{}",
                param_values.len() + 1
            ));
            param_values.push(Box::new(batch_id.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        // Count total matching rows.
        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        // Fetch paginated results.
        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Unconditionally updates status and updated_at of a job.
pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, updated_at],
        )?;
        Ok(())
    })
}

/// Bumps updated_at without changing anything else; progress heartbeat.
pub fn touch(db: &Database, id: &str, updated_at: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET updated_at = ?2 WHERE id = ?1",
            params![id, updated_at],
        )?;
        Ok(())
    })
}

/// Conditionally transitions job status; returns whether the guard matched.
pub fn update_status_if(
    db: &Database,
    id: &str,
    expected: &str,
    status: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE jobs SET status = ?3, updated_at = ?4 WHERE id = ?1 AND status = ?2",
            params![id, expected, status, updated_at],
        )?;
        Ok(affected == 1)
    })
}

/// Ids of queued jobs, oldest first. `limit` bounds the candidate window.
pub fn queued_candidates(db: &Database, limit: u64) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM jobs WHERE status = 'queued' ORDER BY created_at ASC LIMIT ?1",
        )?;
        let ids: Vec<String> = stmt
            .query_map(params![limit as i64], |r| r.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    })
}

/// Attempts to claim one queued job: transitions it to `running` only if
/// its status is still `queued` at update time. A zero-row update means
/// another worker won the race.
pub fn try_claim(db: &Database, id: &str, updated_at: &str) -> Result<bool, DatabaseError> {
    update_status_if(db, id, "queued", "running", updated_at)
}

/// Persists the extracted text received from the extraction worker.
pub fn set_extracted_text(
    db: &Database,
    id: &str,
    text: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET extracted_text = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, text, updated_at],
        )?;
        Ok(())
    })
}

/// Persists the terminal result payload.
pub fn set_result(
    db: &Database,
    id: &str,
    result: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET result = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, result, updated_at],
        )?;
        Ok(())
    })
}

/// Persists the job-level error message.
pub fn set_error(
    db: &Database,
    id: &str,
    error: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET error = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, error, updated_at],
        )?;
        Ok(())
    })
}

/// Updates the currently-active span pointer.
pub fn set_current_span(
    db: &Database,
    id: &str,
    span_id: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET current_span_id = ?2 WHERE id = ?1",
            params![id, span_id],
        )?;
        Ok(())
    })
}

/// Targeted update of one step row.
#[allow(clippy::too_many_arguments)]
pub fn update_step(
    db: &Database,
    job_id: &str,
    phase: &str,
    status: &str,
    started_at: Option<&str>,
    ended_at: Option<&str>,
    error: Option<&str>,
    details: Option<&str>,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE job_steps SET status = ?3,
                started_at = COALESCE(?4, started_at),
                ended_at = COALESCE(?5, ended_at),
                error = COALESCE(?6, error),
                details = COALESCE(?7, details)
             WHERE job_id = ?1 AND phase = ?2",
            params![job_id, phase, status, started_at, ended_at, error, details],
        )?;
        Ok(())
    })
}

/// Fails a step only if it is still running; used by the watchdog so a
/// late firing can never clobber a step that progressed in the meantime.
pub fn fail_step_if_running(
    db: &Database,
    job_id: &str,
    phase: &str,
    error: &str,
    details: &str,
    ended_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let affected = conn.execute(
            "UPDATE job_steps SET status = 'failed', error = ?3, details = ?4, ended_at = ?5
             WHERE job_id = ?1 AND phase = ?2 AND status = 'running'",
            params![job_id, phase, error, details, ended_at],
        )?;
        Ok(affected == 1)
    })
}

/// Replaces the persisted secret hash.
pub fn set_secret_hash(
    db: &Database,
    id: &str,
    secret_hash: &str,
    updated_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET secret_hash = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, secret_hash, updated_at],
        )?;
        Ok(())
    })
}

/// In-place requeue: resets all steps to pending, clears progress, rotates
/// the secret hash, and re-opens the job as queued. Refused while the job
/// is `running` (guard in the WHERE clause). Returns whether the reset
/// happened.
pub fn requeue(
    db: &Database,
    job_id: &str,
    new_secret_hash: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let tx = conn.unchecked_transaction()?;
        let affected = tx.execute(
            "UPDATE jobs SET status = 'queued', secret_hash = ?2, extracted_text = NULL,
                result = NULL, error = NULL, current_span_id = NULL, updated_at = ?3
             WHERE id = ?1 AND status != 'running'",
            params![job_id, new_secret_hash, updated_at],
        )?;
        if affected == 0 {
            return Ok(false);
        }
        tx.execute(
            "UPDATE job_steps SET status = 'pending', started_at = NULL, ended_at = NULL,
                error = NULL, details = NULL
             WHERE job_id = ?1",
            params![job_id],
        )?;
        tx.commit()?;
        Ok(true)
    })
}
