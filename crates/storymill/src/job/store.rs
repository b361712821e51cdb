//! Job store facade: typed access to the persisted job aggregate.
//!
//! The store is the sole source of truth for job state. All mutations are
//! targeted, status-guarded updates so concurrent workers coordinate
//! entirely through the database, never through in-memory locks.

use chrono::{DateTime, Utc};

use crate::callback::CallbackSecret;
use crate::db::job_repo::{self, JobFilter, JobRow, StepRow};
use crate::db::{Database, DatabaseError};
use crate::error::Result as CrateResult;

use super::types::{
    Correlation, Job, JobParameters, JobResultSummary, JobStatus, Phase, Step, StepStatus,
    StepTransition,
};

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

/// Outcome of a step status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepUpdate {
    /// The transition was applied.
    Applied,
    /// Same terminal status repeated; nothing changed.
    Idempotent,
}

/// Persistent job store backed by rusqlite. Cloning is cheap (the inner
/// `Database` is `Arc`-based).
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates a new queued job with one pending step per phase and a
    /// freshly generated callback secret. Only the secret's hash is
    /// persisted; the plaintext is returned for the dispatch path.
    pub fn create(
        &self,
        correlation: &Correlation,
        parameters: &JobParameters,
    ) -> CrateResult<(Job, CallbackSecret)> {
        let secret = CallbackSecret::generate()?;
        let now = now_str();
        let row = JobRow {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Queued.as_str().to_string(),
            correlation: serde_json::to_string(correlation)
                .map_err(|e| DatabaseError::CorruptRow {
                    entity: "job",
                    id: "new".to_string(),
                    reason: e.to_string(),
                })?,
            parameters: serde_json::to_string(parameters)
                .map_err(|e| DatabaseError::CorruptRow {
                    entity: "job",
                    id: "new".to_string(),
                    reason: e.to_string(),
                })?,
            secret_hash: secret.hash(),
            extracted_text: None,
            current_span_id: None,
            result: None,
            error: None,
            created_at: now.clone(),
            updated_at: now,
        };

        let phases: Vec<&str> = Phase::ALL.iter().map(|p| p.as_str()).collect();
        job_repo::insert(&self.db, &row, &phases)?;

        let job = self.get_required(&row.id)?;
        Ok((job, secret))
    }

    /// Loads a job with its steps.
    pub fn get(&self, job_id: &str) -> Result<Option<Job>, DatabaseError> {
        let Some(row) = job_repo::find_by_id(&self.db, job_id)? else {
            return Ok(None);
        };
        let steps = job_repo::steps_for_job(&self.db, job_id)?;
        Ok(Some(assemble(row, steps)?))
    }

    pub fn get_required(&self, job_id: &str) -> Result<Job, DatabaseError> {
        self.get(job_id)?
            .ok_or_else(|| DatabaseError::JobNotFound(job_id.to_string()))
    }

    /// Lists jobs with filters, returning (jobs, total).
    pub fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64), DatabaseError> {
        let (rows, total) = job_repo::query(&self.db, filter)?;
        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let steps = job_repo::steps_for_job(&self.db, &row.id)?;
            jobs.push(assemble(row, steps)?);
        }
        Ok((jobs, total))
    }

    /// Counts by status: (queued, running, completed, failed).
    pub fn counts(&self) -> Result<(u64, u64, u64, u64), DatabaseError> {
        Ok((
            job_repo::count_by_status(&self.db, "queued")?,
            job_repo::count_by_status(&self.db, "running")?,
            job_repo::count_by_status(&self.db, "completed")?,
            job_repo::count_by_status(&self.db, "failed")?,
        ))
    }

    /// Unconditional status update.
    pub fn set_status(&self, job_id: &str, status: JobStatus) -> Result<(), DatabaseError> {
        job_repo::update_status(&self.db, job_id, status.as_str(), &now_str())
    }

    /// Guarded status transition; returns whether the guard matched.
    pub fn set_status_if(
        &self,
        job_id: &str,
        expected: JobStatus,
        status: JobStatus,
    ) -> Result<bool, DatabaseError> {
        job_repo::update_status_if(
            &self.db,
            job_id,
            expected.as_str(),
            status.as_str(),
            &now_str(),
        )
    }

    /// Claims the oldest queued job via read-then-guarded-write. Losing a
    /// claim race is a normal concurrency outcome: the next candidate is
    /// tried until the window is exhausted.
    pub fn claim_next(&self) -> Result<Option<Job>, DatabaseError> {
        let candidates = job_repo::queued_candidates(&self.db, 16)?;
        for id in candidates {
            if job_repo::try_claim(&self.db, &id, &now_str())? {
                return Ok(Some(self.get_required(&id)?));
            }
            log::info!("Job {} claimed by another worker, trying next candidate", id);
        }
        Ok(None)
    }

    /// Applies a step status transition, enforcing the step state machine.
    /// Repeating the same terminal status is a tolerated no-op so retried
    /// deliveries can't corrupt history.
    pub fn update_step(
        &self,
        job_id: &str,
        phase: Phase,
        to: StepStatus,
        error: Option<&str>,
        details: Option<&serde_json::Value>,
    ) -> Result<StepUpdate, DatabaseError> {
        let current = job_repo::find_step(&self.db, job_id, phase.as_str())?
            .ok_or_else(|| DatabaseError::JobNotFound(job_id.to_string()))?;
        let from = StepStatus::parse(&current.status).ok_or_else(|| {
            DatabaseError::CorruptRow {
                entity: "job_step",
                id: format!("{}/{}", job_id, phase),
                reason: format!("unknown status '{}'", current.status),
            }
        })?;

        match StepStatus::check_transition(from, to) {
            StepTransition::Idempotent => return Ok(StepUpdate::Idempotent),
            StepTransition::Rejected => {
                return Err(DatabaseError::IllegalTransition {
                    job_id: job_id.to_string(),
                    phase: phase.as_str().to_string(),
                    from: from.as_str().to_string(),
                    to: to.as_str().to_string(),
                })
            }
            StepTransition::Allowed => {}
        }

        let now = now_str();
        let started_at = if to == StepStatus::Running || from == StepStatus::Pending {
            Some(now.as_str())
        } else {
            None
        };
        let ended_at = if to.is_terminal() {
            Some(now.as_str())
        } else {
            None
        };
        let details_json = details.map(|d| d.to_string());

        job_repo::update_step(
            &self.db,
            job_id,
            phase.as_str(),
            to.as_str(),
            started_at,
            ended_at,
            error,
            details_json.as_deref(),
        )?;
        job_repo::touch(&self.db, job_id, &now)?;
        Ok(StepUpdate::Applied)
    }

    pub fn set_extracted_text(&self, job_id: &str, text: &str) -> Result<(), DatabaseError> {
        job_repo::set_extracted_text(&self.db, job_id, text, &now_str())
    }

    pub fn set_result(
        &self,
        job_id: &str,
        result: &JobResultSummary,
    ) -> Result<(), DatabaseError> {
        let json = serde_json::to_string(result).map_err(|e| DatabaseError::CorruptRow {
            entity: "job",
            id: job_id.to_string(),
            reason: e.to_string(),
        })?;
        job_repo::set_result(&self.db, job_id, &json, &now_str())
    }

    pub fn set_error(&self, job_id: &str, error: &str) -> Result<(), DatabaseError> {
        job_repo::set_error(&self.db, job_id, error, &now_str())
    }

    /// Fails a step only if it is still running (watchdog path). Returns
    /// whether the guard matched.
    pub fn fail_step_if_running(
        &self,
        job_id: &str,
        phase: Phase,
        error: &str,
        details: &serde_json::Value,
    ) -> Result<bool, DatabaseError> {
        job_repo::fail_step_if_running(
            &self.db,
            job_id,
            phase.as_str(),
            error,
            &details.to_string(),
            &now_str(),
        )
    }

    /// Rotates the callback secret and returns the new plaintext. Called
    /// by the dispatching process right before the outbound request, so
    /// the plaintext only ever exists in the process that needs it and
    /// exactly one secret is valid per attempt.
    pub fn rotate_secret(&self, job_id: &str) -> CrateResult<CallbackSecret> {
        let secret = CallbackSecret::generate()?;
        job_repo::set_secret_hash(&self.db, job_id, &secret.hash(), &now_str())?;
        Ok(secret)
    }

    /// In-place requeue of a terminal or stalled job: steps reset to
    /// pending, status back to queued, secret rotated. The same `job_id`
    /// is kept — this is a retry of the job, not a new job. Refused while
    /// an attempt is in flight.
    pub fn requeue(&self, job_id: &str) -> CrateResult<CallbackSecret> {
        let job = self.get(job_id)?;
        let Some(job) = job else {
            return Err(DatabaseError::JobNotFound(job_id.to_string()).into());
        };
        if job.status == JobStatus::Running {
            return Err(DatabaseError::RequeueWhileRunning(job_id.to_string()).into());
        }

        let secret = CallbackSecret::generate()?;
        let reset = job_repo::requeue(&self.db, job_id, &secret.hash(), &now_str())?;
        if !reset {
            // Raced with a claim between the read and the guarded write.
            return Err(DatabaseError::RequeueWhileRunning(job_id.to_string()).into());
        }
        Ok(secret)
    }
}

fn assemble(row: JobRow, step_rows: Vec<StepRow>) -> Result<Job, DatabaseError> {
    let correlation: Correlation =
        serde_json::from_str(&row.correlation).map_err(|e| DatabaseError::CorruptRow {
            entity: "job",
            id: row.id.clone(),
            reason: format!("correlation: {}", e),
        })?;
    let parameters: JobParameters =
        serde_json::from_str(&row.parameters).map_err(|e| DatabaseError::CorruptRow {
            entity: "job",
            id: row.id.clone(),
            reason: format!("parameters: {}", e),
        })?;
    let status = JobStatus::parse(&row.status).ok_or_else(|| DatabaseError::CorruptRow {
        entity: "job",
        id: row.id.clone(),
        reason: format!("unknown status '{}'", row.status),
    })?;
    let result: Option<JobResultSummary> = row
        .result
        .as_deref()
        .and_then(|r| serde_json::from_str(r).ok());

    let mut steps = Vec::with_capacity(step_rows.len());
    for step in step_rows {
        let Some(phase) = Phase::parse(&step.phase) else {
            log::warn!("Job {} has step with unknown phase '{}'", row.id, step.phase);
            continue;
        };
        let step_status =
            StepStatus::parse(&step.status).ok_or_else(|| DatabaseError::CorruptRow {
                entity: "job_step",
                id: format!("{}/{}", row.id, step.phase),
                reason: format!("unknown status '{}'", step.status),
            })?;
        steps.push(Step {
            phase,
            status: step_status,
            started_at: step.started_at.as_deref().map(parse_timestamp),
            ended_at: step.ended_at.as_deref().map(parse_timestamp),
            error: step.error,
            details: step
                .details
                .as_deref()
                .and_then(|d| serde_json::from_str(d).ok()),
        });
    }

    Ok(Job {
        job_id: row.id,
        status,
        steps,
        correlation,
        parameters,
        secret_hash: row.secret_hash,
        extracted_text: row.extracted_text,
        result,
        error: row.error,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::types::{ProcessingOptions, SourceRef};

    fn test_store() -> JobStore {
        JobStore::new(Database::open_in_memory().unwrap())
    }

    fn sample_correlation(name: &str) -> Correlation {
        Correlation {
            source: SourceRef::new("item-1", "folder-1", name),
            options: ProcessingOptions::default(),
            batch_id: None,
            batch_name: None,
        }
    }

    #[test]
    fn test_create_and_get() {
        let store = test_store();
        let (job, secret) = store
            .create(&sample_correlation("report.pdf"), &JobParameters::default())
            .unwrap();

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.steps.len(), 4);
        assert_eq!(job.steps[0].phase, Phase::Extract);
        assert_eq!(job.secret_hash, secret.hash());
        assert_eq!(job.correlation.source.name, "report.pdf");

        let loaded = store.get(&job.job_id).unwrap().unwrap();
        assert_eq!(loaded.job_id, job.job_id);
    }

    #[test]
    fn test_claim_next_only_once() {
        let store = test_store();
        let (job, _) = store
            .create(&sample_correlation("a.pdf"), &JobParameters::default())
            .unwrap();

        let claimed = store.claim_next().unwrap().unwrap();
        assert_eq!(claimed.job_id, job.job_id);
        assert_eq!(claimed.status, JobStatus::Running);

        assert!(store.claim_next().unwrap().is_none());
    }

    #[test]
    fn test_step_update_and_idempotency() {
        let store = test_store();
        let (job, _) = store
            .create(&sample_correlation("a.pdf"), &JobParameters::default())
            .unwrap();

        let update = store
            .update_step(&job.job_id, Phase::Extract, StepStatus::Running, None, None)
            .unwrap();
        assert_eq!(update, StepUpdate::Applied);

        store
            .update_step(&job.job_id, Phase::Extract, StepStatus::Completed, None, None)
            .unwrap();

        // Repeating the terminal status is a tolerated no-op.
        let repeat = store
            .update_step(&job.job_id, Phase::Extract, StepStatus::Completed, None, None)
            .unwrap();
        assert_eq!(repeat, StepUpdate::Idempotent);

        // Moving a terminal step elsewhere is rejected.
        let err = store
            .update_step(&job.job_id, Phase::Extract, StepStatus::Failed, None, None)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::IllegalTransition { .. }));
    }

    #[test]
    fn test_step_skip_from_pending_records_details() {
        let store = test_store();
        let (job, _) = store
            .create(&sample_correlation("a.pdf"), &JobParameters::default())
            .unwrap();

        let details = Step::skipped_details("policy_skip");
        store
            .update_step(
                &job.job_id,
                Phase::Extract,
                StepStatus::Completed,
                None,
                Some(&details),
            )
            .unwrap();

        let loaded = store.get_required(&job.job_id).unwrap();
        let step = loaded.step(Phase::Extract).unwrap();
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.details.as_ref().unwrap()["reason"], "policy_skip");
    }

    #[test]
    fn test_requeue_rotates_secret_and_keeps_id() {
        let store = test_store();
        let (job, original_secret) = store
            .create(&sample_correlation("a.pdf"), &JobParameters::default())
            .unwrap();
        store.set_status(&job.job_id, JobStatus::Failed).unwrap();

        let new_secret = store.requeue(&job.job_id).unwrap();
        assert_ne!(new_secret.hash(), original_secret.hash());

        let loaded = store.get_required(&job.job_id).unwrap();
        assert_eq!(loaded.job_id, job.job_id);
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.secret_hash, new_secret.hash());
        assert!(loaded
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Pending));
    }

    #[test]
    fn test_requeue_refused_while_running() {
        let store = test_store();
        let (job, _) = store
            .create(&sample_correlation("a.pdf"), &JobParameters::default())
            .unwrap();
        store.claim_next().unwrap();

        let err = store.requeue(&job.job_id).unwrap_err();
        assert!(err.to_string().contains("requeue refused"));
    }

    #[test]
    fn test_get_missing_job() {
        let store = test_store();
        assert!(store.get("missing").unwrap().is_none());
        assert!(matches!(
            store.get_required("missing").unwrap_err(),
            DatabaseError::JobNotFound(_)
        ));
    }
}
