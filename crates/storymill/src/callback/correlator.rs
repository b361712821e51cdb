//! Callback correlator: validates an inbound asynchronous delivery
//! against the per-job secret and maps it to the waiting job.
//!
//! Failure modes are deliberately fail-closed: an unknown job and a bad
//! token surface as distinct errors internally (for the HTTP layer to map
//! to 404/401), but neither response body reveals which check failed.

use serde::{Deserialize, Serialize};

use crate::error::CallbackError;
use crate::job::{Job, JobStatus, JobStore};
use crate::trace::{EventInput, TraceRecorder};

use super::secret::hash_token;

/// Token material from an inbound delivery. The token may arrive in the
/// body, a dedicated header, or as a bearer credential; any of the three
/// is accepted.
#[derive(Debug, Clone, Default)]
pub struct CallbackCredentials {
    pub body_token: Option<String>,
    pub header_token: Option<String>,
    pub bearer_token: Option<String>,
}

impl CallbackCredentials {
    /// First non-empty token, body first.
    pub fn token(&self) -> Option<&str> {
        [
            self.body_token.as_deref(),
            self.header_token.as_deref(),
            self.bearer_token.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|t| !t.is_empty())
    }
}

/// Extraction result data carried by the callback.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackData {
    #[serde(default)]
    pub extracted_text: Option<String>,
    #[serde(default)]
    pub images_archive_data: Option<String>,
    #[serde(default)]
    pub images_archive_filename: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Process reference reported by the extraction worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRef {
    pub id: String,
}

/// Wire payload of `POST /jobs/{job_id}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(rename = "jobId", default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub callback_token: Option<String>,
    #[serde(default)]
    pub process: Option<ProcessRef>,
    #[serde(default)]
    pub data: Option<CallbackData>,
}

/// A validated, correlated callback ready for orchestrator resumption.
#[derive(Debug)]
pub struct CallbackOutcome {
    pub job: Job,
    pub process_id: Option<String>,
}

/// Validates inbound callbacks and resolves them to their job.
#[derive(Clone)]
pub struct CallbackCorrelator {
    store: JobStore,
    recorder: TraceRecorder,
}

impl CallbackCorrelator {
    pub fn new(store: JobStore, recorder: TraceRecorder) -> Self {
        Self { store, recorder }
    }

    /// Correlates a delivery with its job.
    ///
    /// Order of checks matters: the job lookup fails closed before any
    /// token work, the token hash is compared against the persisted
    /// `secret_hash`, and only then is the job state inspected. A secret
    /// rotated by a requeue makes callbacks from the superseded attempt
    /// fail the hash comparison even though the `job_id` is still valid.
    pub fn correlate(
        &self,
        path_job_id: &str,
        credentials: &CallbackCredentials,
        payload: &CallbackPayload,
    ) -> Result<CallbackOutcome, CallbackError> {
        if let Some(body_job_id) = payload.job_id.as_deref() {
            if body_job_id != path_job_id {
                return Err(CallbackError::MissingField("jobId"));
            }
        }

        let token = credentials.token().ok_or(CallbackError::MissingField("callback_token"))?;

        let job = self
            .store
            .get(path_job_id)?
            .ok_or(CallbackError::UnknownJob)?;

        if hash_token(token) != job.secret_hash {
            log::warn!("Callback token mismatch for job {}", path_job_id);
            return Err(CallbackError::TokenMismatch);
        }

        // A terminal job (e.g. failed by the watchdog) no longer accepts
        // resumption; late deliveries are rejected after authentication so
        // the trace still records who knocked.
        if job.status.is_terminal() {
            self.recorder
                .add_event(
                    path_job_id,
                    EventInput::warn("callback_after_terminal").with_attributes(
                        serde_json::json!({ "status": job.status.as_str() }),
                    ),
                )
                .ok();
            return Err(CallbackError::NotAwaiting);
        }

        // Queued jobs that were dispatched out-of-band resume as running.
        if job.status == JobStatus::Queued {
            self.store
                .set_status_if(path_job_id, JobStatus::Queued, JobStatus::Running)?;
        }

        let process_id = payload.process.as_ref().map(|p| p.id.clone());
        self.recorder.add_event(
            path_job_id,
            EventInput::info("callback_received").with_attributes(serde_json::json!({
                "processId": process_id,
                "hasText": payload
                    .data
                    .as_ref()
                    .and_then(|d| d.extracted_text.as_ref())
                    .is_some(),
            })),
        )?;

        let job = self.store.get_required(path_job_id)?;
        Ok(CallbackOutcome { job, process_id })
    }
}
