//! Job lifecycle routes: create, query, start, retry.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use storymill::db::job_repo::JobFilter;
use storymill::job::{Correlation, Job, JobParameters};
use storymill::pipeline::RunOutcome;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub correlation: Correlation,
    #[serde(default)]
    pub parameters: Option<JobParameters>,
    /// Start processing immediately instead of waiting for a poller.
    #[serde(default)]
    pub start: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job: Job,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<&'static str>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQueryParams {
    pub status: Option<String>,
    pub batch_id: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobListResponse {
    pub jobs: Vec<Job>,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub job_id: String,
    pub outcome: &'static str,
}

fn outcome_str(outcome: RunOutcome) -> &'static str {
    match outcome {
        RunOutcome::AwaitingCallback => "awaiting-callback",
        RunOutcome::PendingStorage => "pending-storage",
        RunOutcome::Completed => "completed",
        RunOutcome::Failed => "failed",
    }
}

/// `POST /jobs` — create a job. The correlation's source must name a
/// real item; nothing is validated against storage until dispatch.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.correlation.source.item_id.trim().is_empty() {
        return Err(ApiError::bad_request("correlation.source.itemId is required"));
    }
    if request.correlation.source.name.trim().is_empty() {
        return Err(ApiError::bad_request("correlation.source.name is required"));
    }

    let parameters = request.parameters.unwrap_or_default();
    let (job, _secret) = state.store.create(&request.correlation, &parameters)?;
    info!(job_id = %job.job_id, source = %job.correlation.source.name, "job created");

    let mut outcome = None;
    if request.start {
        outcome = Some(outcome_str(state.orchestrator.start(&job.job_id).await?));
    }

    let job = state.store.get_required(&job.job_id)?;
    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse { job, outcome }),
    ))
}

/// `GET /jobs` — list with filters and pagination.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<JobQueryParams>,
) -> Result<Json<JobListResponse>, ApiError> {
    let filter = JobFilter {
        status: params.status,
        batch_id: params.batch_id,
        limit: params.limit,
        offset: params.offset,
    };
    let (jobs, total) = state.store.list(&filter)?;
    Ok(Json(JobListResponse {
        jobs,
        total,
        limit: params.limit,
        offset: params.offset,
    }))
}

/// `GET /jobs/{job_id}`.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    match state.store.get(&job_id)? {
        Some(job) => Ok(Json(job)),
        None => Err(ApiError::not_found()),
    }
}

/// `POST /jobs/{job_id}/start` — idempotent re-entry point; refuses to
/// re-dispatch when a prior dispatch acknowledgment is in the trace.
pub async fn start_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    let outcome = state.orchestrator.start(&job_id).await?;
    Ok(Json(RunResponse {
        job_id,
        outcome: outcome_str(outcome),
    }))
}

/// `POST /jobs/{job_id}/retry` — in-place requeue with a rotated secret,
/// then re-dispatch. Refused while an attempt is in flight.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<RunResponse>, ApiError> {
    state.store.requeue(&job_id)?;
    state.recorder.add_event(
        &job_id,
        storymill::trace::EventInput::info("job_requeued"),
    )?;
    info!(job_id = %job_id, "job requeued");

    let outcome = state.orchestrator.start(&job_id).await?;
    Ok(Json(RunResponse {
        job_id,
        outcome: outcome_str(outcome),
    }))
}
