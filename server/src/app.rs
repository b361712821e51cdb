//! Router assembly.

use axum::routing::{get, post};
use axum::Router;

use crate::routes::{callback, health, jobs, trace};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/jobs", post(jobs::create_job).get(jobs::list_jobs))
        .route("/jobs/:job_id", post(callback::receive_callback).get(jobs::get_job))
        .route("/jobs/:job_id/start", post(jobs::start_job))
        .route("/jobs/:job_id/retry", post(jobs::retry_job))
        .route("/jobs/:job_id/trace", get(trace::get_trace))
        .with_state(state)
}
