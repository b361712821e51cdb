//! Service health route with queue depth counts.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub ok: bool,
    pub queue: QueueCounts,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let (queued, running, completed, failed) = state.store.counts()?;
    Ok(Json(HealthResponse {
        ok: true,
        queue: QueueCounts {
            queued,
            running,
            completed,
            failed,
        },
    }))
}
