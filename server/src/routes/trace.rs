//! Read-only trace query route.

use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;

use storymill::trace::{analyze_gaps, Event, Gap, Span};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceResponse {
    pub job_id: String,
    pub spans: Vec<Span>,
    pub events: Vec<Event>,
    pub analysis: TraceAnalysis,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceAnalysis {
    pub gaps: Vec<Gap>,
}

/// `GET /jobs/{job_id}/trace`.
pub async fn get_trace(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<TraceResponse>, ApiError> {
    if state.store.get(&job_id)?.is_none() {
        return Err(ApiError::not_found());
    }

    let view = state.recorder.trace_view(&job_id)?;
    let gaps = analyze_gaps(&view.spans);
    Ok(Json(TraceResponse {
        job_id: view.job_id,
        spans: view.spans,
        events: view.events,
        analysis: TraceAnalysis { gaps },
    }))
}
