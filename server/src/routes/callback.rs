//! Inbound extraction-worker callback route.

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;
use tracing::info;

use storymill::callback::{CallbackCredentials, CallbackPayload};
use storymill::pipeline::RunOutcome;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResponse {
    pub job_id: String,
    pub received: ReceivedEcho,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedEcho {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    pub has_text: bool,
    pub text_chars: usize,
    pub has_images: bool,
}

fn credentials_from(headers: &HeaderMap, payload: &CallbackPayload) -> CallbackCredentials {
    let header_token = headers
        .get("x-callback-token")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let bearer_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string);
    CallbackCredentials {
        body_token: payload.callback_token.clone(),
        header_token,
        bearer_token,
    }
}

/// `POST /jobs/{job_id}` — correlates the delivery to its waiting job and
/// resumes the pipeline. The response echoes what was received; pipeline
/// failures after a valid delivery are persisted on the job, not turned
/// into HTTP errors.
pub async fn receive_callback(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<CallbackPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let credentials = credentials_from(&headers, &payload);
    let outcome = state
        .correlator
        .correlate(&job_id, &credentials, &payload)?;

    let text_chars = payload
        .data
        .as_ref()
        .and_then(|d| d.extracted_text.as_deref())
        .map(|t| t.len())
        .unwrap_or(0);
    let has_images = payload
        .data
        .as_ref()
        .and_then(|d| d.images_archive_data.as_deref())
        .is_some();

    let run = state
        .orchestrator
        .resume_extraction(
            &job_id,
            payload.data.as_ref(),
            outcome.process_id.as_deref(),
        )
        .await?;
    info!(job_id = %job_id, outcome = ?run, "callback processed");

    if run == RunOutcome::Failed {
        // Still a 200: the delivery itself was valid; the failure is on
        // the job record where the operator will look for it.
        tracing::warn!(job_id = %job_id, "pipeline failed after callback");
    }

    Ok(Json(CallbackResponse {
        job_id,
        received: ReceivedEcho {
            process_id: outcome.process_id,
            has_text: text_chars > 0,
            text_chars,
            has_images,
        },
    }))
}
