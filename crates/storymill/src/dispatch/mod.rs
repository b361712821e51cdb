//! Outbound dispatch to the external extraction worker.
//!
//! Dispatch is fire-and-forget: the worker acknowledges receipt and the
//! job then waits for an out-of-band callback authenticated with the
//! per-job secret. This is the defining asynchronous boundary of the
//! pipeline.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::DispatchError;
use crate::job::types::ProcessingOptions;

/// Everything the extraction worker needs for one document.
#[derive(Debug)]
pub struct DispatchRequest {
    pub job_id: String,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub content: Vec<u8>,
    pub options: ProcessingOptions,
    /// Where the worker should POST its result.
    pub callback_url: String,
    /// Plaintext per-job secret; travels only on this request.
    pub callback_token: String,
}

/// Acknowledgment returned by the worker at dispatch time.
#[derive(Debug, Clone, Default)]
pub struct DispatchAck {
    pub process_id: Option<String>,
}

/// Extraction worker boundary.
#[async_trait]
pub trait ExtractionDispatcher: Send + Sync {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchAck, DispatchError>;
}

/// HTTP client for the extraction worker endpoint.
pub struct HttpExtractionClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

#[derive(Deserialize)]
struct AckResponse {
    #[serde(default)]
    process_id: Option<String>,
}

impl HttpExtractionClient {
    pub fn new(base_url: &str, bearer_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        }
    }
}

#[async_trait]
impl ExtractionDispatcher for HttpExtractionClient {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchAck, DispatchError> {
        let content = request.content;
        let mut file_part = reqwest::multipart::Part::bytes(content.clone())
            .file_name(request.file_name.clone());
        if let Some(mime) = &request.mime_type {
            match file_part.mime_str(mime) {
                Ok(part) => file_part = part,
                Err(_) => {
                    log::warn!(
                        "Invalid mime type '{}' on dispatch for job {}",
                        mime,
                        request.job_id
                    );
                    file_part = reqwest::multipart::Part::bytes(content)
                        .file_name(request.file_name.clone());
                }
            }
        }

        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("target_language", request.options.target_language.clone())
            .text(
                "extraction_method",
                request
                    .options
                    .extraction_method
                    .clone()
                    .unwrap_or_else(|| "auto".to_string()),
            )
            .text("useCache", request.options.use_cache.to_string())
            .text("includeImages", request.options.include_images.to_string())
            .text("callback_url", request.callback_url.clone())
            .text("callback_token", request.callback_token.clone());

        let mut builder = self
            .client
            .post(format!("{}/v1/extract", self.base_url))
            .multipart(form);
        if let Some(token) = &self.bearer_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let ack: AckResponse = response.json().await.unwrap_or(AckResponse {
            process_id: None,
        });
        Ok(DispatchAck {
            process_id: ack.process_id,
        })
    }
}
