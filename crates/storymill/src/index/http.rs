//! HTTP client for the external index/ingestion service.

use async_trait::async_trait;
use serde::Deserialize;

use crate::artifact::ArtifactKey;

use super::{IndexError, IndexMetadata, IndexService, IngestCounts};

pub struct HttpIndexService {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

#[derive(Deserialize)]
struct UpsertResponse {
    #[serde(default)]
    upserted_chunks: u64,
    #[serde(default)]
    upserted_documents: u64,
}

#[derive(Deserialize)]
struct ExistsResponse {
    #[serde(default)]
    exists: bool,
}

impl HttpIndexService {
    pub fn new(base_url: &str, bearer_token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token,
        }
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl IndexService for HttpIndexService {
    async fn upsert(
        &self,
        text: &str,
        metadata: &IndexMetadata,
        key: &ArtifactKey,
    ) -> Result<IngestCounts, IndexError> {
        let body = serde_json::json!({
            "text": text,
            "metadata": metadata,
            "key": key,
        });

        let response = self
            .authorized(self.client.post(format!("{}/v1/documents", self.base_url)))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UpsertResponse = response.json().await?;
        Ok(IngestCounts {
            upserted_chunks: parsed.upserted_chunks,
            upserted_documents: parsed.upserted_documents,
        })
    }

    async fn exists(&self, key: &ArtifactKey) -> Result<bool, IndexError> {
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/v1/documents/exists", self.base_url)),
            )
            .query(&[
                ("sourceId", key.source_id.as_str()),
                ("language", key.language.as_str()),
                ("template", key.template.as_deref().unwrap_or("")),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ExistsResponse = response.json().await?;
        Ok(parsed.exists)
    }
}
