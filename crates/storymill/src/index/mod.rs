//! Retrieval-index collaborator boundary. The ingest phase hands the
//! resolved text plus metadata to this service; what happens inside
//! (chunking, embedding, nearest-neighbor search) is outside this crate.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::ArtifactKey;

pub use http::HttpIndexService;
pub use memory::InMemoryIndex;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Index service request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Index service rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Document metadata attached to ingested text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexMetadata {
    pub job_id: String,
    pub source_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
}

/// Counts reported back by the index after an upsert.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestCounts {
    pub upserted_chunks: u64,
    pub upserted_documents: u64,
}

/// Index/ingestion service interface.
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Upserts a document; re-ingestion under the same key replaces the
    /// previous chunks rather than accumulating.
    async fn upsert(
        &self,
        text: &str,
        metadata: &IndexMetadata,
        key: &ArtifactKey,
    ) -> Result<IngestCounts, IndexError>;

    /// Whether a document for this key is already present. Used by the
    /// ingest gate; must reflect actual content presence.
    async fn exists(&self, key: &ArtifactKey) -> Result<bool, IndexError>;
}
