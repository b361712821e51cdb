//! In-memory index backend for development and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::artifact::ArtifactKey;

use super::{IndexError, IndexMetadata, IndexService, IngestCounts};

/// Rough chunk size used to report plausible counts.
const CHUNK_CHARS: usize = 1000;

#[derive(Default)]
pub struct InMemoryIndex {
    documents: Mutex<HashMap<ArtifactKey, String>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stored text for a key, if any.
    pub fn get(&self, key: &ArtifactKey) -> Option<String> {
        self.documents.lock().ok()?.get(key).cloned()
    }

    /// Pre-seeds a document (gate short-circuit tests).
    pub fn seed(&self, key: ArtifactKey, text: &str) {
        if let Ok(mut docs) = self.documents.lock() {
            docs.insert(key, text.to_string());
        }
    }
}

#[async_trait]
impl IndexService for InMemoryIndex {
    async fn upsert(
        &self,
        text: &str,
        _metadata: &IndexMetadata,
        key: &ArtifactKey,
    ) -> Result<IngestCounts, IndexError> {
        let chunks = (text.len().max(1) as u64).div_ceil(CHUNK_CHARS as u64);
        if let Ok(mut docs) = self.documents.lock() {
            docs.insert(key.clone(), text.to_string());
        }
        Ok(IngestCounts {
            upserted_chunks: chunks,
            upserted_documents: 1,
        })
    }

    async fn exists(&self, key: &ArtifactKey) -> Result<bool, IndexError> {
        Ok(self
            .documents
            .lock()
            .map(|d| d.contains_key(key))
            .unwrap_or(false))
    }
}
