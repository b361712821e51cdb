//! Deterministic artifact naming and location.
//!
//! The canonical name is a pure function of the artifact key and the
//! source's base name; the canonical location is either a dedicated
//! shadow sub-folder next to the source (`.{base}/`) or a sibling file.
//! This determinism is what lets the gate checker and the ingest phase
//! always find "the" artifact for a source without search heuristics.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::job::types::SourceRef;
use crate::storage::{StorageError, StorageItem, StorageProvider};

/// What kind of derived document an artifact is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Transcript,
    Transformation,
}

/// Where an artifact lives relative to its source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactLocation {
    DotFolder,
    Sibling,
}

/// Identity of one artifact: at most one live file exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactKey {
    pub source_id: String,
    pub kind: ArtifactKind,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl ArtifactKey {
    pub fn transcript(source_id: &str, language: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind: ArtifactKind::Transcript,
            language: language.to_string(),
            template: None,
        }
    }

    pub fn transformation(source_id: &str, language: &str, template: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            kind: ArtifactKind::Transformation,
            language: language.to_string(),
            template: Some(template.to_string()),
        }
    }

    /// Canonical file name: `{base}.{language}.md` for transcripts,
    /// `{base}.{template}.{language}.md` for transformations.
    pub fn file_name(&self, base: &str) -> String {
        match self.kind {
            ArtifactKind::Transcript => format!("{}.{}.md", base, self.language),
            ArtifactKind::Transformation => format!(
                "{}.{}.{}.md",
                base,
                self.template.as_deref().unwrap_or("default"),
                self.language
            ),
        }
    }

    /// Name of the shadow sub-folder next to the source.
    pub fn shadow_folder_name(base: &str) -> String {
        format!(".{}", base)
    }
}

/// Locates artifacts through the storage provider.
#[derive(Clone)]
pub struct ArtifactResolver {
    storage: Arc<dyn StorageProvider>,
}

impl ArtifactResolver {
    pub fn new(storage: Arc<dyn StorageProvider>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    /// The shadow folder of a source, if it exists.
    pub fn shadow_folder(&self, source: &SourceRef) -> Result<Option<StorageItem>, StorageError> {
        let wanted = ArtifactKey::shadow_folder_name(source.base_name());
        let children = self.storage.list_children(&source.parent_id)?;
        Ok(children
            .into_iter()
            .find(|item| item.is_folder && item.name == wanted))
    }

    /// Finds the live artifact for a key, dot folder first. Returns the
    /// item and where it was found.
    pub fn find(
        &self,
        key: &ArtifactKey,
        source: &SourceRef,
    ) -> Result<Option<(StorageItem, ArtifactLocation)>, StorageError> {
        let name = key.file_name(source.base_name());

        if let Some(folder) = self.shadow_folder(source)? {
            let children = self.storage.list_children(&folder.id)?;
            if let Some(item) = children.into_iter().find(|i| !i.is_folder && i.name == name) {
                return Ok(Some((item, ArtifactLocation::DotFolder)));
            }
        }

        let siblings = self.storage.list_children(&source.parent_id)?;
        if let Some(item) = siblings.into_iter().find(|i| !i.is_folder && i.name == name) {
            return Ok(Some((item, ArtifactLocation::Sibling)));
        }

        Ok(None)
    }
}
