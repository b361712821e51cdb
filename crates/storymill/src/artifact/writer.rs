//! Artifact writer with dedup-on-write semantics.
//!
//! A re-write with the same key overwrites the existing file in place —
//! location and identity preserved — rather than creating a duplicate.

use serde::Serialize;

use crate::job::types::SourceRef;
use crate::storage::StorageError;

use super::resolver::{ArtifactKey, ArtifactLocation, ArtifactResolver};

/// Result of writing one artifact.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactWrite {
    pub item_id: String,
    pub location: ArtifactLocation,
    pub was_updated: bool,
}

#[derive(Clone)]
pub struct ArtifactWriter {
    resolver: ArtifactResolver,
}

impl ArtifactWriter {
    pub fn new(resolver: ArtifactResolver) -> Self {
        Self { resolver }
    }

    /// Writes the artifact for a key.
    ///
    /// If a file with the canonical name already exists at either
    /// canonical location, it is overwritten where it lives. Otherwise
    /// the preferred location is chosen by `create_folder`: the shadow
    /// sub-folder next to the source, or a sibling file.
    pub fn write(
        &self,
        key: &ArtifactKey,
        source: &SourceRef,
        content: &[u8],
        create_folder: bool,
    ) -> Result<ArtifactWrite, StorageError> {
        let storage = self.resolver.storage();
        let name = key.file_name(source.base_name());

        if let Some((existing, location)) = self.resolver.find(key, source)? {
            let outcome = storage.upload_file(&existing.parent_id, &name, content)?;
            return Ok(ArtifactWrite {
                item_id: outcome.item.id,
                location,
                was_updated: outcome.was_updated,
            });
        }

        let (parent_id, location) = if create_folder {
            let folder = storage.create_folder(
                &source.parent_id,
                &ArtifactKey::shadow_folder_name(source.base_name()),
            )?;
            (folder.id, ArtifactLocation::DotFolder)
        } else {
            (source.parent_id.clone(), ArtifactLocation::Sibling)
        };

        let outcome = storage.upload_file(&parent_id, &name, content)?;
        Ok(ArtifactWrite {
            item_id: outcome.item.id,
            location,
            was_updated: outcome.was_updated,
        })
    }
}
