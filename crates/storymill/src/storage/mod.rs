//! Blob storage provider boundary.
//!
//! The pipeline only ever talks to storage through this trait; the
//! filesystem implementation is the default backend, and tests swap in
//! the same implementation rooted at a temp directory.

pub mod filesystem;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use filesystem::FilesystemStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Item not found: {0}")]
    NotFound(String),

    #[error("Invalid item id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read item '{path}': {source}")]
    ReadItem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete item '{path}': {source}")]
    DeleteItem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A stored item: file or folder.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageItem {
    /// Opaque item id; for the filesystem backend this is the path
    /// relative to the storage root.
    pub id: String,
    /// Id of the containing folder ("" for the root).
    pub parent_id: String,
    pub name: String,
    pub is_folder: bool,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Result of an upload: the item plus whether an existing file with the
/// same name was overwritten in place.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub item: StorageItem,
    pub was_updated: bool,
}

/// Storage provider collaborator interface.
pub trait StorageProvider: Send + Sync {
    /// Metadata of an item by id.
    fn get_item(&self, item_id: &str) -> Result<Option<StorageItem>, StorageError>;

    /// Children of a folder.
    fn list_children(&self, parent_id: &str) -> Result<Vec<StorageItem>, StorageError>;

    /// Raw bytes of a file item.
    fn get_binary(&self, item_id: &str) -> Result<Vec<u8>, StorageError>;

    /// Uploads a file into a folder. A file with the same name in the same
    /// folder is overwritten in place, preserving its identity; the
    /// outcome reports whether that happened.
    fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
    ) -> Result<UploadOutcome, StorageError>;

    /// Creates (or returns an existing) sub-folder.
    fn create_folder(&self, parent_id: &str, name: &str) -> Result<StorageItem, StorageError>;

    /// Deletes an item.
    fn delete_item(&self, item_id: &str) -> Result<(), StorageError>;
}
