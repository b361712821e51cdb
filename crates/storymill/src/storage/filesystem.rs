//! Filesystem storage backend. Item ids are paths relative to the
//! storage root; the empty id is the root folder itself.

use std::path::{Path, PathBuf};

use super::{StorageError, StorageItem, StorageProvider, UploadOutcome};

pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves an item id to an absolute path, rejecting traversal.
    fn resolve(&self, item_id: &str) -> Result<PathBuf, StorageError> {
        if item_id.split('/').any(|seg| seg == "..") {
            return Err(StorageError::InvalidId {
                id: item_id.to_string(),
                reason: "path traversal".to_string(),
            });
        }
        if Path::new(item_id).is_absolute() {
            return Err(StorageError::InvalidId {
                id: item_id.to_string(),
                reason: "absolute path".to_string(),
            });
        }
        Ok(self.root.join(item_id))
    }

    fn item_from_path(&self, id: &str, path: &Path) -> Result<StorageItem, StorageError> {
        let meta = std::fs::symlink_metadata(path).map_err(|e| StorageError::ReadItem {
            path: path.to_path_buf(),
            source: e,
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let parent_id = match id.rfind('/') {
            Some(pos) => id[..pos].to_string(),
            None => String::new(),
        };
        let mime_type = if meta.is_dir() {
            None
        } else {
            mime_guess::from_path(path).first().map(|m| m.to_string())
        };
        Ok(StorageItem {
            id: id.to_string(),
            parent_id,
            name,
            is_folder: meta.is_dir(),
            size: if meta.is_dir() { 0 } else { meta.len() },
            mime_type,
        })
    }

    fn child_id(parent_id: &str, name: &str) -> String {
        if parent_id.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent_id, name)
        }
    }
}

impl StorageProvider for FilesystemStorage {
    fn get_item(&self, item_id: &str) -> Result<Option<StorageItem>, StorageError> {
        let path = self.resolve(item_id)?;
        if std::fs::symlink_metadata(&path).is_err() {
            return Ok(None);
        }
        Ok(Some(self.item_from_path(item_id, &path)?))
    }

    fn list_children(&self, parent_id: &str) -> Result<Vec<StorageItem>, StorageError> {
        let path = self.resolve(parent_id)?;
        let entries = std::fs::read_dir(&path).map_err(|e| StorageError::ReadItem {
            path: path.clone(),
            source: e,
        })?;

        let mut items = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::ReadItem {
                path: path.clone(),
                source: e,
            })?;
            let name = entry.file_name().to_string_lossy().to_string();
            let id = Self::child_id(parent_id, &name);
            items.push(self.item_from_path(&id, &entry.path())?);
        }
        items.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(items)
    }

    fn get_binary(&self, item_id: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.resolve(item_id)?;
        if !path.exists() {
            return Err(StorageError::NotFound(item_id.to_string()));
        }
        std::fs::read(&path).map_err(|e| StorageError::ReadItem { path, source: e })
    }

    fn upload_file(
        &self,
        parent_id: &str,
        name: &str,
        content: &[u8],
    ) -> Result<UploadOutcome, StorageError> {
        let dir = self.resolve(parent_id)?;
        if !dir.exists() {
            std::fs::create_dir_all(&dir).map_err(|e| StorageError::CreateDirectory {
                path: dir.clone(),
                source: e,
            })?;
        }

        let id = Self::child_id(parent_id, name);
        let path = self.resolve(&id)?;
        let was_updated = std::fs::symlink_metadata(&path).is_ok();

        // Write-then-rename so a concurrent reader never observes a
        // half-written artifact.
        let tmp = path.with_extension("part");
        std::fs::write(&tmp, content).map_err(|e| StorageError::WriteFile {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| StorageError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        Ok(UploadOutcome {
            item: self.item_from_path(&id, &path)?,
            was_updated,
        })
    }

    fn create_folder(&self, parent_id: &str, name: &str) -> Result<StorageItem, StorageError> {
        let id = Self::child_id(parent_id, name);
        let path = self.resolve(&id)?;
        if !path.exists() {
            std::fs::create_dir_all(&path).map_err(|e| StorageError::CreateDirectory {
                path: path.clone(),
                source: e,
            })?;
        }
        self.item_from_path(&id, &path)
    }

    fn delete_item(&self, item_id: &str) -> Result<(), StorageError> {
        let path = self.resolve(item_id)?;
        let meta = std::fs::symlink_metadata(&path)
            .map_err(|_| StorageError::NotFound(item_id.to_string()))?;
        let result = if meta.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| StorageError::DeleteItem { path, source: e })
    }
}
