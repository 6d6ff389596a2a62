//! File-based blob store for persistent storage.

use crate::blob::BlobStore;
use crate::error::{StorageError, StorageResult};
use std::path::{Path, PathBuf};

/// A filesystem blob store.
///
/// Each key maps to a file under the root directory; `/` separators in
/// keys become subdirectories. Writes go through a sibling temp file and
/// rename, so a reader never observes a half-written blob.
#[derive(Debug)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Opens a store rooted at the given directory, creating it if needed.
    pub fn open(root: &Path) -> StorageResult<Self> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Returns the root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() {
            return Err(StorageError::invalid_key(key));
        }

        let mut path = self.root.clone();
        for component in key.split('/') {
            if component.is_empty()
                || component == "."
                || component == ".."
                || component.contains(std::path::is_separator)
            {
                return Err(StorageError::invalid_key(key));
            }
            path.push(component);
        }
        Ok(path)
    }
}

impl BlobStore for FileBlobStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
