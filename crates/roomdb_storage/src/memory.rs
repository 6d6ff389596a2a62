//! In-memory blob store for testing.

use crate::blob::BlobStore;
use crate::error::StorageResult;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// An in-memory blob store.
///
/// Clones share the same underlying map, so a test can hand one clone to
/// a database instance and inspect (or reuse) the other after the
/// instance closes, the shape of a browser profile surviving a page
/// reload.
#[derive(Debug, Clone, Default)]
pub struct MemoryBlobStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored blobs.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the store holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Returns the stored keys, unordered.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, bytes: &[u8]) -> StorageResult<()> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_reads_as_none() {
        let store = MemoryBlobStore::new();
        assert_eq!(store.get("mydb/db_blob").unwrap(), None);
    }

    #[test]
    fn put_get_overwrite() {
        let store = MemoryBlobStore::new();

        store.put("k", b"one").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"one".to_vec()));

        store.put("k", b"two").unwrap();
        assert_eq!(store.get("k").unwrap(), Some(b"two".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_removes() {
        let store = MemoryBlobStore::new();
        store.put("k", b"v").unwrap();
        store.delete("k").unwrap();
        assert!(store.is_empty());

        // Deleting a missing key is not an error.
        store.delete("k").unwrap();
    }

    #[test]
    fn clones_share_state() {
        let store = MemoryBlobStore::new();
        let view = store.clone();

        store.put("mydb/client_id", b"c1").unwrap();
        assert_eq!(view.get("mydb/client_id").unwrap(), Some(b"c1".to_vec()));
    }
}
