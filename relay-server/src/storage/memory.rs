//! In-memory artifact store for tests and embedding.

use super::{validate_name, ArtifactStore};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

/// Keeps artifacts in a concurrent map. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    artifacts: DashMap<String, Bytes>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored artifacts.
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Whether nothing has been stored.
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Names of all stored artifacts, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.artifacts.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

#[async_trait]
impl ArtifactStore for MemoryStore {
    async fn write_artifact(&self, name: &str, contents: Bytes) -> Result<(), StorageError> {
        validate_name(name)?;
        self.artifacts.insert(name.to_string(), contents);
        Ok(())
    }

    async fn read_artifact(&self, name: &str) -> Result<Bytes, StorageError> {
        self.artifacts
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound {
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_then_read() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store
            .write_artifact("receive_a.txt", Bytes::from_static(b"abc"))
            .await
            .unwrap();
        store
            .write_artifact("receive_a.txt", Bytes::from_static(b"xyz"))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.names(), vec!["receive_a.txt".to_string()]);
        assert_eq!(
            store.read_artifact("receive_a.txt").await.unwrap(),
            Bytes::from_static(b"xyz")
        );
    }

    #[tokio::test]
    async fn unknown_name_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.read_artifact("nope").await,
            Err(StorageError::NotFound { .. })
        ));
    }
}
