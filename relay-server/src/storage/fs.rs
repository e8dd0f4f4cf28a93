//! Filesystem artifact store.

use super::{validate_name, ArtifactStore};
use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Stores artifacts as files in one directory.
///
/// The directory is created on the first write.
#[derive(Debug, Clone)]
pub struct FsStore {
    directory: PathBuf,
}

impl FsStore {
    /// Create a store rooted at `directory`.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// The directory artifacts are written to.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, StorageError> {
        validate_name(name)?;
        Ok(self.directory.join(name))
    }
}

#[async_trait]
impl ArtifactStore for FsStore {
    async fn write_artifact(&self, name: &str, contents: Bytes) -> Result<(), StorageError> {
        let path = self.path_for(name)?;

        tokio::fs::create_dir_all(&self.directory)
            .await
            .map_err(|source| StorageError::Io {
                path: self.directory.clone(),
                source,
            })?;

        tokio::fs::write(&path, &contents)
            .await
            .map_err(|source| StorageError::Io {
                path: path.clone(),
                source,
            })?;

        tracing::debug!("Wrote artifact {} ({} bytes)", path.display(), contents.len());
        Ok(())
    }

    async fn read_artifact(&self, name: &str) -> Result<Bytes, StorageError> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                name: name.to_string(),
            }),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn write_creates_directory_and_file() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path().join("received_files"));

        store
            .write_artifact("receive_a.txt", Bytes::from_static(b"hello"))
            .await
            .unwrap();

        let on_disk = std::fs::read(tmp.path().join("received_files/receive_a.txt")).unwrap();
        assert_eq!(on_disk, b"hello");
        assert_eq!(
            store.read_artifact("receive_a.txt").await.unwrap(),
            Bytes::from_static(b"hello")
        );
    }

    #[tokio::test]
    async fn later_write_overwrites() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());

        store
            .write_artifact("receive_a.txt", Bytes::from_static(b"first"))
            .await
            .unwrap();
        store
            .write_artifact("receive_a.txt", Bytes::from_static(b"second"))
            .await
            .unwrap();

        assert_eq!(
            store.read_artifact("receive_a.txt").await.unwrap(),
            Bytes::from_static(b"second")
        );
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path());
        assert!(matches!(
            store.read_artifact("receive_none.txt").await,
            Err(StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn names_with_separators_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = FsStore::new(tmp.path().join("store"));
        let err = store
            .write_artifact("../escape.txt", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidName { .. }));
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn unwritable_directory_is_io_error() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let store = FsStore::new(&blocker);
        let err = store
            .write_artifact("receive_a.txt", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Io { .. }));
    }
}
