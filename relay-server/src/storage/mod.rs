//! Artifact storage for relay-server.
//!
//! Broadcast `FILE` uploads are written as named artifacts. Writes overwrite
//! any earlier artifact of the same name and are not transactional.

mod fs;
mod memory;

pub use fs::FsStore;
pub use memory::MemoryStore;

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

/// Trait for artifact storage backends.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Write an artifact, replacing any existing one with the same name.
    async fn write_artifact(&self, name: &str, contents: Bytes) -> Result<(), StorageError>;

    /// Read an artifact back.
    ///
    /// Returns `StorageError::NotFound` if nothing was written under `name`.
    async fn read_artifact(&self, name: &str) -> Result<Bytes, StorageError>;
}

/// Derive the stored name for an uploaded file: `<prefix>_<basename>`.
///
/// Only the final path component of `filename` is kept, with both `/` and
/// `\` treated as separators. Names that reduce to nothing, `.` or `..` are
/// rejected.
pub fn artifact_name(prefix: &str, filename: &str) -> Result<String, StorageError> {
    relay_types::filename::prefixed_name(prefix, filename).ok_or_else(|| {
        StorageError::InvalidName {
            name: filename.to_string(),
        }
    })
}

/// Check that `name` is a single plain path component.
fn validate_name(name: &str) -> Result<(), StorageError> {
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(std::path::Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(StorageError::InvalidName {
            name: name.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_name_prefixes_basename() {
        assert_eq!(artifact_name("receive", "notes.txt").unwrap(), "receive_notes.txt");
        assert_eq!(
            artifact_name("receive", "/home/alice/notes.txt").unwrap(),
            "receive_notes.txt"
        );
        assert_eq!(
            artifact_name("in", "C:\\Users\\bob\\report.md").unwrap(),
            "in_report.md"
        );
    }

    #[test]
    fn artifact_name_rejects_traversal() {
        for bad in ["", "..", ".", "../", "a/..", "dir/", "  "] {
            assert!(
                matches!(
                    artifact_name("receive", bad),
                    Err(StorageError::InvalidName { .. })
                ),
                "{bad:?} should be rejected"
            );
        }
        assert_eq!(
            artifact_name("receive", "../../etc/passwd").unwrap(),
            "receive_passwd"
        );
    }

    #[test]
    fn validate_name_accepts_single_component() {
        assert!(validate_name("receive_a.txt").is_ok());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("").is_err());
    }
}
