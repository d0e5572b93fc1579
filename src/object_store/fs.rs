//! Filesystem object store rooted at a directory.

use super::ObjectStore;
use crate::error::{Result, StudyError};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a key inside the root, rejecting anything that could escape it.
    fn resolve(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if key.is_empty() || escapes {
            return Err(StudyError::Validation(format!("Invalid storage key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        debug!("Stored {} bytes at {:?}", bytes.len(), path);
        Ok(key.to_string())
    }

    async fn get(&self, storage_key: &str) -> Result<Vec<u8>> {
        let path = self.resolve(storage_key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StudyError::NotFound(format!("object {}", storage_key)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, storage_key: &str) -> Result<()> {
        let path = self.resolve(storage_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());

        let key = store.put("room/abc-notes.txt", b"hello").await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"hello");

        store.delete(&key).await.unwrap();
        assert!(matches!(store.get(&key).await, Err(StudyError::NotFound(_))));
        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        assert!(store.put("../outside", b"x").await.is_err());
        assert!(store.put("/etc/passwd", b"x").await.is_err());
    }
}
