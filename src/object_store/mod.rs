//! Object store for raw uploaded bytes.

mod fs;
mod memory;

pub use fs::FsObjectStore;
pub use memory::MemoryObjectStore;

use crate::error::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// Trait for blob storage implementations.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key`, returning the storage key to persist.
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String>;

    /// Fetch an object. Missing keys are `NotFound`.
    async fn get(&self, storage_key: &str) -> Result<Vec<u8>>;

    /// Remove an object. Missing keys are ignored.
    async fn delete(&self, storage_key: &str) -> Result<()>;
}

/// Key for a new upload: `<classroom>/<uuid>-<sanitized filename>`.
pub fn object_key(classroom_id: Uuid, filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or(filename);
    let safe: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let safe = safe.trim_start_matches('.');
    format!("{}/{}-{}", classroom_id, Uuid::new_v4(), safe)
}
