//! In-memory object store, for tests.

use super::ObjectStore;
use crate::error::{Result, StudyError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(e: impl std::fmt::Display) -> StudyError {
    StudyError::Storage(format!("Failed to acquire lock: {}", e))
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        self.objects
            .write()
            .map_err(poisoned)?
            .insert(key.to_string(), bytes.to_vec());
        Ok(key.to_string())
    }

    async fn get(&self, storage_key: &str) -> Result<Vec<u8>> {
        self.objects
            .read()
            .map_err(poisoned)?
            .get(storage_key)
            .cloned()
            .ok_or_else(|| StudyError::NotFound(format!("object {}", storage_key)))
    }

    async fn delete(&self, storage_key: &str) -> Result<()> {
        self.objects.write().map_err(poisoned)?.remove(storage_key);
        Ok(())
    }
}
