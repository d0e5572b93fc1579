//! In-memory vector index implementation.
//!
//! Useful for testing and small datasets.

use super::{cosine_similarity, rank, IndexEntry, IndexMatch, QueryFilter, VectorIndex};
use crate::error::{Result, StudyError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

type Namespaces = HashMap<String, HashMap<String, IndexEntry>>;

/// In-memory vector index.
pub struct MemoryVectorIndex {
    namespaces: RwLock<Namespaces>,
}

impl MemoryVectorIndex {
    /// Create a new in-memory vector index.
    pub fn new() -> Self {
        Self {
            namespaces: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Namespaces>> {
        self.namespaces
            .read()
            .map_err(|e| StudyError::Index(format!("Failed to acquire lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Namespaces>> {
        self.namespaces
            .write()
            .map_err(|e| StudyError::Index(format!("Failed to acquire lock: {}", e)))
    }

    /// Total vectors across all namespaces.
    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.values().map(HashMap::len).sum())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl Default for MemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<usize> {
        let mut namespaces = self.write()?;
        let store = namespaces.entry(namespace.to_string()).or_default();
        for entry in entries {
            store.insert(entry.id.clone(), entry.clone());
        }
        Ok(entries.len())
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<IndexMatch>> {
        let namespaces = self.read()?;
        let Some(store) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let matches = store
            .values()
            .filter(|e| filter.allows(&e.metadata.document_id))
            .map(|e| IndexMatch {
                id: e.id.clone(),
                score: cosine_similarity(vector, &e.vector),
                metadata: e.metadata,
            })
            .collect();

        Ok(rank(matches, top_k))
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize> {
        let mut namespaces = self.write()?;
        let Some(store) = namespaces.get_mut(namespace) else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| store.remove(*id).is_some()).count())
    }

    async fn count(&self, namespace: &str, document_id: Uuid) -> Result<usize> {
        let namespaces = self.read()?;
        Ok(namespaces.get(namespace).map_or(0, |store| {
            store
                .values()
                .filter(|e| e.metadata.document_id == document_id)
                .count()
        }))
    }
}
