//! Vector index abstraction.
//!
//! Vectors live in per-classroom namespaces; a query never crosses a namespace,
//! and a [`QueryFilter`] narrows it further to a set of documents.

mod memory;
mod sqlite;

pub use memory::MemoryVectorIndex;
pub use sqlite::SqliteVectorIndex;

use crate::config::Settings;
use crate::error::{Result, StudyError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Metadata stored alongside each vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub document_id: Uuid,
    pub classroom_id: Uuid,
    pub ordinal: u32,
}

/// A vector to upsert. `id` is the chunk's vector id.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: EntryMetadata,
}

/// A query hit.
#[derive(Debug, Clone)]
pub struct IndexMatch {
    pub id: String,
    /// Cosine similarity (higher is better).
    pub score: f32,
    pub metadata: EntryMetadata,
}

/// Restriction applied inside a namespace.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// `None` searches the whole namespace; `Some` limits hits to these documents.
    pub document_ids: Option<Vec<Uuid>>,
}

impl QueryFilter {
    pub fn documents(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            document_ids: Some(ids.into_iter().collect()),
        }
    }

    pub fn allows(&self, document_id: &Uuid) -> bool {
        self.document_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(document_id))
    }
}

/// Trait for vector index implementations.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite entries by id. Returns the number written.
    async fn upsert(&self, namespace: &str, entries: &[IndexEntry]) -> Result<usize>;

    /// Nearest neighbours of `vector`, best first.
    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<IndexMatch>>;

    /// Delete entries by id. Missing ids are ignored.
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<usize>;

    /// Number of vectors stored for one document.
    async fn count(&self, namespace: &str, document_id: Uuid) -> Result<usize>;
}

/// Namespace holding one classroom's vectors.
pub fn namespace(prefix: &str, classroom_id: Uuid) -> String {
    format!("{}:{}", prefix, classroom_id)
}

/// Create the configured vector index.
pub fn create_vector_index(settings: &Settings) -> Result<Arc<dyn VectorIndex>> {
    match settings.vector_index.provider.to_lowercase().as_str() {
        "sqlite" => Ok(Arc::new(SqliteVectorIndex::new(
            &settings.vector_index_path(),
        )?)),
        "memory" => Ok(Arc::new(MemoryVectorIndex::new())),
        other => Err(StudyError::Config(format!(
            "Unknown vector index provider: {}",
            other
        ))),
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Sort hits best-first and keep `top_k`.
pub(crate) fn rank(mut matches: Vec<IndexMatch>, top_k: usize) -> Vec<IndexMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(top_k);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &c)).abs() < 0.001);

        let d = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &d) + 1.0).abs() < 0.001);

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_filter_allows() {
        let doc = Uuid::new_v4();
        assert!(QueryFilter::default().allows(&doc));
        assert!(QueryFilter::documents([doc]).allows(&doc));
        assert!(!QueryFilter::documents([Uuid::new_v4()]).allows(&doc));
        assert!(!QueryFilter::documents([]).allows(&doc));
    }

    #[test]
    fn test_namespace_is_per_classroom() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(namespace("studydesk", a), namespace("studydesk", b));
        assert!(namespace("studydesk", a).starts_with("studydesk:"));
    }
}
