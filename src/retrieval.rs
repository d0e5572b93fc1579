//! Retrieval of passages for grounding a generation request.
//!
//! A scope is either an explicit list of documents or every READY document
//! in the classroom. The query only ever runs inside the classroom's
//! namespace and is filtered down to the documents in scope.

use crate::config::RagSettings;
use crate::embedding::Embedder;
use crate::error::{Result, StudyError};
use crate::models::{Chunk, Document, DocumentStatus, SourceRef};
use crate::quota::{estimate_tokens, weigh, UsageTally};
use crate::retry::RetryPolicy;
use crate::store::MetadataStore;
use crate::vector_index::{namespace, QueryFilter, VectorIndex};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub chunk: Chunk,
    pub filename: String,
    /// Cosine similarity to the query; sampled passages carry 0.0.
    pub score: f32,
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    /// Best first for similarity queries, document order for samples.
    pub passages: Vec<RetrievedPassage>,
    pub has_relevant_context: bool,
    /// READY documents the scope resolved to.
    pub documents: Vec<Document>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn top_score(&self) -> Option<f32> {
        self.passages.first().map(|p| p.score)
    }

    /// Distinct documents the passages came from, in first-seen order.
    pub fn sources(&self) -> Vec<SourceRef> {
        let mut sources: Vec<SourceRef> = Vec::new();
        for passage in &self.passages {
            if !sources.iter().any(|s| s.document_id == passage.chunk.document_id) {
                sources.push(SourceRef {
                    document_id: passage.chunk.document_id,
                    filename: passage.filename.clone(),
                });
            }
        }
        sources
    }
}

pub struct RetrievalAssembler {
    store: Arc<dyn MetadataStore>,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    settings: RagSettings,
    namespace_prefix: String,
    embedding_weight: f64,
    retry: RetryPolicy,
}

impl RetrievalAssembler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        settings: RagSettings,
        namespace_prefix: impl Into<String>,
        embedding_weight: f64,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            index,
            embedder,
            settings,
            namespace_prefix: namespace_prefix.into(),
            embedding_weight,
            retry,
        }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    /// Weighted cost of embedding `query`.
    pub fn query_cost(&self, query: &str) -> u64 {
        weigh(estimate_tokens(query), self.embedding_weight)
    }

    /// READY documents in scope.
    ///
    /// An empty `document_ids` means the whole classroom. Explicit ids outside
    /// the classroom are `NotFound`; explicit ids that are not READY are dropped.
    pub async fn resolve_scope(
        &self,
        classroom_id: Uuid,
        document_ids: &[Uuid],
    ) -> Result<Vec<Document>> {
        let documents = self.store.list_documents(classroom_id).await?;

        if document_ids.is_empty() {
            return Ok(documents
                .into_iter()
                .filter(|d| d.status == DocumentStatus::Ready)
                .collect());
        }

        let by_id: HashMap<Uuid, &Document> = documents.iter().map(|d| (d.id, d)).collect();
        let mut scoped: Vec<Document> = Vec::new();
        for id in document_ids {
            let document = by_id.get(id).ok_or_else(|| {
                StudyError::NotFound(format!("document {} in classroom {}", id, classroom_id))
            })?;
            if document.status != DocumentStatus::Ready {
                info!("Skipping {} ({}): not ready", document.filename, document.status);
                continue;
            }
            if !scoped.iter().any(|d| d.id == *id) {
                scoped.push((*document).clone());
            }
        }
        Ok(scoped)
    }

    /// Embed `query` and return the best passages in scope.
    ///
    /// Returns an empty result without calling the embedder when the scope
    /// has no READY documents.
    #[instrument(skip(self, query, document_ids, tally), fields(scope = document_ids.len()))]
    pub async fn retrieve(
        &self,
        classroom_id: Uuid,
        query: &str,
        document_ids: &[Uuid],
        top_k: usize,
        tally: &UsageTally,
    ) -> Result<RetrievalResult> {
        let documents = self.resolve_scope(classroom_id, document_ids).await?;
        if documents.is_empty() {
            debug!("Scope has no ready documents; skipping retrieval");
            return Ok(RetrievalResult::default());
        }

        let vector = self.embedder.embed(query).await?;
        tally.add(self.query_cost(query));

        let ns = namespace(&self.namespace_prefix, classroom_id);
        let filter = QueryFilter::documents(documents.iter().map(|d| d.id));
        let matches = self
            .retry
            .run("vector query", || self.index.query(&ns, &vector, top_k, &filter))
            .await
            .map_err(|e| e.exhausted(StudyError::Index))?;

        let ids: Vec<String> = matches.iter().map(|m| m.id.clone()).collect();
        let mut chunks: HashMap<String, Chunk> = self
            .store
            .get_chunks(&ids)
            .await?
            .into_iter()
            .map(|c| (c.vector_id.clone(), c))
            .collect();
        let filenames: HashMap<Uuid, &str> =
            documents.iter().map(|d| (d.id, d.filename.as_str())).collect();

        let mut passages = Vec::with_capacity(matches.len());
        for m in matches {
            let Some(chunk) = chunks.remove(&m.id) else {
                debug!("Dropping vector {} with no chunk row", m.id);
                continue;
            };
            let Some(filename) = filenames.get(&chunk.document_id) else {
                continue;
            };
            passages.push(RetrievedPassage {
                filename: filename.to_string(),
                score: m.score,
                chunk,
            });
        }

        let above = passages
            .iter()
            .filter(|p| p.score >= self.settings.relevance_threshold)
            .count();
        let has_relevant_context = above > 0 && above >= self.settings.min_relevant_passages;

        debug!(
            "Retrieved {} passages, {} above {} (top {:?})",
            passages.len(),
            above,
            self.settings.relevance_threshold,
            passages.first().map(|p| p.score)
        );

        Ok(RetrievalResult {
            passages,
            has_relevant_context,
            documents,
        })
    }

    /// Passages spread evenly over the documents in scope, without a query.
    ///
    /// Used for study artifacts that have no focus topic to search for.
    #[instrument(skip(self, document_ids), fields(scope = document_ids.len()))]
    pub async fn sample(
        &self,
        classroom_id: Uuid,
        document_ids: &[Uuid],
        limit: usize,
    ) -> Result<RetrievalResult> {
        let documents = self.resolve_scope(classroom_id, document_ids).await?;
        if documents.is_empty() || limit == 0 {
            return Ok(RetrievalResult {
                documents,
                ..RetrievalResult::default()
            });
        }

        let per_document = limit.div_ceil(documents.len());
        let mut passages = Vec::new();
        for document in &documents {
            let chunks = self.store.list_chunks(document.id).await?;
            for chunk in evenly_spaced(chunks, per_document) {
                passages.push(RetrievedPassage {
                    chunk,
                    filename: document.filename.clone(),
                    score: 0.0,
                });
            }
        }
        passages.truncate(limit);

        Ok(RetrievalResult {
            has_relevant_context: !passages.is_empty(),
            passages,
            documents,
        })
    }
}

/// Up to `n` items taken at even intervals, first item included.
fn evenly_spaced<T>(items: Vec<T>, n: usize) -> Vec<T> {
    let len = items.len();
    if len <= n {
        return items;
    }
    let picks: Vec<usize> = (0..n).map(|i| i * len / n).collect();
    items
        .into_iter()
        .enumerate()
        .filter(|(i, _)| picks.binary_search(i).is_ok())
        .map(|(_, item)| item)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::models::Classroom;
    use crate::store::SqliteMetadataStore;
    use crate::vector_index::{EntryMetadata, IndexEntry, MemoryVectorIndex};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        inner: HashingEmbedder,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(text).await
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.inner.embed_batch(texts).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    struct Fixture {
        store: Arc<SqliteMetadataStore>,
        index: Arc<MemoryVectorIndex>,
        embedder: Arc<CountingEmbedder>,
        assembler: RetrievalAssembler,
        classroom: Classroom,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let index = Arc::new(MemoryVectorIndex::new());
        let embedder = Arc::new(CountingEmbedder {
            inner: HashingEmbedder::new(256),
            calls: AtomicUsize::new(0),
        });
        let classroom = Classroom::new("acct", "Biology");
        store.create_classroom(&classroom).await.unwrap();
        let assembler = RetrievalAssembler::new(
            store.clone(),
            index.clone(),
            embedder.clone(),
            RagSettings::default(),
            "test",
            0.1,
            RetryPolicy::no_retry(std::time::Duration::from_secs(5)),
        );
        Fixture {
            store,
            index,
            embedder,
            assembler,
            classroom,
        }
    }

    /// Insert a READY document whose chunks are `texts`, indexed with the hashing embedder.
    async fn ready_document(f: &Fixture, filename: &str, texts: &[&str]) -> Document {
        let doc = Document::new(f.classroom.id, filename, "text/plain", 10, format!("k/{}", filename));
        f.store.insert_document(&doc).await.unwrap();
        f.store
            .transition_status(doc.id, DocumentStatus::Pending, DocumentStatus::Processing, None)
            .await
            .unwrap();

        let generation = Uuid::new_v4();
        let mut chunks = Vec::new();
        let mut entries = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let id = Chunk::derive_id(doc.id, generation, i as u32);
            chunks.push(Chunk {
                id,
                document_id: doc.id,
                ordinal: i as u32,
                content: text.to_string(),
                vector_id: id.to_string(),
                page: None,
                start_offset: 0,
                end_offset: text.len(),
            });
            entries.push(IndexEntry {
                id: id.to_string(),
                vector: f.embedder.inner.vectorize(text),
                metadata: EntryMetadata {
                    document_id: doc.id,
                    classroom_id: f.classroom.id,
                    ordinal: i as u32,
                },
            });
        }
        f.index
            .upsert(&namespace("test", f.classroom.id), &entries)
            .await
            .unwrap();
        assert!(f.store.mark_ready(doc.id, &chunks, "plain_text").await.unwrap());
        f.store.get_document(doc.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_empty_scope_skips_embedding() {
        let f = fixture().await;
        let pending = Document::new(f.classroom.id, "p.txt", "text/plain", 1, "k".into());
        f.store.insert_document(&pending).await.unwrap();

        let tally = UsageTally::new();
        let result = f
            .assembler
            .retrieve(f.classroom.id, "photosynthesis", &[], 5, &tally)
            .await
            .unwrap();

        assert!(result.is_empty());
        assert!(!result.has_relevant_context);
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(tally.total(), 0);

        let explicit = f
            .assembler
            .retrieve(f.classroom.id, "photosynthesis", &[pending.id], 5, &tally)
            .await
            .unwrap();
        assert!(explicit.is_empty());
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_scope_restricts_to_requested_documents() {
        let f = fixture().await;
        let plants = ready_document(&f, "plants.txt", &["Chlorophyll absorbs light for photosynthesis."]).await;
        let _animals =
            ready_document(&f, "animals.txt", &["Chlorophyll absorbs light in photosynthesis too."]).await;

        let result = f
            .assembler
            .retrieve(f.classroom.id, "chlorophyll light", &[plants.id], 10, &UsageTally::new())
            .await
            .unwrap();

        assert_eq!(result.passages.len(), 1);
        assert!(result.passages.iter().all(|p| p.chunk.document_id == plants.id));
        assert_eq!(result.sources()[0].filename, "plants.txt");
    }

    #[tokio::test]
    async fn test_relevance_flag_follows_threshold() {
        let f = fixture().await;
        ready_document(
            &f,
            "cells.txt",
            &[
                "Mitochondria produce ATP through cellular respiration.",
                "The nucleus stores the cell's genetic material.",
            ],
        )
        .await;

        let tally = UsageTally::new();
        let related = f
            .assembler
            .retrieve(f.classroom.id, "How do mitochondria produce ATP?", &[], 5, &tally)
            .await
            .unwrap();
        assert!(related.has_relevant_context);
        assert!(related.passages[0].chunk.content.contains("Mitochondria"));
        assert!(tally.total() > 0);

        let unrelated = f
            .assembler
            .retrieve(f.classroom.id, "Who won the 1998 football final?", &[], 5, &tally)
            .await
            .unwrap();
        assert!(!unrelated.has_relevant_context);
    }

    #[tokio::test]
    async fn test_foreign_document_is_not_found() {
        let f = fixture().await;
        let err = f
            .assembler
            .retrieve(f.classroom.id, "q", &[Uuid::new_v4()], 5, &UsageTally::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StudyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_sample_spreads_across_documents() {
        let f = fixture().await;
        let a = ready_document(&f, "a.txt", &["a0", "a1", "a2", "a3", "a4", "a5"]).await;
        let b = ready_document(&f, "b.txt", &["b0", "b1"]).await;

        let result = f.assembler.sample(f.classroom.id, &[], 4).await.unwrap();
        assert_eq!(result.passages.len(), 4);
        assert!(result.has_relevant_context);
        let from_a = result.passages.iter().filter(|p| p.chunk.document_id == a.id).count();
        let from_b = result.passages.iter().filter(|p| p.chunk.document_id == b.id).count();
        assert_eq!((from_a, from_b), (2, 2));
        assert_eq!(f.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_evenly_spaced() {
        assert_eq!(evenly_spaced((0..10).collect(), 3), vec![0, 3, 6]);
        assert_eq!(evenly_spaced(vec![1, 2], 5), vec![1, 2]);
    }
}
