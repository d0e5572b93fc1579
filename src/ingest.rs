//! Document ingestion: upload, extraction, chunking, embedding and indexing.
//!
//! A document moves PENDING -> PROCESSING -> READY | FAILED. The claim is a
//! compare-and-swap on the status row, and an in-process active set keeps a
//! second worker from even trying while the first is running. READY is only
//! written together with the chunk rows, after every vector is in the index;
//! any failure on the way removes the vectors already written.

use crate::chunking::TextChunker;
use crate::config::{EmbeddingSettings, ExtractorKind};
use crate::embedding::Embedder;
use crate::error::{Result, StudyError};
use crate::extraction::{mime_from_filename, normalize_mime, ExtractionSelector};
use crate::models::{AccountTier, Chunk, Classroom, Document, DocumentStatus};
use crate::object_store::{object_key, ObjectStore};
use crate::quota::{estimate_tokens, QuotaGuard, UsageTally};
use crate::retry::RetryPolicy;
use crate::store::MetadataStore;
use crate::vector_index::{namespace, EntryMetadata, IndexEntry, VectorIndex};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Chunk ids of a first ingestion are derived from this generation, so a
/// retried upsert for the same document overwrites rather than duplicates.
const INITIAL_GENERATION: Uuid = Uuid::nil();

/// Documents currently owned by a worker in this process.
#[derive(Default)]
struct ActiveSet(Mutex<HashSet<Uuid>>);

/// Removes the document from the active set when dropped.
struct ActiveClaim<'a> {
    set: &'a ActiveSet,
    id: Uuid,
}

impl ActiveSet {
    fn claim(&self, id: Uuid) -> Result<ActiveClaim<'_>> {
        let mut active = self
            .0
            .lock()
            .map_err(|e| StudyError::Storage(format!("Failed to acquire lock: {}", e)))?;
        if !active.insert(id) {
            return Err(StudyError::Conflict(format!(
                "document {} is already being processed",
                id
            )));
        }
        Ok(ActiveClaim { set: self, id })
    }

    fn contains(&self, id: Uuid) -> bool {
        self.0.lock().map(|a| a.contains(&id)).unwrap_or(false)
    }
}

impl Drop for ActiveClaim<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.set.0.lock() {
            active.remove(&self.id);
        }
    }
}

/// Chunks whose vectors are in the index but whose rows are not yet committed.
struct Indexed {
    chunks: Vec<Chunk>,
    extractor: ExtractorKind,
}

impl Indexed {
    fn vector_ids(&self) -> Vec<String> {
        self.chunks.iter().map(|c| c.vector_id.clone()).collect()
    }
}

pub struct IngestionOrchestrator {
    store: Arc<dyn MetadataStore>,
    objects: Arc<dyn ObjectStore>,
    extraction: Arc<ExtractionSelector>,
    chunker: TextChunker,
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    quota: Arc<QuotaGuard>,
    namespace_prefix: String,
    batch_size: usize,
    max_concurrent_batches: usize,
    retry: RetryPolicy,
    active: ActiveSet,
}

impl IngestionOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        extraction: Arc<ExtractionSelector>,
        chunker: TextChunker,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        quota: Arc<QuotaGuard>,
        namespace_prefix: impl Into<String>,
        embedding: &EmbeddingSettings,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            objects,
            extraction,
            chunker,
            embedder,
            index,
            quota,
            namespace_prefix: namespace_prefix.into(),
            batch_size: embedding.batch_size.max(1),
            max_concurrent_batches: embedding.max_concurrent_batches.max(1),
            retry,
            active: ActiveSet::default(),
        }
    }

    async fn owned_classroom(&self, account_id: &str, classroom_id: Uuid) -> Result<Classroom> {
        self.store
            .get_classroom(classroom_id)
            .await?
            .filter(|c| c.account_id == account_id)
            .ok_or_else(|| StudyError::NotFound(format!("classroom {}", classroom_id)))
    }

    /// The document, if it lives in one of the account's classrooms.
    pub async fn owned_document(&self, account_id: &str, document_id: Uuid) -> Result<Document> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| StudyError::NotFound(format!("document {}", document_id)))?;
        self.owned_classroom(account_id, document.classroom_id)
            .await
            .map_err(|_| StudyError::NotFound(format!("document {}", document_id)))?;
        Ok(document)
    }

    /// Store an upload and create its PENDING document.
    ///
    /// The file type must have an extractor on the account's tier, and the
    /// upload must fit both the storage cap and the extraction budget.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(
        &self,
        account_id: &str,
        classroom_id: Uuid,
        filename: &str,
        mime_type: Option<&str>,
        bytes: &[u8],
    ) -> Result<Document> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(StudyError::Validation("filename is required".to_string()));
        }
        if bytes.is_empty() {
            return Err(StudyError::Validation(format!("{} is empty", filename)));
        }
        let classroom = self.owned_classroom(account_id, classroom_id).await?;

        let mime = match mime_type.map(normalize_mime) {
            Some(mime) if !mime.is_empty() && mime != "application/octet-stream" => mime,
            _ => mime_from_filename(filename).to_string(),
        };
        let tier = self.quota.tier(account_id).await?;
        self.extraction
            .plan(tier, &mime)
            .map_err(|_| StudyError::Validation(format!("{} files are not supported on the {} tier", mime, tier)))?;
        self.quota
            .check_storage(account_id, bytes.len() as u64)
            .await?;

        let key = object_key(classroom.id, filename);
        let mut document = Document::new(classroom.id, filename, &mime, bytes.len() as u64, key);
        self.quota
            .check_and_reserve(account_id, self.extraction.estimate_cost(tier, &document)?)
            .await?;

        document.storage_key = self.objects.put(&document.storage_key, bytes).await?;
        if let Err(e) = self.store.insert_document(&document).await {
            if let Err(cleanup) = self.objects.delete(&document.storage_key).await {
                warn!("Failed to remove orphaned object {}: {}", document.storage_key, cleanup);
            }
            return Err(e);
        }

        info!("Uploaded {} ({}, {} bytes) as {}", filename, mime, bytes.len(), document.id);
        Ok(document)
    }

    /// Run [`IngestionOrchestrator::ingest`] as a background task.
    pub fn spawn(self: &Arc<Self>, account_id: &str, document_id: Uuid) -> JoinHandle<Result<Document>> {
        let this = Arc::clone(self);
        let account_id = account_id.to_string();
        tokio::spawn(async move { this.ingest(&account_id, document_id).await })
    }

    /// Claim a PENDING document and drive it to READY or FAILED.
    ///
    /// Returns the READY document. On failure the document is FAILED with the
    /// error recorded as its reason, and the error is returned.
    #[instrument(skip(self))]
    pub async fn ingest(&self, account_id: &str, document_id: Uuid) -> Result<Document> {
        let _claim = self.active.claim(document_id)?;
        let document = self.owned_document(account_id, document_id).await?;
        if document.status != DocumentStatus::Pending {
            return Err(StudyError::Conflict(format!(
                "document {} is {}, not PENDING",
                document_id, document.status
            )));
        }

        let claimed = self
            .store
            .transition_status(document_id, DocumentStatus::Pending, DocumentStatus::Processing, None)
            .await?;
        if !claimed {
            return Err(StudyError::Conflict(format!(
                "document {} was claimed by another worker",
                document_id
            )));
        }
        info!("Processing {} ({})", document.filename, document_id);

        let tally = UsageTally::new();
        let outcome = self.ingest_claimed(account_id, &document, &tally).await;
        self.record_usage(account_id, &tally).await;

        match outcome {
            Ok(count) => {
                info!("{} is READY with {} chunks", document.filename, count);
                self.store
                    .get_document(document_id)
                    .await?
                    .ok_or_else(|| StudyError::NotFound(format!("document {}", document_id)))
            }
            Err(e) => {
                error!("Ingestion of {} failed: {}", document.filename, e);
                match self.store.mark_failed(document_id, &e.to_string()).await {
                    Ok(true) => {}
                    Ok(false) => warn!("{} left PROCESSING before it could be marked FAILED", document_id),
                    Err(store_err) => error!("Failed to mark {} FAILED: {}", document_id, store_err),
                }
                Err(e)
            }
        }
    }

    /// Runs with the document PROCESSING, so any error here ends in FAILED.
    async fn ingest_claimed(
        &self,
        account_id: &str,
        document: &Document,
        tally: &UsageTally,
    ) -> Result<usize> {
        let tier = self.quota.tier(account_id).await?;
        self.quota
            .check_and_reserve(account_id, self.extraction.estimate_cost(tier, document)?)
            .await?;

        let indexed = self
            .build_index(account_id, document, tier, INITIAL_GENERATION, tally)
            .await?;

        let ready = self
            .store
            .mark_ready(document.id, &indexed.chunks, indexed.extractor.as_str())
            .await;
        match ready {
            Ok(true) => Ok(indexed.chunks.len()),
            Ok(false) => {
                self.remove_vectors(document.classroom_id, &indexed.vector_ids()).await;
                Err(StudyError::Conflict(format!(
                    "document {} left PROCESSING during ingestion",
                    document.id
                )))
            }
            Err(e) => {
                self.remove_vectors(document.classroom_id, &indexed.vector_ids()).await;
                Err(e)
            }
        }
    }

    /// Re-extract, re-chunk and re-embed a READY document under a new chunk
    /// generation. The document stays READY; the old vectors are removed only
    /// after the new chunk rows are committed.
    #[instrument(skip(self))]
    pub async fn reindex(&self, account_id: &str, document_id: Uuid) -> Result<usize> {
        let _claim = self.active.claim(document_id)?;
        let document = self.owned_document(account_id, document_id).await?;
        if document.status != DocumentStatus::Ready {
            return Err(StudyError::Conflict(format!(
                "document {} is {}, only READY documents can be re-indexed",
                document_id, document.status
            )));
        }

        let tier = self.quota.tier(account_id).await?;
        self.quota
            .check_and_reserve(account_id, self.extraction.estimate_cost(tier, &document)?)
            .await?;

        let tally = UsageTally::new();
        let outcome = self
            .reindex_ready(account_id, &document, tier, &tally)
            .await;
        self.record_usage(account_id, &tally).await;
        outcome
    }

    async fn reindex_ready(
        &self,
        account_id: &str,
        document: &Document,
        tier: AccountTier,
        tally: &UsageTally,
    ) -> Result<usize> {
        let indexed = self
            .build_index(account_id, document, tier, Uuid::new_v4(), tally)
            .await?;

        let previous = match self
            .store
            .replace_chunks(document.id, &indexed.chunks, indexed.extractor.as_str())
            .await
        {
            Ok(previous) => previous,
            Err(e) => {
                self.remove_vectors(document.classroom_id, &indexed.vector_ids()).await;
                return Err(e);
            }
        };

        let stale: Vec<String> = previous.into_iter().map(|c| c.vector_id).collect();
        self.remove_vectors(document.classroom_id, &stale).await;
        info!(
            "Re-indexed {}: {} chunks replaced {}",
            document.filename,
            indexed.chunks.len(),
            stale.len()
        );
        Ok(indexed.chunks.len())
    }

    /// Extraction through vector upsert. On error nothing stays in the index.
    async fn build_index(
        &self,
        account_id: &str,
        document: &Document,
        tier: AccountTier,
        generation: Uuid,
        tally: &UsageTally,
    ) -> Result<Indexed> {
        let extracted = self
            .extraction
            .select_and_extract(document, tier, tally)
            .await?;
        debug!(
            "Extracted {} chars with {} ({} images described)",
            extracted.text.len(),
            extracted.extractor,
            extracted.images_described
        );

        let passages = self.chunker.split(&extracted.text);
        if passages.is_empty() {
            return Err(StudyError::Extraction(format!(
                "{} contains no text to index",
                document.filename
            )));
        }

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let embedding_tokens: u64 = texts.iter().map(|t| estimate_tokens(t)).sum();
        self.quota
            .check_and_reserve(account_id, self.quota.embedding_cost(embedding_tokens))
            .await?;

        let vectors = self.embed_passages(&texts, tally).await?;

        let chunks: Vec<Chunk> = passages
            .into_iter()
            .map(|p| {
                let id = Chunk::derive_id(document.id, generation, p.ordinal);
                Chunk {
                    id,
                    document_id: document.id,
                    ordinal: p.ordinal,
                    content: p.text,
                    vector_id: id.to_string(),
                    page: p.page,
                    start_offset: p.start,
                    end_offset: p.end,
                }
            })
            .collect();

        let entries: Vec<IndexEntry> = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                id: chunk.vector_id.clone(),
                vector,
                metadata: EntryMetadata {
                    document_id: document.id,
                    classroom_id: document.classroom_id,
                    ordinal: chunk.ordinal,
                },
            })
            .collect();

        let ns = namespace(&self.namespace_prefix, document.classroom_id);
        let upserted = self
            .retry
            .run("vector upsert", || self.index.upsert(&ns, &entries))
            .await
            .map_err(|e| e.exhausted(StudyError::Index));

        let indexed = Indexed {
            chunks,
            extractor: extracted.extractor,
        };
        match upserted {
            Ok(n) if n == entries.len() => Ok(indexed),
            Ok(n) => {
                self.remove_vectors(document.classroom_id, &indexed.vector_ids()).await;
                Err(StudyError::Index(format!(
                    "index accepted {} of {} vectors",
                    n,
                    entries.len()
                )))
            }
            Err(e) => {
                self.remove_vectors(document.classroom_id, &indexed.vector_ids()).await;
                Err(e)
            }
        }
    }

    /// Embed passages in provider-sized batches, stopping at the first failure.
    async fn embed_passages(&self, texts: &[String], tally: &UsageTally) -> Result<Vec<Vec<f32>>> {
        let total = texts.len().div_ceil(self.batch_size);

        // Futures are built up front (they stay lazy until polled by
        // `buffered`) to sidestep a rustc higher-ranked `Send` inference
        // failure when this runs inside a spawned task.
        let requests: Vec<_> = texts
            .chunks(self.batch_size)
            .enumerate()
            .map(|(i, batch)| async move {
                let vectors = self
                    .embedder
                    .embed_batch(batch)
                    .await
                    .map_err(as_embedding_error)?;
                if vectors.len() != batch.len() {
                    return Err(StudyError::Embedding(format!(
                        "batch {} of {}: expected {} vectors, got {}",
                        i + 1,
                        total,
                        batch.len(),
                        vectors.len()
                    )));
                }
                let tokens: u64 = batch.iter().map(|t| estimate_tokens(t)).sum();
                tally.add(self.quota.embedding_cost(tokens));
                debug!("Embedded batch {} of {} ({} passages)", i + 1, total, batch.len());
                Ok::<_, StudyError>(vectors)
            })
            .collect();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(requests)
            .buffered(self.max_concurrent_batches)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    /// Compensating delete. Failures are logged; the vectors are unreachable
    /// without chunk rows, and a later re-index overwrites or removes them.
    async fn remove_vectors(&self, classroom_id: Uuid, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        let ns = namespace(&self.namespace_prefix, classroom_id);
        match self
            .retry
            .run("vector delete", || self.index.delete(&ns, ids))
            .await
        {
            Ok(n) => debug!("Removed {} vectors from {}", n, ns),
            Err(e) => warn!("Failed to remove {} vectors from {}: {}", ids.len(), ns, e),
        }
    }

    async fn record_usage(&self, account_id: &str, tally: &UsageTally) {
        let spent = tally.take();
        if let Err(e) = self.quota.record(account_id, spent).await {
            error!("Failed to record {} weighted tokens for {}: {}", spent, account_id, e);
        }
    }

    /// Delete a document, its chunk rows, its vectors and its stored bytes.
    #[instrument(skip(self))]
    pub async fn delete_document(&self, account_id: &str, document_id: Uuid) -> Result<Document> {
        if self.active.contains(document_id) {
            return Err(StudyError::Conflict(format!(
                "document {} is being processed",
                document_id
            )));
        }
        self.owned_document(account_id, document_id).await?;

        let (document, chunks) = self
            .store
            .delete_document(document_id)
            .await?
            .ok_or_else(|| StudyError::NotFound(format!("document {}", document_id)))?;

        let ids: Vec<String> = chunks.into_iter().map(|c| c.vector_id).collect();
        self.remove_vectors(document.classroom_id, &ids).await;
        if let Err(e) = self.objects.delete(&document.storage_key).await {
            warn!("Failed to remove stored file {}: {}", document.storage_key, e);
        }
        info!("Deleted {} ({})", document.filename, document.id);
        Ok(document)
    }
}

fn as_embedding_error(err: StudyError) -> StudyError {
    match err {
        StudyError::Embedding(_) => err,
        other if other.is_transient() => other.exhausted(StudyError::Embedding),
        other => StudyError::Embedding(other.to_string()),
    }
}
