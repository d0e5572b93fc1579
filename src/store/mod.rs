//! Metadata store for classrooms, documents, chunks, artifacts and usage.
//!
//! The document status column is only changed through compare-and-swap
//! operations, so exactly one ingestion attempt can claim a document and
//! exactly one terminal state is ever written.

mod sqlite;

pub use sqlite::SqliteMetadataStore;

use crate::error::Result;
use crate::models::{
    AccountTier, Chunk, Classroom, Document, DocumentStatus, GeneratedArtifact,
};
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

/// Records consumed by the ingestion and generation pipelines.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn create_classroom(&self, classroom: &Classroom) -> Result<()>;

    async fn get_classroom(&self, id: Uuid) -> Result<Option<Classroom>>;

    async fn list_classrooms(&self, account_id: &str) -> Result<Vec<Classroom>>;

    async fn count_classrooms(&self, account_id: &str) -> Result<u32>;

    async fn insert_document(&self, document: &Document) -> Result<()>;

    async fn get_document(&self, id: Uuid) -> Result<Option<Document>>;

    async fn list_documents(&self, classroom_id: Uuid) -> Result<Vec<Document>>;

    /// Atomically move a document from `from` to `to`.
    ///
    /// Returns `false` when the document is not currently in `from`. Moving to
    /// READY is refused here; use [`MetadataStore::mark_ready`].
    async fn transition_status(
        &self,
        id: Uuid,
        from: DocumentStatus,
        to: DocumentStatus,
        reason: Option<&str>,
    ) -> Result<bool>;

    /// Persist `chunks` and move PROCESSING to READY in one transaction.
    ///
    /// Returns `false` (and writes nothing) when the document is not PROCESSING.
    async fn mark_ready(&self, id: Uuid, chunks: &[Chunk], extractor: &str) -> Result<bool>;

    /// Move PROCESSING to FAILED with a reason.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool> {
        self.transition_status(id, DocumentStatus::Processing, DocumentStatus::Failed, Some(reason))
            .await
    }

    /// Swap the chunk rows of a READY document, returning the rows replaced.
    async fn replace_chunks(&self, id: Uuid, chunks: &[Chunk], extractor: &str) -> Result<Vec<Chunk>>;

    /// Chunks of one document, in ordinal order.
    async fn list_chunks(&self, document_id: Uuid) -> Result<Vec<Chunk>>;

    /// Chunks by vector id. Unknown ids are skipped.
    async fn get_chunks(&self, vector_ids: &[String]) -> Result<Vec<Chunk>>;

    /// Delete a document and its chunks, returning what was removed.
    ///
    /// Fails with `Conflict` while the document is PROCESSING.
    async fn delete_document(&self, id: Uuid) -> Result<Option<(Document, Vec<Chunk>)>>;

    /// Bytes of uploaded files across the account's classrooms.
    async fn storage_used(&self, account_id: &str) -> Result<u64>;

    async fn insert_artifact(&self, artifact: &GeneratedArtifact) -> Result<()>;

    async fn get_artifact(&self, id: Uuid) -> Result<Option<GeneratedArtifact>>;

    /// Artifacts of a classroom, newest first.
    async fn list_artifacts(&self, classroom_id: Uuid) -> Result<Vec<GeneratedArtifact>>;

    async fn delete_artifact(&self, id: Uuid) -> Result<bool>;

    /// Weighted tokens recorded for `day`.
    async fn usage_for_day(&self, account_id: &str, day: NaiveDate) -> Result<u64>;

    /// Atomically add to the day's counter, returning the new total.
    async fn add_usage(&self, account_id: &str, day: NaiveDate, weighted_tokens: u64) -> Result<u64>;
}

/// Account tier lookup.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Unknown accounts are FREE.
    async fn get_tier(&self, account_id: &str) -> Result<AccountTier>;

    async fn set_tier(&self, account_id: &str, tier: AccountTier) -> Result<()>;
}
