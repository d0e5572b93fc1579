//! End-to-end scenarios over the public API with in-memory collaborators.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use studydesk::app::{App, Components};
use studydesk::config::{Prompts, Settings};
use studydesk::embedding::{Embedder, HashingEmbedder};
use studydesk::generation::{Completion, CompletionClient, CompletionRequest, GenerationRequest};
use studydesk::models::{
    ArtifactKind, ArtifactPayload, Classroom, Document, DocumentStatus, GenerationMode,
};
use studydesk::object_store::MemoryObjectStore;
use studydesk::store::{MetadataStore, SqliteMetadataStore};
use studydesk::vector_index::{namespace, MemoryVectorIndex, VectorIndex};
use studydesk::{Result, StudyError};
use uuid::Uuid;

const ACCOUNT: &str = "acct-1";

const CELL_NOTES: &str = "Mitochondria produce ATP for the cell. Mitochondria are the \
powerhouse of the cell and produce ATP through cellular respiration.\n\n\
Inside mitochondria, the electron transport chain pumps protons so ATP synthase \
can produce ATP. Mitochondria also keep their own DNA.\n\n\
Cells with high energy demand, such as muscle cells, contain many mitochondria \
to produce enough ATP.\u{000C}Photosynthesis happens in chloroplasts. Chloroplasts \
capture sunlight and convert carbon dioxide and water into glucose.\n\n\
Chlorophyll inside chloroplasts absorbs red and blue light. Photosynthesis \
releases oxygen as a byproduct.\n\n\
The Calvin cycle in chloroplasts fixes carbon dioxide into sugar during photosynthesis.";

const HISTORY_NOTES: &str = "The Treaty of Westphalia ended the Thirty Years War in 1648. \
Diplomats negotiated the treaty in Osnabruck and Munster.\n\n\
The treaty established principles of territorial sovereignty across European states.";

/// Hashing embedder that counts calls and can fail one batch call.
struct CountingEmbedder {
    inner: HashingEmbedder,
    query_calls: AtomicUsize,
    batch_calls: AtomicUsize,
    /// 1-based batch call that fails as if retries were exhausted.
    fail_batch: Option<usize>,
}

impl CountingEmbedder {
    fn new(fail_batch: Option<usize>) -> Self {
        Self {
            inner: HashingEmbedder::new(1024),
            query_calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
            fail_batch,
        }
    }

    fn calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst) + self.batch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_batch == Some(call) {
            return Err(StudyError::Embedding(
                "retries exhausted: service unavailable".to_string(),
            ));
        }
        self.inner.embed_batch(texts).await
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }
}

/// Completion client replaying queued replies, then a fixed answer.
struct ScriptedCompletion {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

impl ScriptedCompletion {
    fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn push(&self, reply: impl Into<String>) {
        self.replies.lock().unwrap().push_back(reply.into());
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionClient for ScriptedCompletion {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "Mitochondria make ATP.".to_string());
        Ok(Completion {
            text,
            prompt_tokens: 200,
            completion_tokens: 50,
        })
    }
}

struct Fixture {
    app: App,
    store: Arc<SqliteMetadataStore>,
    index: Arc<MemoryVectorIndex>,
    embedder: Arc<CountingEmbedder>,
    completion: Arc<ScriptedCompletion>,
    settings: Settings,
}

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.chunking.chunk_size = 200;
    settings.chunking.chunk_overlap = 20;
    settings.embedding.batch_size = 2;
    settings.embedding.max_concurrent_batches = 1;
    settings
}

fn fixture_with(settings: Settings, fail_batch: Option<usize>) -> Fixture {
    let store = Arc::new(SqliteMetadataStore::in_memory().unwrap());
    fixture_on(store, settings, fail_batch)
}

fn fixture_on(store: Arc<SqliteMetadataStore>, settings: Settings, fail_batch: Option<usize>) -> Fixture {
    let index = Arc::new(MemoryVectorIndex::new());
    let embedder = Arc::new(CountingEmbedder::new(fail_batch));
    let completion = Arc::new(ScriptedCompletion::new());

    let components = Components {
        store: store.clone(),
        accounts: store.clone(),
        objects: Arc::new(MemoryObjectStore::new()),
        index: index.clone(),
        embedder: embedder.clone(),
        completion: completion.clone(),
        vision: None,
    };
    let app = App::with_components(settings.clone(), Prompts::builtin(), components);

    Fixture {
        app,
        store,
        index,
        embedder,
        completion,
        settings,
    }
}

fn fixture() -> Fixture {
    fixture_with(test_settings(), None)
}

impl Fixture {
    async fn classroom(&self, name: &str) -> Classroom {
        self.app.create_classroom(ACCOUNT, name).await.unwrap()
    }

    async fn ingest(&self, classroom: &Classroom, filename: &str, text: &str) -> Document {
        let ingestion = self.app.ingestion();
        let doc = ingestion
            .upload(ACCOUNT, classroom.id, filename, Some("text/plain"), text.as_bytes())
            .await
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Pending);
        ingestion.ingest(ACCOUNT, doc.id).await.unwrap()
    }

    async fn vector_count(&self, doc: &Document) -> usize {
        let ns = namespace(&self.settings.vector_index.namespace_prefix, doc.classroom_id);
        self.index.count(&ns, doc.id).await.unwrap()
    }

    fn chat(&self, classroom: &Classroom, question: &str, documents: &[Uuid]) -> GenerationRequest {
        GenerationRequest {
            account_id: ACCOUNT.to_string(),
            classroom_id: classroom.id,
            question: Some(question.to_string()),
            document_ids: documents.to_vec(),
            ..Default::default()
        }
    }
}

fn flashcards_json(n: usize) -> String {
    let cards: Vec<_> = (0..n)
        .map(|i| serde_json::json!({"front": format!("What do mitochondria make? ({})", i), "back": "ATP"}))
        .collect();
    serde_json::json!({ "flashcards": cards }).to_string()
}

#[tokio::test]
async fn test_two_page_upload_then_grounded_chat() {
    let fx = fixture();
    let classroom = fx.classroom("Biology").await;

    let doc = fx.ingest(&classroom, "cells.txt", CELL_NOTES).await;
    assert_eq!(doc.status, DocumentStatus::Ready);
    assert_eq!(doc.extractor.as_deref(), Some("plain_text"));

    let chunks = fx.store.list_chunks(doc.id).await.unwrap();
    assert!(!chunks.is_empty());
    assert_eq!(fx.vector_count(&doc).await, chunks.len());
    assert_eq!(chunks.first().unwrap().page, Some(1));
    assert_eq!(chunks.last().unwrap().page, Some(2));

    let artifact = fx
        .app
        .generation()
        .generate(
            ArtifactKind::ChatAnswer,
            fx.chat(&classroom, "How do mitochondria produce ATP?", &[]),
        )
        .await
        .unwrap();
    assert_eq!(artifact.mode, GenerationMode::DocumentGrounded);
    assert_eq!(artifact.source_document_ids(), vec![doc.id]);
    assert!(matches!(
        artifact.payload,
        ArtifactPayload::ChatAnswer { has_relevant_context: true, .. }
    ));

    let artifact = fx
        .app
        .generation()
        .generate(
            ArtifactKind::ChatAnswer,
            fx.chat(&classroom, "Who won the football championship in 1998?", &[]),
        )
        .await
        .unwrap();
    assert_eq!(artifact.mode, GenerationMode::GeneralKnowledge);
    assert!(artifact.sources.is_empty());
    assert!(matches!(
        artifact.payload,
        ArtifactPayload::ChatAnswer { has_relevant_context: false, .. }
    ));

    // Both answers are persisted and counted against today's budget.
    assert_eq!(fx.app.list_artifacts(ACCOUNT, classroom.id).await.unwrap().len(), 2);
    assert!(fx.app.usage(ACCOUNT).await.unwrap().weighted_tokens > 0);
}

#[tokio::test]
async fn test_flashcards_count_and_malformed_output() {
    let fx = fixture();
    let classroom = fx.classroom("Biology").await;
    let doc = fx.ingest(&classroom, "cells.txt", CELL_NOTES).await;

    let request = GenerationRequest {
        account_id: ACCOUNT.to_string(),
        classroom_id: classroom.id,
        title: Some("Cell energy".to_string()),
        document_ids: vec![doc.id],
        count: Some(10),
        ..Default::default()
    };

    fx.completion.push(flashcards_json(10));
    let artifact = fx
        .app
        .generation()
        .generate(ArtifactKind::Flashcards, request.clone())
        .await
        .unwrap();
    match &artifact.payload {
        ArtifactPayload::Flashcards { cards } => assert_eq!(cards.len(), 10),
        other => panic!("unexpected payload: {:?}", other),
    }
    assert_eq!(artifact.source_document_ids(), vec![doc.id]);

    fx.completion.push("Sure! Here are some flashcards: front/back pairs...");
    let err = fx
        .app
        .generation()
        .generate(ArtifactKind::Flashcards, request)
        .await
        .unwrap_err();
    assert!(matches!(err, StudyError::Generation(_)));

    // Only the successful request left an artifact behind.
    assert_eq!(fx.app.list_artifacts(ACCOUNT, classroom.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_usage_write_failure_keeps_the_answer() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("metadata.db");
    let fx = fixture_on(
        Arc::new(SqliteMetadataStore::new(&db).unwrap()),
        test_settings(),
        None,
    );
    let classroom = fx.classroom("Biology").await;

    // Reads keep working; every write to the usage table is refused.
    rusqlite::Connection::open(&db)
        .unwrap()
        .execute_batch(
            "CREATE TRIGGER usage_no_insert BEFORE INSERT ON usage \
               BEGIN SELECT RAISE(ABORT, 'usage is read-only'); END; \
             CREATE TRIGGER usage_no_update BEFORE UPDATE ON usage \
               BEGIN SELECT RAISE(ABORT, 'usage is read-only'); END;",
        )
        .unwrap();

    let artifact = fx
        .app
        .generation()
        .generate(ArtifactKind::ChatAnswer, fx.chat(&classroom, "What is ATP?", &[]))
        .await
        .unwrap();

    assert_eq!(fx.completion.calls(), 1);
    let stored = fx.app.list_artifacts(ACCOUNT, classroom.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].id, artifact.id);
}

#[tokio::test]
async fn test_general_summary_requires_topic() {
    let fx = fixture();
    let classroom = fx.classroom("Biology").await;

    let request = GenerationRequest {
        account_id: ACCOUNT.to_string(),
        classroom_id: classroom.id,
        title: Some("Overview".to_string()),
        ..Default::default()
    };
    let err = fx
        .app
        .generation()
        .generate(ArtifactKind::Summary, request)
        .await
        .unwrap_err();

    assert!(matches!(err, StudyError::Validation(_)));
    assert_eq!(fx.embedder.calls(), 0);
    assert_eq!(fx.completion.calls(), 0);
}

#[tokio::test]
async fn test_grounded_quiz_without_relevant_context_fails() {
    let fx = fixture();
    let classroom = fx.classroom("Biology").await;
    let doc = fx.ingest(&classroom, "cells.txt", CELL_NOTES).await;

    let request = GenerationRequest {
        account_id: ACCOUNT.to_string(),
        classroom_id: classroom.id,
        title: Some("Sports".to_string()),
        focus_topic: Some("football championship winners".to_string()),
        document_ids: vec![doc.id],
        ..Default::default()
    };
    let err = fx
        .app
        .generation()
        .generate(ArtifactKind::Quiz, request)
        .await
        .unwrap_err();

    assert!(matches!(err, StudyError::NoRelevantContext));
    assert_eq!(fx.completion.calls(), 0);
}

#[tokio::test]
async fn test_quota_rejects_before_external_calls() {
    let mut settings = test_settings();
    settings.tiers.free.daily_weighted_tokens = 1_000;
    let fx = fixture_with(settings, None);
    let classroom = fx.classroom("Biology").await;

    let today = fx.app.quota().today();
    fx.store.add_usage(ACCOUNT, today, 999).await.unwrap();

    let err = fx
        .app
        .generation()
        .generate(
            ArtifactKind::ChatAnswer,
            fx.chat(&classroom, "How do mitochondria produce ATP?", &[]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, StudyError::QuotaExceeded(_)));
    assert_eq!(fx.embedder.calls(), 0);
    assert_eq!(fx.completion.calls(), 0);
    assert_eq!(fx.app.usage(ACCOUNT).await.unwrap().weighted_tokens, 999);
}

#[tokio::test]
async fn test_retrieval_stays_inside_scope() {
    let fx = fixture();
    let biology = fx.classroom("Biology").await;
    let cells = fx.ingest(&biology, "cells.txt", CELL_NOTES).await;
    let history = fx.ingest(&biology, "history.txt", HISTORY_NOTES).await;

    // Scoped to the history notes, a biology question finds nothing.
    let artifact = fx
        .app
        .generation()
        .generate(
            ArtifactKind::ChatAnswer,
            fx.chat(&biology, "How do mitochondria produce ATP?", &[history.id]),
        )
        .await
        .unwrap();
    assert!(!artifact.source_document_ids().contains(&cells.id));

    let artifact = fx
        .app
        .generation()
        .generate(
            ArtifactKind::ChatAnswer,
            fx.chat(&biology, "Which treaty ended the Thirty Years War?", &[history.id]),
        )
        .await
        .unwrap();
    assert_eq!(artifact.source_document_ids(), vec![history.id]);

    // Another classroom has no READY documents: no embedding call at all.
    let empty = fx.classroom("Chemistry").await;
    let before = fx.embedder.calls();
    let artifact = fx
        .app
        .generation()
        .generate(
            ArtifactKind::ChatAnswer,
            fx.chat(&empty, "How do mitochondria produce ATP?", &[]),
        )
        .await
        .unwrap();
    assert_eq!(fx.embedder.calls(), before);
    assert_eq!(artifact.mode, GenerationMode::GeneralKnowledge);

    // Documents from another classroom cannot be named in scope.
    let err = fx
        .app
        .generation()
        .generate(
            ArtifactKind::ChatAnswer,
            fx.chat(&empty, "How do mitochondria produce ATP?", &[cells.id]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, StudyError::NotFound(_)));
}

#[tokio::test]
async fn test_reindex_leaves_no_duplicates() {
    let fx = fixture();
    let classroom = fx.classroom("Biology").await;
    let doc = fx.ingest(&classroom, "cells.txt", CELL_NOTES).await;
    let first = fx.store.list_chunks(doc.id).await.unwrap();

    // A second claim of a READY document is refused.
    let err = fx.app.ingestion().ingest(ACCOUNT, doc.id).await.unwrap_err();
    assert!(matches!(err, StudyError::Conflict(_)));

    let count = fx.app.ingestion().reindex(ACCOUNT, doc.id).await.unwrap();
    let second = fx.store.list_chunks(doc.id).await.unwrap();

    assert_eq!(count, second.len());
    assert_eq!(first.len(), second.len());
    assert_eq!(fx.vector_count(&doc).await, second.len());
    assert_eq!(fx.index.len().unwrap(), second.len());
    assert!(first.iter().all(|old| second.iter().all(|new| new.id != old.id)));
}

#[tokio::test]
async fn test_embedding_failure_marks_document_failed() {
    let fx = fixture_with(test_settings(), Some(2));
    let classroom = fx.classroom("Biology").await;

    let ingestion = fx.app.ingestion();
    let doc = ingestion
        .upload(ACCOUNT, classroom.id, "cells.txt", None, CELL_NOTES.as_bytes())
        .await
        .unwrap();
    let err = ingestion.ingest(ACCOUNT, doc.id).await.unwrap_err();
    assert!(matches!(err, StudyError::Embedding(_)));

    let doc = fx.app.document(ACCOUNT, doc.id).await.unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert!(doc.failure_reason.is_some());
    assert!(fx.store.list_chunks(doc.id).await.unwrap().is_empty());
    assert_eq!(fx.vector_count(&doc).await, 0);
    assert!(fx.index.is_empty().unwrap());
    assert_eq!(fx.embedder.batch_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_classroom_cap_and_delete() {
    let fx = fixture();
    for name in ["One", "Two", "Three"] {
        fx.classroom(name).await;
    }
    let err = fx.app.create_classroom(ACCOUNT, "Four").await.unwrap_err();
    assert!(matches!(err, StudyError::QuotaExceeded(_)));

    let classrooms = fx.app.list_classrooms(ACCOUNT).await.unwrap();
    let doc = fx.ingest(&classrooms[0], "cells.txt", CELL_NOTES).await;
    assert!(fx.app.usage(ACCOUNT).await.unwrap().storage_bytes > 0);

    fx.app.ingestion().delete_document(ACCOUNT, doc.id).await.unwrap();
    assert!(matches!(
        fx.app.document(ACCOUNT, doc.id).await,
        Err(StudyError::NotFound(_))
    ));
    assert_eq!(fx.vector_count(&doc).await, 0);
    assert_eq!(fx.app.usage(ACCOUNT).await.unwrap().storage_bytes, 0);
}
