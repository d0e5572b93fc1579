//! Core records shared by the ingestion and generation pipelines.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Account tier, as reported by the account service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccountTier {
    #[default]
    Free,
    Premium,
}

impl AccountTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountTier::Free => "FREE",
            AccountTier::Premium => "PREMIUM",
        }
    }
}

impl std::str::FromStr for AccountTier {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(AccountTier::Free),
            "premium" | "paid" => Ok(AccountTier::Premium),
            _ => Err(format!("Unknown account tier: {}", s)),
        }
    }
}

impl std::fmt::Display for AccountTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Ready,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Processing => "PROCESSING",
            DocumentStatus::Ready => "READY",
            DocumentStatus::Failed => "FAILED",
        }
    }

    /// Allowed edges: PENDING -> PROCESSING -> READY | FAILED.
    pub fn can_transition_to(&self, next: DocumentStatus) -> bool {
        matches!(
            (self, next),
            (DocumentStatus::Pending, DocumentStatus::Processing)
                | (DocumentStatus::Processing, DocumentStatus::Ready)
                | (DocumentStatus::Processing, DocumentStatus::Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DocumentStatus::Ready | DocumentStatus::Failed)
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "PENDING" => Ok(DocumentStatus::Pending),
            "PROCESSING" => Ok(DocumentStatus::Processing),
            "READY" => Ok(DocumentStatus::Ready),
            "FAILED" => Ok(DocumentStatus::Failed),
            _ => Err(format!("Unknown document status: {}", s)),
        }
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classroom groups documents and generated artifacts for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classroom {
    pub id: Uuid,
    pub account_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Classroom {
    pub fn new(account_id: &str, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            name: name.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// An uploaded file and its ingestion state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: Uuid,
    pub classroom_id: Uuid,
    pub filename: String,
    pub mime_type: String,
    pub byte_size: u64,
    pub storage_key: String,
    pub status: DocumentStatus,
    /// Extractor that produced the indexed text.
    pub extractor: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a new PENDING document record.
    pub fn new(
        classroom_id: Uuid,
        filename: &str,
        mime_type: &str,
        byte_size: u64,
        storage_key: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            classroom_id,
            filename: filename.to_string(),
            mime_type: mime_type.to_string(),
            byte_size,
            storage_key,
            status: DocumentStatus::Pending,
            extractor: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A passage of a document's extracted text, the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: Uuid,
    pub document_id: Uuid,
    /// Zero-based, dense position within the document.
    pub ordinal: u32,
    pub content: String,
    /// Opaque id of the vector in the index.
    pub vector_id: String,
    /// 1-based page, when the extractor reported page breaks.
    pub page: Option<u32>,
    pub start_offset: usize,
    pub end_offset: usize,
}

impl Chunk {
    /// Deterministic chunk id for a given ingestion generation and ordinal.
    ///
    /// Replaying the same generation yields the same ids, so vector upserts overwrite.
    pub fn derive_id(document_id: Uuid, generation: Uuid, ordinal: u32) -> Uuid {
        Uuid::new_v5(&document_id, format!("{}:{}", generation, ordinal).as_bytes())
    }
}

/// Whether an artifact is derived from retrieved passages or from model knowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationMode {
    DocumentGrounded,
    GeneralKnowledge,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::DocumentGrounded => "DOCUMENT_GROUNDED",
            GenerationMode::GeneralKnowledge => "GENERAL_KNOWLEDGE",
        }
    }
}

impl std::str::FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "DOCUMENT_GROUNDED" => Ok(GenerationMode::DocumentGrounded),
            "GENERAL_KNOWLEDGE" => Ok(GenerationMode::GeneralKnowledge),
            _ => Err(format!("Unknown generation mode: {}", s)),
        }
    }
}

/// Kind of artifact the generation pipeline produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactKind {
    ChatAnswer,
    Flashcards,
    Quiz,
    Summary,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::ChatAnswer => "CHAT_ANSWER",
            ArtifactKind::Flashcards => "FLASHCARDS",
            ArtifactKind::Quiz => "QUIZ",
            ArtifactKind::Summary => "SUMMARY",
        }
    }

    /// Study artifacts are graded material and must not silently lose their grounding.
    pub fn is_study_artifact(&self) -> bool {
        !matches!(self, ArtifactKind::ChatAnswer)
    }
}

impl std::str::FromStr for ArtifactKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CHAT_ANSWER" | "CHAT" => Ok(ArtifactKind::ChatAnswer),
            "FLASHCARDS" => Ok(ArtifactKind::Flashcards),
            "QUIZ" => Ok(ArtifactKind::Quiz),
            "SUMMARY" => Ok(ArtifactKind::Summary),
            _ => Err(format!("Unknown artifact kind: {}", s)),
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub front: String,
    pub back: String,
}

/// A multiple-choice question with exactly one correct option.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Target length band for summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SummaryLength {
    Short,
    #[default]
    Medium,
    Long,
}

impl SummaryLength {
    /// Inclusive word-count band.
    pub fn word_band(&self) -> (u32, u32) {
        match self {
            SummaryLength::Short => (80, 150),
            SummaryLength::Medium => (200, 350),
            SummaryLength::Long => (450, 700),
        }
    }
}

impl std::str::FromStr for SummaryLength {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "short" => Ok(SummaryLength::Short),
            "medium" => Ok(SummaryLength::Medium),
            "long" => Ok(SummaryLength::Long),
            _ => Err(format!("Unknown summary length: {}", s)),
        }
    }
}

/// A document a generated artifact drew from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRef {
    pub document_id: Uuid,
    pub filename: String,
}

/// Kind-specific content of a generated artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactPayload {
    #[serde(rename_all = "camelCase")]
    ChatAnswer {
        question: String,
        answer: String,
        has_relevant_context: bool,
    },
    Flashcards { cards: Vec<Flashcard> },
    Quiz { questions: Vec<QuizQuestion> },
    Summary { text: String },
}

impl ArtifactPayload {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            ArtifactPayload::ChatAnswer { .. } => ArtifactKind::ChatAnswer,
            ArtifactPayload::Flashcards { .. } => ArtifactKind::Flashcards,
            ArtifactPayload::Quiz { .. } => ArtifactKind::Quiz,
            ArtifactPayload::Summary { .. } => ArtifactKind::Summary,
        }
    }
}

/// A flashcard set, quiz, summary or chat answer produced by the generation pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedArtifact {
    pub id: Uuid,
    pub classroom_id: Uuid,
    pub title: String,
    pub focus_topic: Option<String>,
    pub mode: GenerationMode,
    /// Empty for general-knowledge artifacts.
    pub sources: Vec<SourceRef>,
    pub payload: ArtifactPayload,
    pub created_at: DateTime<Utc>,
}

impl GeneratedArtifact {
    pub fn kind(&self) -> ArtifactKind {
        self.payload.kind()
    }

    pub fn source_document_ids(&self) -> Vec<Uuid> {
        self.sources.iter().map(|s| s.document_id).collect()
    }
}

/// Per-account usage for one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounter {
    pub account_id: String,
    pub day: NaiveDate,
    pub weighted_tokens: u64,
    pub classroom_count: u32,
    pub storage_bytes: u64,
}
