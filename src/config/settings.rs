//! Configuration settings for Studydesk.

use crate::error::{Result, StudyError};
use crate::models::AccountTier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides, e.g. `STUDYDESK__RAG__RELEVANCE_THRESHOLD=0.4`.
pub const ENV_PREFIX: &str = "STUDYDESK__";

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub server: ServerSettings,
    pub embedding: EmbeddingSettings,
    pub completion: CompletionSettings,
    pub vector_index: VectorIndexSettings,
    pub storage: StorageSettings,
    pub chunking: ChunkingSettings,
    pub retry: RetrySettings,
    pub rag: RagSettings,
    pub extraction: ExtractionSettings,
    pub tiers: TierSettings,
    pub weights: UsageWeights,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.studydesk".to_string(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Largest accepted upload body.
    pub max_upload_bytes: usize,
    /// Allow cross-origin requests from any origin.
    pub permissive_cors: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            max_upload_bytes: 25 * 1024 * 1024,
            permissive_cors: true,
        }
    }
}

/// Embedding provider type.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// OpenAI-compatible embeddings endpoint.
    #[default]
    OpenAI,
    /// Offline feature-hashing embedder.
    Hashing,
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(EmbeddingProvider::OpenAI),
            "hashing" | "local" => Ok(EmbeddingProvider::Hashing),
            _ => Err(format!("Unknown embedding provider: {}", s)),
        }
    }
}

/// Embedding generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: EmbeddingProvider,
    pub model: String,
    pub dimensions: u32,
    /// Override for the API base URL (OpenAI-compatible servers).
    pub api_base: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Passages per embedding call.
    pub batch_size: usize,
    /// Embedding calls in flight per document.
    pub max_concurrent_batches: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: EmbeddingProvider::OpenAI,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            api_base: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            batch_size: 64,
            max_concurrent_batches: 2,
        }
    }
}

/// Completion service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionSettings {
    /// Model for answers, flashcards, quizzes and summaries.
    pub model: String,
    /// Vision-capable model for image descriptions.
    pub vision_model: String,
    pub api_base: Option<String>,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            vision_model: "gpt-4o-mini".to_string(),
            api_base: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.4,
            max_output_tokens: 2048,
        }
    }
}

/// Vector index settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorIndexSettings {
    /// Vector index provider (sqlite, memory).
    pub provider: String,
    /// Path to the SQLite index (for sqlite provider).
    pub sqlite_path: String,
    /// Prefix for per-classroom namespaces.
    pub namespace_prefix: String,
}

impl Default for VectorIndexSettings {
    fn default() -> Self {
        Self {
            provider: "sqlite".to_string(),
            sqlite_path: "~/.studydesk/vectors.db".to_string(),
            namespace_prefix: "studydesk".to_string(),
        }
    }
}

/// Metadata and object storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub metadata_path: String,
    pub objects_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            metadata_path: "~/.studydesk/metadata.db".to_string(),
            objects_dir: "~/.studydesk/objects".to_string(),
        }
    }
}

/// Passage chunking settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Maximum passage length in bytes.
    pub chunk_size: usize,
    /// Bytes shared between consecutive passages.
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 100,
        }
    }
}

/// Retry and timeout policy for external calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-call timeout; a timeout counts as a transient failure.
    pub call_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            call_timeout_secs: 120,
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RagSettings {
    /// Minimum top-passage cosine similarity for a result to count as relevant.
    pub relevance_threshold: f32,
    /// Passages at or above the threshold required for relevance.
    pub min_relevant_passages: usize,
    /// Passages retrieved per query.
    pub top_k: usize,
    /// Upper bound on passage text placed in a prompt.
    pub max_context_chars: usize,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.3,
            min_relevant_passages: 1,
            top_k: 8,
            max_context_chars: 12_000,
        }
    }
}

/// Text extractor implementations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// UTF-8 text and markdown.
    PlainText,
    /// Text layer of a PDF.
    PdfText,
    /// Vision model: text layer plus image descriptions.
    Vision,
}

impl ExtractorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractorKind::PlainText => "plain_text",
            ExtractorKind::PdfText => "pdf_text",
            ExtractorKind::Vision => "vision",
        }
    }
}

impl std::fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the (tier, MIME type) extractor table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractorRule {
    pub tier: AccountTier,
    /// Exact MIME type or a `type/*` pattern.
    pub mime: String,
    pub primary: ExtractorKind,
    #[serde(default)]
    pub fallback: Option<ExtractorKind>,
}

impl ExtractorRule {
    fn new(tier: AccountTier, mime: &str, primary: ExtractorKind, fallback: Option<ExtractorKind>) -> Self {
        Self {
            tier,
            mime: mime.to_string(),
            primary,
            fallback,
        }
    }
}

/// Extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub rules: Vec<ExtractorRule>,
    /// Images described per document by the vision extractor.
    pub max_images_per_document: usize,
    /// Budgeted tokens per described image, used for quota estimates.
    pub estimated_tokens_per_image: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        use AccountTier::{Free, Premium};
        use ExtractorKind::{PdfText, PlainText, Vision};

        Self {
            rules: vec![
                ExtractorRule::new(Free, "application/pdf", PdfText, None),
                ExtractorRule::new(Free, "text/*", PlainText, None),
                ExtractorRule::new(Premium, "application/pdf", Vision, Some(PdfText)),
                ExtractorRule::new(Premium, "image/png", Vision, None),
                ExtractorRule::new(Premium, "image/jpeg", Vision, None),
                ExtractorRule::new(Premium, "text/*", PlainText, None),
            ],
            max_images_per_document: 8,
            estimated_tokens_per_image: 1_000,
        }
    }
}

/// Resource caps for one tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TierLimits {
    pub max_classrooms: u32,
    pub max_storage_bytes: u64,
    pub daily_weighted_tokens: u64,
}

impl Default for TierLimits {
    fn default() -> Self {
        Self {
            max_classrooms: 3,
            max_storage_bytes: 100 * 1024 * 1024,
            daily_weighted_tokens: 50_000,
        }
    }
}

/// Limits table keyed by tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    pub free: TierLimits,
    pub premium: TierLimits,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            free: TierLimits::default(),
            premium: TierLimits {
                max_classrooms: 50,
                max_storage_bytes: 5 * 1024 * 1024 * 1024,
                daily_weighted_tokens: 1_000_000,
            },
        }
    }
}

impl TierSettings {
    pub fn limits(&self, tier: AccountTier) -> &TierLimits {
        match tier {
            AccountTier::Free => &self.free,
            AccountTier::Premium => &self.premium,
        }
    }
}

/// Multipliers turning raw provider tokens into weighted tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UsageWeights {
    pub embedding: f64,
    pub completion_input: f64,
    pub completion_output: f64,
    pub vision: f64,
}

impl Default for UsageWeights {
    fn default() -> Self {
        Self {
            embedding: 0.1,
            completion_input: 1.0,
            completion_output: 3.0,
            vision: 5.0,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from a specific path, or default location if None.
    ///
    /// Environment overrides are applied on top of the file, then the result is validated.
    pub fn load_from(path: Option<&PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        let content = if config_path.exists() {
            std::fs::read_to_string(&config_path)?
        } else {
            String::new()
        };

        let settings = Self::from_toml_with_env(&content, std::env::vars())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse TOML and apply `STUDYDESK__SECTION__KEY` overrides from `vars`.
    pub fn from_toml_with_env(
        content: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut root: toml::Table = toml::from_str(content)?;

        for (key, value) in vars {
            let Some(path) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let segments: Vec<String> = path
                .split("__")
                .filter(|s| !s.is_empty())
                .map(|s| s.to_lowercase())
                .collect();
            if segments.is_empty() {
                continue;
            }
            set_path(&mut root, &segments, parse_env_value(&value));
        }

        let settings: Settings = toml::Value::Table(root).try_into()?;
        Ok(settings)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let chunking = &self.chunking;
        if chunking.chunk_size < 32 {
            return Err(StudyError::Config(format!(
                "chunking.chunk_size must be at least 32 (got {})",
                chunking.chunk_size
            )));
        }
        if chunking.chunk_overlap * 2 >= chunking.chunk_size {
            return Err(StudyError::Config(format!(
                "chunking.chunk_overlap ({}) must be less than half of chunk_size ({})",
                chunking.chunk_overlap, chunking.chunk_size
            )));
        }
        if !(-1.0..=1.0).contains(&self.rag.relevance_threshold) {
            return Err(StudyError::Config(format!(
                "rag.relevance_threshold must be within [-1, 1] (got {})",
                self.rag.relevance_threshold
            )));
        }
        if self.rag.top_k == 0 {
            return Err(StudyError::Config("rag.top_k must be positive".to_string()));
        }
        if self.embedding.batch_size == 0 || self.embedding.max_concurrent_batches == 0 {
            return Err(StudyError::Config(
                "embedding.batch_size and embedding.max_concurrent_batches must be positive".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(StudyError::Config("retry.max_attempts must be positive".to_string()));
        }
        for base in [&self.embedding.api_base, &self.completion.api_base]
            .into_iter()
            .flatten()
        {
            url::Url::parse(base)
                .map_err(|e| StudyError::Config(format!("Invalid api_base '{}': {}", base, e)))?;
        }
        Ok(())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| StudyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("studydesk")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded metadata database path.
    pub fn metadata_path(&self) -> PathBuf {
        Self::expand_path(&self.storage.metadata_path)
    }

    /// Get the expanded object store directory.
    pub fn objects_dir(&self) -> PathBuf {
        Self::expand_path(&self.storage.objects_dir)
    }

    /// Get the expanded vector index path.
    pub fn vector_index_path(&self) -> PathBuf {
        Self::expand_path(&self.vector_index.sqlite_path)
    }
}

/// Parse an override as a TOML literal (numbers, booleans, arrays), else keep it as a string.
fn parse_env_value(raw: &str) -> toml::Value {
    toml::from_str::<toml::Table>(&format!("v = {}", raw))
        .ok()
        .and_then(|mut t| t.remove("v"))
        .unwrap_or_else(|| toml::Value::String(raw.to_string()))
}

fn set_path(table: &mut toml::Table, path: &[String], value: toml::Value) {
    match path {
        [] => {}
        [last] => {
            table.insert(last.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = table
                .entry(head.clone())
                .or_insert_with(|| toml::Value::Table(toml::Table::new()));
            if !entry.is_table() {
                *entry = toml::Value::Table(toml::Table::new());
            }
            if let toml::Value::Table(inner) = entry {
                set_path(inner, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.chunking.chunk_size, 800);
        assert_eq!(settings.chunking.chunk_overlap, 100);
        assert!((settings.rag.relevance_threshold - 0.3).abs() < f32::EPSILON);
    }

    #[test]
    fn test_env_overrides_replace_file_values() {
        let toml = r#"
            [rag]
            relevance_threshold = 0.5
            top_k = 4
        "#;
        let vars = vec![
            ("STUDYDESK__RAG__RELEVANCE_THRESHOLD".to_string(), "0.42".to_string()),
            ("STUDYDESK__COMPLETION__MODEL".to_string(), "gpt-4.1-mini".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ];

        let settings = Settings::from_toml_with_env(toml, vars).unwrap();
        assert!((settings.rag.relevance_threshold - 0.42).abs() < 1e-6);
        assert_eq!(settings.rag.top_k, 4);
        assert_eq!(settings.completion.model, "gpt-4.1-mini");
    }

    #[test]
    fn test_extraction_rules_from_toml() {
        let toml = r#"
            [extraction]
            rules = [
                { tier = "FREE", mime = "application/pdf", primary = "pdf_text" },
                { tier = "PREMIUM", mime = "application/pdf", primary = "vision", fallback = "pdf_text" },
            ]
        "#;
        let settings = Settings::from_toml_with_env(toml, Vec::new()).unwrap();
        assert_eq!(settings.extraction.rules.len(), 2);
        assert_eq!(settings.extraction.rules[1].fallback, Some(ExtractorKind::PdfText));
    }

    #[test]
    fn test_validate_rejects_large_overlap() {
        let mut settings = Settings::default();
        settings.chunking.chunk_overlap = 400;
        assert!(matches!(settings.validate(), Err(StudyError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_api_base() {
        let mut settings = Settings::default();
        settings.embedding.api_base = Some("not a url".to_string());
        assert!(settings.validate().is_err());
    }
}
