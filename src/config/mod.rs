//! Configuration module for Studydesk.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{ChatPrompts, Prompts, StudyPrompts, VisionPrompts};
pub use settings::{
    ChunkingSettings, CompletionSettings, EmbeddingProvider, EmbeddingSettings,
    ExtractionSettings, ExtractorKind, ExtractorRule, GeneralSettings, PromptSettings,
    RagSettings, RetrySettings, ServerSettings, Settings, StorageSettings, TierLimits,
    TierSettings, UsageWeights, VectorIndexSettings, ENV_PREFIX,
};
