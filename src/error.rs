//! Error types for Studydesk.

use thiserror::Error;

/// Library-level error type for Studydesk operations.
#[derive(Error, Debug)]
pub enum StudyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    #[error("Vector index error: {0}")]
    Index(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("No relevant context found in the selected documents")]
    NoRelevantContext,

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// A failure worth retrying (timeouts, connection resets, 5xx, busy database).
    #[error("Transient service error: {0}")]
    Transient(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StudyError {
    /// Whether the retry policy should try the call again.
    pub fn is_transient(&self) -> bool {
        match self {
            StudyError::Transient(_) => true,
            StudyError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Convert a leftover transient failure into a component error once retries are spent.
    pub fn exhausted(self, wrap: fn(String) -> StudyError) -> StudyError {
        if self.is_transient() {
            wrap(format!("retries exhausted: {}", self))
        } else {
            self
        }
    }

    /// Short machine-readable code, used by the HTTP layer.
    pub fn code(&self) -> &'static str {
        match self {
            StudyError::Config(_) => "config",
            StudyError::Extraction(_) => "extraction_error",
            StudyError::Embedding(_) => "embedding_error",
            StudyError::Index(_) => "index_error",
            StudyError::QuotaExceeded(_) => "quota_exceeded",
            StudyError::NoRelevantContext => "no_relevant_context",
            StudyError::Generation(_) => "generation_error",
            StudyError::Validation(_) => "validation_error",
            StudyError::NotFound(_) => "not_found",
            StudyError::Conflict(_) => "conflict",
            StudyError::Transient(_) => "unavailable",
            StudyError::Storage(_)
            | StudyError::Io(_)
            | StudyError::Json(_)
            | StudyError::TomlParse(_)
            | StudyError::Http(_)
            | StudyError::Database(_) => "internal",
        }
    }
}

/// Result type alias for Studydesk operations.
pub type Result<T> = std::result::Result<T, StudyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_wraps_only_transient() {
        let err = StudyError::Transient("timeout".to_string()).exhausted(StudyError::Embedding);
        assert!(matches!(err, StudyError::Embedding(ref m) if m.contains("timeout")));

        let err = StudyError::Validation("bad".to_string()).exhausted(StudyError::Embedding);
        assert!(matches!(err, StudyError::Validation(_)));
    }

    #[test]
    fn test_busy_database_is_transient() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(StudyError::from(busy).is_transient());
        assert!(!StudyError::NoRelevantContext.is_transient());
    }
}
