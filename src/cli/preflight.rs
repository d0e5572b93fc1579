//! Pre-flight checks before expensive operations.
//!
//! Validates that credentials are available before starting operations that
//! would otherwise fail on the first external call.

use crate::config::{EmbeddingProvider, Settings};
use crate::error::{Result, StudyError};

/// Requirements for different operations.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    /// Ingestion embeds passages and may call the vision model.
    Ingest,
    /// Generation embeds the query and calls the completion model.
    Generate,
    /// Listing and deleting only touch local storage.
    Local,
}

/// Run pre-flight checks for the given operation.
pub fn check(settings: &Settings, operation: Operation) -> Result<()> {
    match operation {
        Operation::Ingest | Operation::Generate => {
            if settings.embedding.provider == EmbeddingProvider::OpenAI {
                check_api_key(&settings.embedding.api_key_env)?;
            }
            check_api_key(&settings.completion.api_key_env)?;
        }
        Operation::Local => {}
    }
    Ok(())
}

/// Check that the named API key variable is set.
fn check_api_key(var: &str) -> Result<()> {
    match std::env::var(var) {
        Ok(key) if !key.trim().is_empty() => Ok(()),
        Ok(_) => Err(StudyError::Config(format!(
            "{} is empty. Set it with: export {}='sk-...'",
            var, var
        ))),
        Err(_) => Err(StudyError::Config(format!(
            "{} not set. Set it with: export {}='sk-...'",
            var, var
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_has_no_requirements() {
        assert!(check(&Settings::default(), Operation::Local).is_ok());
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let mut settings = Settings::default();
        settings.embedding.provider = EmbeddingProvider::Hashing;
        settings.completion.api_key_env = "STUDYDESK_TEST_KEY_THAT_IS_NOT_SET".to_string();
        assert!(matches!(
            check(&settings, Operation::Generate),
            Err(StudyError::Config(_))
        ));
    }
}
