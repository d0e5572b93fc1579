//! OpenAI client configuration and error classification.

use crate::error::{Result, StudyError};
use async_openai::{config::OpenAIConfig, error::OpenAIError, Client};
use std::time::Duration;

/// Connection details for an OpenAI-compatible endpoint.
#[derive(Debug, Clone, Default)]
pub struct Endpoint {
    pub api_base: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: Option<String>,
}

/// Create an OpenAI client with a custom timeout.
pub fn create_client_with_timeout(
    endpoint: &Endpoint,
    timeout: Duration,
) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder().timeout(timeout).build()?;

    let mut config = OpenAIConfig::default();
    if let Some(key) = endpoint
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .filter(|k| !k.is_empty())
    {
        config = config.with_api_key(key);
    }
    if let Some(base) = &endpoint.api_base {
        config = config.with_api_base(base);
    }

    Ok(Client::with_config(config).with_http_client(http_client))
}

/// Map a provider error into the crate taxonomy.
///
/// Network failures and server-side errors become [`StudyError::Transient`];
/// everything else is wrapped with `wrap`.
pub fn classify_error(error: OpenAIError, wrap: fn(String) -> StudyError) -> StudyError {
    match &error {
        OpenAIError::Reqwest(e) => {
            let retryable = e.is_timeout()
                || e.is_connect()
                || e.is_request()
                || e.status().is_some_and(|s| s.is_server_error() || s.as_u16() == 429);
            if retryable {
                StudyError::Transient(error.to_string())
            } else {
                wrap(error.to_string())
            }
        }
        OpenAIError::ApiError(api) => {
            let server_side = api
                .r#type
                .as_deref()
                .is_some_and(|t| t == "server_error" || t == "service_unavailable");
            if server_side {
                StudyError::Transient(error.to_string())
            } else {
                wrap(error.to_string())
            }
        }
        _ => wrap(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::error::ApiError;

    fn api_error(kind: &str) -> OpenAIError {
        OpenAIError::ApiError(ApiError {
            message: "boom".to_string(),
            r#type: Some(kind.to_string()),
            param: None,
            code: None,
        })
    }

    #[test]
    fn test_server_errors_are_transient() {
        let err = classify_error(api_error("server_error"), StudyError::Embedding);
        assert!(err.is_transient());
    }

    #[test]
    fn test_request_errors_are_not_retried() {
        let err = classify_error(api_error("invalid_request_error"), StudyError::Generation);
        assert!(matches!(err, StudyError::Generation(_)));
    }

    #[test]
    fn test_client_builds_with_custom_base() {
        let endpoint = Endpoint {
            api_base: Some("http://localhost:11434/v1".to_string()),
            api_key_env: Some("STUDYDESK_TEST_UNSET_KEY".to_string()),
        };
        assert!(create_client_with_timeout(&endpoint, Duration::from_secs(5)).is_ok());
    }
}
