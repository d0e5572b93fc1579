//! Completion service client.

use crate::config::CompletionSettings;
use crate::error::{Result, StudyError};
use crate::openai::{classify_error, create_client_with_timeout, Endpoint};
use crate::retry::RetryPolicy;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequestArgs, ImageDetail, ImageUrlArgs, ResponseFormat,
};
use async_trait::async_trait;
use base64::Engine;
use tracing::{debug, instrument};

/// An image attached to a completion request.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub mime: String,
    pub data: Vec<u8>,
}

impl ImageInput {
    fn data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            base64::engine::general_purpose::STANDARD.encode(&self.data)
        )
    }
}

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Ask the model for a single JSON object.
    pub json: bool,
    pub max_tokens: u32,
    pub temperature: f32,
    pub images: Vec<ImageInput>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json: false,
            max_tokens: 1024,
            temperature: 0.4,
            images: Vec::new(),
        }
    }

    /// Rough input size in tokens, for quota estimates.
    pub fn estimated_input_tokens(&self, tokens_per_image: u64) -> u64 {
        crate::quota::estimate_tokens(&self.system)
            + crate::quota::estimate_tokens(&self.user)
            + tokens_per_image * self.images.len() as u64
    }
}

/// Model output and the provider's token accounting.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Trait for completion service implementations.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion>;
}

/// OpenAI chat-completions client.
pub struct OpenAICompletionClient {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    retry: RetryPolicy,
}

impl OpenAICompletionClient {
    /// Client for text generation.
    pub fn from_settings(settings: &CompletionSettings, retry: RetryPolicy) -> Result<Self> {
        Self::with_model(settings, &settings.model, retry)
    }

    /// Client for image descriptions.
    pub fn vision(settings: &CompletionSettings, retry: RetryPolicy) -> Result<Self> {
        Self::with_model(settings, &settings.vision_model, retry)
    }

    fn with_model(settings: &CompletionSettings, model: &str, retry: RetryPolicy) -> Result<Self> {
        let endpoint = Endpoint {
            api_base: settings.api_base.clone(),
            api_key_env: Some(settings.api_key_env.clone()),
        };
        Ok(Self {
            client: create_client_with_timeout(&endpoint, retry.call_timeout)?,
            model: model.to_string(),
            retry,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_messages(request: &CompletionRequest) -> Result<Vec<ChatCompletionRequestMessage>> {
        let wrap = |e: async_openai::error::OpenAIError| StudyError::Generation(e.to_string());

        let system: ChatCompletionRequestMessage = ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system.clone())
            .build()
            .map_err(wrap)?
            .into();

        let user = if request.images.is_empty() {
            ChatCompletionRequestUserMessageArgs::default()
                .content(request.user.clone())
                .build()
                .map_err(wrap)?
        } else {
            let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(request.user.clone())
                    .build()
                    .map_err(wrap)?
                    .into(),
            ];
            for image in &request.images {
                parts.push(
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(
                            ImageUrlArgs::default()
                                .url(image.data_url())
                                .detail(ImageDetail::Auto)
                                .build()
                                .map_err(wrap)?,
                        )
                        .build()
                        .map_err(wrap)?
                        .into(),
                );
            }
            ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()
                .map_err(wrap)?
        };

        Ok(vec![system, user.into()])
    }

    async fn request_once(&self, request: &CompletionRequest) -> Result<Completion> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model)
            .messages(Self::build_messages(request)?)
            .temperature(request.temperature)
            .max_tokens(request.max_tokens);
        if request.json {
            args.response_format(ResponseFormat::JsonObject);
        }
        let chat_request = args
            .build()
            .map_err(|e| StudyError::Generation(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| classify_error(e, StudyError::Generation))?;

        let text = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| StudyError::Generation("Empty response from completion service".to_string()))?;

        let (prompt_tokens, completion_tokens) = response
            .usage
            .map(|u| (u64::from(u.prompt_tokens), u64::from(u.completion_tokens)))
            .unwrap_or_else(|| {
                (
                    request.estimated_input_tokens(0),
                    crate::quota::estimate_tokens(&text),
                )
            });

        Ok(Completion {
            text,
            prompt_tokens,
            completion_tokens,
        })
    }
}

#[async_trait]
impl CompletionClient for OpenAICompletionClient {
    #[instrument(skip(self, request), fields(model = %self.model, images = request.images.len()))]
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let completion = self
            .retry
            .run("completion request", || self.request_once(request))
            .await
            .map_err(|e| e.exhausted(StudyError::Generation))?;
        debug!(
            "Completion used {} prompt + {} output tokens",
            completion.prompt_tokens, completion.completion_tokens
        );
        Ok(completion)
    }
}
