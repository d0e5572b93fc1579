//! Generation of chat answers, flashcards, quizzes and summaries.
//!
//! Every request is validated, then priced and checked against the daily
//! budget before the first external call. Usage from calls that completed is
//! recorded even when a later step fails, and nothing is persisted unless the
//! whole request succeeded.

mod completion;
pub mod parse;

pub use completion::{
    Completion, CompletionClient, CompletionRequest, ImageInput, OpenAICompletionClient,
};

use crate::config::{CompletionSettings, Prompts, StudyPrompts};
use crate::error::{Result, StudyError};
use crate::models::{
    ArtifactKind, ArtifactPayload, Classroom, GeneratedArtifact, GenerationMode, SummaryLength,
};
use crate::quota::{estimate_tokens, QuotaGuard, UsageTally};
use crate::retrieval::{RetrievalAssembler, RetrievalResult, RetrievedPassage};
use crate::store::MetadataStore;
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

pub const DEFAULT_FLASHCARD_COUNT: usize = 10;
pub const DEFAULT_QUIZ_COUNT: usize = 5;
pub const MAX_ITEM_COUNT: usize = 50;
/// Options per quiz question: one correct answer plus three distractors.
pub const QUIZ_OPTIONS: usize = 4;

const MAX_TITLE_CHARS: usize = 80;

/// A generation request as it arrives from the HTTP layer or the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationRequest {
    /// Set by the caller's boundary from the authenticated account.
    #[serde(skip)]
    pub account_id: String,
    #[serde(skip)]
    pub classroom_id: Uuid,
    pub title: Option<String>,
    pub focus_topic: Option<String>,
    pub document_ids: Vec<Uuid>,
    /// Ground a study artifact in every READY document of the classroom.
    pub whole_classroom: bool,
    /// Chat only.
    pub question: Option<String>,
    /// Flashcards and quiz.
    pub count: Option<usize>,
    /// Summary only.
    pub length: Option<SummaryLength>,
}

impl GenerationRequest {
    fn focus_topic(&self) -> Option<&str> {
        self.focus_topic.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }

    fn question(&self) -> Option<&str> {
        self.question.as_deref().map(str::trim).filter(|q| !q.is_empty())
    }

    fn wants_documents(&self) -> bool {
        !self.document_ids.is_empty() || self.whole_classroom
    }
}

/// How a validated request will be answered.
#[derive(Debug, Clone, PartialEq)]
enum Plan {
    /// Similarity search for `query`, falling back to general knowledge for chat.
    Search { query: String },
    /// Evenly sampled passages; no query to search for.
    Sample,
    General,
}

pub struct GenerationOrchestrator {
    store: Arc<dyn MetadataStore>,
    retrieval: Arc<RetrievalAssembler>,
    completion: Arc<dyn CompletionClient>,
    quota: Arc<QuotaGuard>,
    prompts: Prompts,
    temperature: f32,
    max_output_tokens: u32,
}

impl GenerationOrchestrator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        retrieval: Arc<RetrievalAssembler>,
        completion: Arc<dyn CompletionClient>,
        quota: Arc<QuotaGuard>,
        settings: &CompletionSettings,
    ) -> Self {
        Self {
            store,
            retrieval,
            completion,
            quota,
            prompts: Prompts::default(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
        }
    }

    pub fn with_prompts(mut self, prompts: Prompts) -> Self {
        self.prompts = prompts;
        self
    }

    /// Produce and persist an artifact of `kind`.
    #[instrument(skip(self, request), fields(kind = %kind, classroom = %request.classroom_id))]
    pub async fn generate(
        &self,
        kind: ArtifactKind,
        request: GenerationRequest,
    ) -> Result<GeneratedArtifact> {
        let plan = self.validate(kind, &request)?;
        let classroom = self.classroom(&request).await?;

        let estimate = self.estimate(&plan, &request);
        self.quota
            .check_and_reserve(&request.account_id, estimate)
            .await?;

        let tally = UsageTally::new();
        let outcome = self.run(kind, &plan, &request, &classroom, &tally).await;
        let spent = tally.take();
        match self.quota.record(&request.account_id, spent).await {
            Ok(_) => debug!("Request spent {} weighted tokens (estimated {})", spent, estimate),
            Err(e) => error!(
                "Failed to record {} weighted tokens for {}: {}",
                spent, request.account_id, e
            ),
        }

        let artifact = outcome?;
        self.store.insert_artifact(&artifact).await?;
        info!(
            "Created {} artifact {} ({})",
            kind,
            artifact.id,
            artifact.mode.as_str()
        );
        Ok(artifact)
    }

    fn validate(&self, kind: ArtifactKind, request: &GenerationRequest) -> Result<Plan> {
        if let Some(count) = request.count {
            if count == 0 || count > MAX_ITEM_COUNT {
                return Err(StudyError::Validation(format!(
                    "count must be between 1 and {}",
                    MAX_ITEM_COUNT
                )));
            }
        }

        if kind == ArtifactKind::ChatAnswer {
            let question = request
                .question()
                .ok_or_else(|| StudyError::Validation("question is required".to_string()))?;
            return Ok(Plan::Search {
                query: question.to_string(),
            });
        }

        if request.title.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(StudyError::Validation("title is required".to_string()));
        }

        match (request.wants_documents(), request.focus_topic()) {
            (true, Some(topic)) => Ok(Plan::Search {
                query: topic.to_string(),
            }),
            (true, None) => Ok(Plan::Sample),
            (false, Some(_)) => Ok(Plan::General),
            (false, None) => Err(StudyError::Validation(
                "focusTopic is required when no documents are selected".to_string(),
            )),
        }
    }

    async fn classroom(&self, request: &GenerationRequest) -> Result<Classroom> {
        self.store
            .get_classroom(request.classroom_id)
            .await?
            .filter(|c| c.account_id == request.account_id)
            .ok_or_else(|| StudyError::NotFound(format!("classroom {}", request.classroom_id)))
    }

    /// Upper bound on the weighted cost of answering `request`.
    fn estimate(&self, plan: &Plan, request: &GenerationRequest) -> u64 {
        let rag = self.retrieval.settings();
        let query_cost = match plan {
            Plan::Search { query } => self.retrieval.query_cost(query),
            _ => 0,
        };
        let context_tokens = match plan {
            Plan::General => 0,
            _ => (rag.max_context_chars as u64).div_ceil(4),
        };
        let prompt_tokens = 512
            + context_tokens
            + request.question().map_or(0, estimate_tokens)
            + request.focus_topic().map_or(0, estimate_tokens);

        query_cost
            + self
                .quota
                .completion_cost(prompt_tokens, u64::from(self.max_output_tokens))
    }

    async fn run(
        &self,
        kind: ArtifactKind,
        plan: &Plan,
        request: &GenerationRequest,
        classroom: &Classroom,
        tally: &UsageTally,
    ) -> Result<GeneratedArtifact> {
        let top_k = self.retrieval.settings().top_k;
        let retrieved = match plan {
            Plan::Search { query } => Some(
                self.retrieval
                    .retrieve(classroom.id, query, &request.document_ids, top_k, tally)
                    .await?,
            ),
            Plan::Sample => Some(
                self.retrieval
                    .sample(classroom.id, &request.document_ids, top_k)
                    .await?,
            ),
            Plan::General => None,
        };

        let grounding = match retrieved {
            Some(result) if result.has_relevant_context => Some(result),
            Some(result) if kind.is_study_artifact() => {
                info!(
                    "No relevant context for {} (top score {:?})",
                    kind,
                    result.top_score()
                );
                return Err(StudyError::NoRelevantContext);
            }
            _ => None,
        };

        let (payload, mode, sources) = match &grounding {
            Some(result) => {
                let payload = self.complete_payload(kind, request, Some(result), tally).await?;
                (payload, GenerationMode::DocumentGrounded, result.sources())
            }
            None => {
                let payload = self.complete_payload(kind, request, None, tally).await?;
                (payload, GenerationMode::GeneralKnowledge, Vec::new())
            }
        };

        Ok(GeneratedArtifact {
            id: Uuid::new_v4(),
            classroom_id: classroom.id,
            title: artifact_title(request),
            focus_topic: request.focus_topic().map(str::to_string),
            mode,
            sources,
            payload,
            created_at: Utc::now(),
        })
    }

    async fn complete_payload(
        &self,
        kind: ArtifactKind,
        request: &GenerationRequest,
        grounding: Option<&RetrievalResult>,
        tally: &UsageTally,
    ) -> Result<ArtifactPayload> {
        let max_chars = self.retrieval.settings().max_context_chars;
        let context = grounding.map(|r| format_context(&r.passages, max_chars));

        let completion_request = match kind {
            ArtifactKind::ChatAnswer => self.chat_request(request, context.as_deref()),
            ArtifactKind::Flashcards => self.study_request(
                &self.prompts.flashcards,
                request,
                context.as_deref(),
                request.count.unwrap_or(DEFAULT_FLASHCARD_COUNT),
            ),
            ArtifactKind::Quiz => self.study_request(
                &self.prompts.quiz,
                request,
                context.as_deref(),
                request.count.unwrap_or(DEFAULT_QUIZ_COUNT),
            ),
            ArtifactKind::Summary => {
                self.study_request(&self.prompts.summary, request, context.as_deref(), 1)
            }
        };

        let completion = self
            .completion
            .complete(&completion_request)
            .await
            .map_err(as_generation_error)?;
        tally.add(
            self.quota
                .completion_cost(completion.prompt_tokens, completion.completion_tokens),
        );

        let text = completion.text;
        Ok(match kind {
            ArtifactKind::ChatAnswer => ArtifactPayload::ChatAnswer {
                question: request.question().unwrap_or_default().to_string(),
                answer: text.trim().to_string(),
                has_relevant_context: grounding.is_some(),
            },
            ArtifactKind::Flashcards => ArtifactPayload::Flashcards {
                cards: parse::parse_flashcards(
                    &text,
                    request.count.unwrap_or(DEFAULT_FLASHCARD_COUNT),
                )?,
            },
            ArtifactKind::Quiz => ArtifactPayload::Quiz {
                questions: parse::parse_quiz(
                    &text,
                    request.count.unwrap_or(DEFAULT_QUIZ_COUNT),
                    QUIZ_OPTIONS,
                )?,
            },
            ArtifactKind::Summary => ArtifactPayload::Summary {
                text: parse::parse_summary(&text)?,
            },
        })
    }

    fn chat_request(&self, request: &GenerationRequest, context: Option<&str>) -> CompletionRequest {
        let chat = &self.prompts.chat;
        let mut vars = HashMap::new();
        vars.insert(
            "question".to_string(),
            request.question().unwrap_or_default().to_string(),
        );

        let (system, user) = match context {
            Some(context) => {
                vars.insert("context".to_string(), context.to_string());
                (&chat.grounded_system, &chat.grounded_user)
            }
            None => (&chat.general_system, &chat.general_user),
        };

        let mut completion = CompletionRequest::new(
            self.prompts.render_with_custom(system, &vars),
            self.prompts.render_with_custom(user, &vars),
        );
        completion.temperature = self.temperature;
        completion.max_tokens = self.max_output_tokens;
        completion
    }

    fn study_request(
        &self,
        prompts: &StudyPrompts,
        request: &GenerationRequest,
        context: Option<&str>,
        count: usize,
    ) -> CompletionRequest {
        let mut vars = HashMap::new();
        let (min_words, max_words) = request.length.unwrap_or_default().word_band();
        vars.insert("count".to_string(), count.to_string());
        vars.insert("options".to_string(), QUIZ_OPTIONS.to_string());
        vars.insert("distractors".to_string(), (QUIZ_OPTIONS - 1).to_string());
        vars.insert("min_words".to_string(), min_words.to_string());
        vars.insert("max_words".to_string(), max_words.to_string());

        let instructions = self.prompts.render_with_custom(&prompts.instructions, &vars);
        let material = match context {
            Some(context) => format!("Source material:\n\n{}", context),
            None => "There is no source material. Draw on well-established knowledge of the focus topic.".to_string(),
        };

        vars.insert("instructions".to_string(), instructions);
        vars.insert("title".to_string(), artifact_title(request));
        vars.insert(
            "topic".to_string(),
            request
                .focus_topic()
                .unwrap_or("none; cover the material as a whole")
                .to_string(),
        );
        vars.insert("material".to_string(), material);

        let mut completion = CompletionRequest::new(
            self.prompts.render_with_custom(&prompts.system, &vars),
            self.prompts.render_with_custom(&prompts.user, &vars),
        );
        completion.json = true;
        completion.temperature = self.temperature;
        completion.max_tokens = self.max_output_tokens;
        completion
    }
}

fn artifact_title(request: &GenerationRequest) -> String {
    let source = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .or(request.question())
        .unwrap_or("Untitled");
    if source.chars().count() <= MAX_TITLE_CHARS {
        source.to_string()
    } else {
        let cut: String = source.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{}...", cut.trim_end())
    }
}

fn as_generation_error(err: StudyError) -> StudyError {
    match err {
        StudyError::Generation(_) | StudyError::QuotaExceeded(_) => err,
        other if other.is_transient() => other.exhausted(StudyError::Generation),
        other => StudyError::Generation(other.to_string()),
    }
}

/// Numbered excerpts for the prompt, cut off at `max_chars`.
///
/// The first excerpt is always included, truncated if it alone is too long.
pub fn format_context(passages: &[RetrievedPassage], max_chars: usize) -> String {
    let mut out = String::new();
    for (i, passage) in passages.iter().enumerate() {
        let location = match passage.chunk.page {
            Some(page) => format!("{}, page {}", passage.filename, page),
            None => passage.filename.clone(),
        };
        let entry = format!("[{}] ({})\n{}\n\n", i + 1, location, passage.chunk.content.trim());

        if out.len() + entry.len() > max_chars {
            if out.is_empty() {
                let mut end = max_chars.min(entry.len());
                while !entry.is_char_boundary(end) {
                    end -= 1;
                }
                out.push_str(&entry[..end]);
            }
            break;
        }
        out.push_str(&entry);
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Chunk;

    fn passage(filename: &str, page: Option<u32>, content: &str) -> RetrievedPassage {
        let document_id = Uuid::new_v4();
        RetrievedPassage {
            chunk: Chunk {
                id: Uuid::new_v4(),
                document_id,
                ordinal: 0,
                content: content.to_string(),
                vector_id: String::new(),
                page,
                start_offset: 0,
                end_offset: content.len(),
            },
            filename: filename.to_string(),
            score: 0.9,
        }
    }

    #[test]
    fn test_format_context_numbers_and_bounds() {
        let passages = vec![
            passage("bio.pdf", Some(3), "Cells divide by mitosis."),
            passage("notes.txt", None, "Meiosis halves the chromosome count."),
        ];
        let full = format_context(&passages, 10_000);
        assert!(full.starts_with("[1] (bio.pdf, page 3)\nCells divide"));
        assert!(full.contains("[2] (notes.txt)\nMeiosis"));

        let bounded = format_context(&passages, 50);
        assert!(bounded.contains("[1]"));
        assert!(!bounded.contains("[2]"));
        assert!(bounded.len() <= 50);
    }

    #[test]
    fn test_format_context_multibyte_stays_in_bounds() {
        let passages = vec![passage("größe.txt", None, &"Zellteilung über Ökologie ".repeat(20))];
        let bounded = format_context(&passages, 41);
        assert!(bounded.len() <= 41);
        assert!(bounded.starts_with("[1] (größe.txt)"));
    }

    #[test]
    fn test_title_falls_back_to_question() {
        let request = GenerationRequest {
            question: Some("What is osmosis?".to_string()),
            ..GenerationRequest::default()
        };
        assert_eq!(artifact_title(&request), "What is osmosis?");

        let long = GenerationRequest {
            title: Some("x".repeat(200)),
            ..GenerationRequest::default()
        };
        assert_eq!(artifact_title(&long).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_transient_completion_failures_become_generation_errors() {
        let err = as_generation_error(StudyError::Transient("503".to_string()));
        assert!(matches!(err, StudyError::Generation(_)));
        let err = as_generation_error(StudyError::Config("no key".to_string()));
        assert!(matches!(err, StudyError::Generation(_)));
    }
}
