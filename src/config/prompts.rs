//! Prompt templates for Studydesk.
//!
//! Prompts can be customized by placing TOML files in the custom prompts directory.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Collection of all prompt templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Prompts {
    pub chat: ChatPrompts,
    pub flashcards: StudyPrompts,
    pub quiz: StudyPrompts,
    pub summary: StudyPrompts,
    pub vision: VisionPrompts,
    /// Custom variables from config, available in all prompts.
    #[serde(skip)]
    pub variables: std::collections::HashMap<String, String>,
}

/// Prompts for conversational answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatPrompts {
    /// System prompt when passages were retrieved.
    pub grounded_system: String,
    /// System prompt when no relevant passages were found.
    pub general_system: String,
    pub grounded_user: String,
    pub general_user: String,
}

impl Default for ChatPrompts {
    fn default() -> Self {
        Self {
            grounded_system: r#"You are a study assistant answering a student's question from their course documents.

Guidelines:
- Answer using only the numbered excerpts provided
- Cite excerpts inline with their number, e.g. [2]
- If the excerpts only partially answer the question, say what is missing
- Be concise but complete; prefer short paragraphs and lists"#
                .to_string(),

            general_system: r#"You are a study assistant. The student's documents did not contain material relevant to this question, so answer from general knowledge.

Guidelines:
- Start by noting briefly that the answer is not based on their documents
- Be accurate and concise
- Do not invent citations"#
                .to_string(),

            grounded_user: r#"Question: {{question}}

Excerpts from the student's documents:

{{context}}

Answer the question based on the excerpts above."#
                .to_string(),

            general_user: "Question: {{question}}".to_string(),
        }
    }
}

/// Prompts for a structured study artifact (flashcards, quiz or summary).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyPrompts {
    pub system: String,
    /// Instructions specific to the artifact; rendered into `user`.
    pub instructions: String,
    pub user: String,
}

impl Default for StudyPrompts {
    fn default() -> Self {
        Self {
            system: r#"You create study material for students. You always respond with a single JSON object and nothing else."#
                .to_string(),
            instructions: String::new(),
            user: r#"{{instructions}}

Title: {{title}}
Focus topic: {{topic}}

{{material}}"#
                .to_string(),
        }
    }
}

impl StudyPrompts {
    pub fn flashcards() -> Self {
        Self {
            instructions: r#"Write exactly {{count}} flashcards.
Each card has a short "front" (a question, term or prompt) and a "back" (the answer or definition, at most three sentences).
Cover distinct ideas; do not repeat a card.

Respond with JSON of the form:
{"flashcards": [{"front": "...", "back": "..."}]}"#
                .to_string(),
            ..Self::default()
        }
    }

    pub fn quiz() -> Self {
        Self {
            instructions: r#"Write exactly {{count}} multiple-choice questions.
Each question has exactly {{options}} options: one correct answer and {{distractors}} plausible but wrong distractors.
Give the zero-based index of the correct option and a one-sentence explanation.

Respond with JSON of the form:
{"questions": [{"question": "...", "options": ["...", "..."], "correct_index": 0, "explanation": "..."}]}"#
                .to_string(),
            ..Self::default()
        }
    }

    pub fn summary() -> Self {
        Self {
            instructions: r#"Write a summary between {{min_words}} and {{max_words}} words.
Organize it around the main ideas and keep the terminology of the source material.

Respond with JSON of the form:
{"summary": "..."}"#
                .to_string(),
            ..Self::default()
        }
    }
}

/// Prompts for describing images during vision extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionPrompts {
    pub system: String,
    pub describe: String,
}

impl Default for VisionPrompts {
    fn default() -> Self {
        Self {
            system: "You describe figures from course material so they can be searched and studied as text.".to_string(),
            describe: r#"Describe this image from "{{filename}}" for a student.
Transcribe any text, labels or formulas it contains, then explain what the figure shows in two to four sentences."#
                .to_string(),
        }
    }
}

impl Default for Prompts {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Prompts {
    /// Built-in prompts.
    pub fn builtin() -> Self {
        Self {
            chat: ChatPrompts::default(),
            flashcards: StudyPrompts::flashcards(),
            quiz: StudyPrompts::quiz(),
            summary: StudyPrompts::summary(),
            vision: VisionPrompts::default(),
            variables: std::collections::HashMap::new(),
        }
    }

    /// Load prompts from the default location, with optional custom directory and variables.
    pub fn load(
        custom_dir: Option<&str>,
        custom_variables: Option<&std::collections::HashMap<String, String>>,
    ) -> crate::error::Result<Self> {
        let mut prompts = Prompts::builtin();

        if let Some(vars) = custom_variables {
            prompts.variables = vars.clone();
        }

        if let Some(dir) = custom_dir {
            let custom_path = PathBuf::from(shellexpand::tilde(dir).to_string());

            let chat_path = custom_path.join("chat.toml");
            if chat_path.exists() {
                let content = std::fs::read_to_string(&chat_path)?;
                prompts.chat = toml::from_str(&content)?;
            }

            for (name, slot) in [
                ("flashcards.toml", &mut prompts.flashcards),
                ("quiz.toml", &mut prompts.quiz),
                ("summary.toml", &mut prompts.summary),
            ] {
                let path = custom_path.join(name);
                if path.exists() {
                    let content = std::fs::read_to_string(&path)?;
                    let custom: toml::Table = toml::from_str(&content)?;
                    // Fields missing from the file keep the built-in text.
                    if let Some(toml::Value::String(s)) = custom.get("system") {
                        slot.system = s.clone();
                    }
                    if let Some(toml::Value::String(s)) = custom.get("instructions") {
                        slot.instructions = s.clone();
                    }
                    if let Some(toml::Value::String(s)) = custom.get("user") {
                        slot.user = s.clone();
                    }
                }
            }

            let vision_path = custom_path.join("vision.toml");
            if vision_path.exists() {
                let content = std::fs::read_to_string(&vision_path)?;
                prompts.vision = toml::from_str(&content)?;
            }
        }

        Ok(prompts)
    }

    /// Render a prompt template with the given variables.
    pub fn render(template: &str, vars: &std::collections::HashMap<String, String>) -> String {
        let mut result = template.to_string();
        for (key, value) in vars {
            result = result.replace(&format!("{{{{{}}}}}", key), value);
        }
        result
    }

    /// Render a prompt template with both provided variables and custom config variables.
    /// Provided variables take precedence over custom config variables.
    pub fn render_with_custom(
        &self,
        template: &str,
        vars: &std::collections::HashMap<String, String>,
    ) -> String {
        let mut merged = self.variables.clone();
        for (key, value) in vars {
            merged.insert(key.clone(), value.clone());
        }
        Self::render(template, &merged)
    }
}
