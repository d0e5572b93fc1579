//! Parsing of structured completion output into artifact payloads.
//!
//! Output is accepted with or without a markdown code fence. Items beyond the
//! requested count are dropped; fewer items than requested, or any malformed
//! item, rejects the whole response.

use crate::error::{Result, StudyError};
use crate::models::{Flashcard, QuizQuestion};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct RawCard {
    #[serde(alias = "question", alias = "term")]
    front: String,
    #[serde(alias = "answer", alias = "definition")]
    back: String,
}

#[derive(Deserialize)]
struct RawQuestion {
    question: String,
    options: Vec<String>,
    #[serde(alias = "correctIndex", alias = "answer_index")]
    correct_index: usize,
    #[serde(default)]
    explanation: Option<String>,
}

fn malformed(what: &str, detail: impl std::fmt::Display) -> StudyError {
    StudyError::Generation(format!("malformed {}: {}", what, detail))
}

/// Strip a surrounding code fence and any prose around the JSON value.
fn json_body(raw: &str) -> &str {
    let mut body = raw.trim();
    if let Some(rest) = body.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        body = rest.trim_end().strip_suffix("```").unwrap_or(rest).trim();
    }

    let start = body.find(['{', '[']);
    let end = body.rfind(['}', ']']);
    match (start, end) {
        (Some(start), Some(end)) if start < end => &body[start..=end],
        _ => body,
    }
}

fn parse_value(raw: &str, what: &str) -> Result<Value> {
    serde_json::from_str(json_body(raw)).map_err(|e| malformed(what, e))
}

/// The item list of a response: a bare array or the first array under one of `keys`.
fn items(value: Value, keys: &[&str], what: &str) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => keys
            .iter()
            .find_map(|k| match map.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| malformed(what, format!("expected a \"{}\" array", keys[0]))),
        _ => Err(malformed(what, "expected a JSON object")),
    }
}

fn ensure_count(what: &str, got: usize, requested: usize) -> Result<()> {
    if got < requested {
        return Err(malformed(what, format!("{} of {} requested items", got, requested)));
    }
    Ok(())
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn parse_flashcards(raw: &str, count: usize) -> Result<Vec<Flashcard>> {
    let value = parse_value(raw, "flashcards")?;
    let mut cards = Vec::new();

    for (i, item) in items(value, &["flashcards", "cards"], "flashcards")?
        .into_iter()
        .take(count)
        .enumerate()
    {
        let card: RawCard =
            serde_json::from_value(item).map_err(|e| malformed("flashcards", format!("card {}: {}", i + 1, e)))?;
        match (non_empty(card.front), non_empty(card.back)) {
            (Some(front), Some(back)) => cards.push(Flashcard { front, back }),
            _ => return Err(malformed("flashcards", format!("card {} has an empty side", i + 1))),
        }
    }

    if cards.is_empty() {
        return Err(StudyError::Generation("no flashcards in response".to_string()));
    }
    ensure_count("flashcards", cards.len(), count)?;
    Ok(cards)
}

pub fn parse_quiz(raw: &str, count: usize, options_per_question: usize) -> Result<Vec<QuizQuestion>> {
    let value = parse_value(raw, "quiz")?;
    let mut questions = Vec::new();

    for (i, item) in items(value, &["questions", "quiz"], "quiz")?
        .into_iter()
        .take(count)
        .enumerate()
    {
        let n = i + 1;
        let raw: RawQuestion =
            serde_json::from_value(item).map_err(|e| malformed("quiz", format!("question {}: {}", n, e)))?;

        let question = non_empty(raw.question)
            .ok_or_else(|| malformed("quiz", format!("question {} is empty", n)))?;
        let options: Vec<String> = raw.options.into_iter().filter_map(non_empty).collect();
        if options.len() != options_per_question {
            return Err(malformed(
                "quiz",
                format!("question {} has {} options, expected {}", n, options.len(), options_per_question),
            ));
        }
        let mut distinct = options.clone();
        distinct.sort();
        distinct.dedup();
        if distinct.len() != options.len() {
            return Err(malformed("quiz", format!("question {} repeats an option", n)));
        }
        if raw.correct_index >= options.len() {
            return Err(malformed(
                "quiz",
                format!("question {} marks option {} correct", n, raw.correct_index),
            ));
        }

        questions.push(QuizQuestion {
            question,
            options,
            correct_index: raw.correct_index,
            explanation: raw.explanation.and_then(non_empty),
        });
    }

    if questions.is_empty() {
        return Err(StudyError::Generation("no questions in response".to_string()));
    }
    ensure_count("quiz", questions.len(), count)?;
    Ok(questions)
}

pub fn parse_summary(raw: &str) -> Result<String> {
    let value = parse_value(raw, "summary")?;
    let text = match value {
        Value::Object(mut map) => match map.remove("summary").or_else(|| map.remove("text")) {
            Some(Value::String(text)) => text,
            _ => return Err(malformed("summary", "expected a \"summary\" string")),
        },
        _ => return Err(malformed("summary", "expected a JSON object")),
    };
    non_empty(text).ok_or_else(|| StudyError::Generation("empty summary in response".to_string()))
}
