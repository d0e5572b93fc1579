//! CLI output formatting utilities.

use crate::models::{ArtifactPayload, Document, DocumentStatus, GeneratedArtifact, SourceRef};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print a list item.
    pub fn list_item(msg: &str) {
        println!("  {} {}", style("*").cyan(), msg);
    }

    /// Print a one-line document summary.
    pub fn document_info(doc: &Document) {
        let status = match doc.status {
            DocumentStatus::Ready => style(doc.status.as_str()).green(),
            DocumentStatus::Failed => style(doc.status.as_str()).red(),
            _ => style(doc.status.as_str()).yellow(),
        };
        println!(
            "  {} {} ({}, {}, {})",
            style("*").cyan(),
            style(&doc.filename).bold(),
            style(doc.id).dim(),
            format_size(doc.byte_size),
            status
        );
        if let Some(reason) = &doc.failure_reason {
            println!("    {}", style(reason).dim());
        }
    }

    /// Print the documents an answer drew from.
    pub fn sources(sources: &[SourceRef]) {
        if sources.is_empty() {
            return;
        }
        Output::header("Sources");
        for source in sources {
            Output::list_item(&format!(
                "{} {}",
                source.filename,
                style(source.document_id).dim()
            ));
        }
    }

    /// Print a generated artifact in readable form.
    pub fn artifact(artifact: &GeneratedArtifact) {
        Output::header(&artifact.title);
        Output::kv("Id", &artifact.id.to_string());
        Output::kv("Mode", artifact.mode.as_str());
        if let Some(topic) = &artifact.focus_topic {
            Output::kv("Topic", topic);
        }
        println!();

        match &artifact.payload {
            ArtifactPayload::ChatAnswer { answer, .. } => println!("{}", answer),
            ArtifactPayload::Flashcards { cards } => {
                for (i, card) in cards.iter().enumerate() {
                    println!("{} {}", style(format!("{:>2}.", i + 1)).cyan(), style(&card.front).bold());
                    println!("    {}", card.back);
                }
            }
            ArtifactPayload::Quiz { questions } => {
                for (i, q) in questions.iter().enumerate() {
                    println!("{} {}", style(format!("{:>2}.", i + 1)).cyan(), style(&q.question).bold());
                    for (j, option) in q.options.iter().enumerate() {
                        let letter = (b'a' + j as u8) as char;
                        if j == q.correct_index {
                            println!("    {}) {}", letter, style(option).green());
                        } else {
                            println!("    {}) {}", letter, option);
                        }
                    }
                    if let Some(explanation) = &q.explanation {
                        println!("    {}", style(explanation).dim());
                    }
                }
            }
            ArtifactPayload::Summary { text } => println!("{}", text),
        }

        Output::sources(&artifact.sources);
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

/// Format a byte count in human-readable form.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
