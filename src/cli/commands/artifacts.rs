//! Artifact commands.

use crate::app::App;
use crate::cli::{ArtifactAction, Output};
use crate::config::Settings;
use crate::models::ArtifactPayload;
use anyhow::Result;

/// Run an artifacts subcommand.
pub async fn run_artifacts(action: &ArtifactAction, account: &str, settings: Settings) -> Result<()> {
    let app = App::new(settings)?;

    match action {
        ArtifactAction::List { classroom } => {
            let artifacts = app.list_artifacts(account, *classroom).await?;
            if artifacts.is_empty() {
                Output::info("No artifacts yet.");
                return Ok(());
            }

            Output::header(&format!("Artifacts ({})", artifacts.len()));
            println!();
            for artifact in &artifacts {
                let items = match &artifact.payload {
                    ArtifactPayload::Flashcards { cards } => format!("{} cards", cards.len()),
                    ArtifactPayload::Quiz { questions } => format!("{} questions", questions.len()),
                    ArtifactPayload::Summary { text } => {
                        format!("{} words", text.split_whitespace().count())
                    }
                    ArtifactPayload::ChatAnswer { .. } => "answer".to_string(),
                };
                Output::list_item(&format!(
                    "{} [{}] ({}, {}, {})",
                    artifact.title,
                    artifact.kind(),
                    artifact.id,
                    items,
                    artifact.mode.as_str()
                ));
            }
        }

        ArtifactAction::Show { id, json } => {
            let artifact = app.artifact(account, *id).await?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&artifact)?);
            } else {
                Output::artifact(&artifact);
            }
        }

        ArtifactAction::Delete { id } => {
            app.delete_artifact(account, *id).await?;
            Output::success(&format!("Deleted artifact {}", id));
        }
    }

    Ok(())
}
