//! Flashcard, quiz and summary generation commands.

use crate::app::App;
use crate::cli::preflight::{self, Operation};
use crate::cli::{Output, StudyArgs};
use crate::config::Settings;
use crate::error::StudyError;
use crate::generation::GenerationRequest;
use crate::models::{ArtifactKind, SummaryLength};
use anyhow::Result;

/// Generate a study artifact of `kind` and print it.
pub async fn run_study(
    kind: ArtifactKind,
    args: &StudyArgs,
    count: Option<usize>,
    length: Option<SummaryLength>,
    account: &str,
    settings: Settings,
) -> Result<()> {
    preflight::check(&settings, Operation::Generate)?;

    let app = App::new(settings)?;
    let request = GenerationRequest {
        account_id: account.to_string(),
        classroom_id: args.classroom,
        title: Some(args.title.clone()),
        focus_topic: args.topic.clone(),
        document_ids: args.documents.clone(),
        whole_classroom: args.all,
        count,
        length,
        ..Default::default()
    };

    let spinner = Output::spinner(&format!("Generating {}...", kind.as_str().to_lowercase()));
    let result = app.generation().generate(kind, request).await;
    spinner.finish_and_clear();

    match result {
        Ok(artifact) => {
            Output::artifact(&artifact);
            Ok(())
        }
        Err(StudyError::NoRelevantContext) => {
            Output::error("The selected documents contain nothing relevant to this topic.");
            Output::info("Try another topic, or drop the documents to generate from general knowledge.");
            Err(StudyError::NoRelevantContext.into())
        }
        Err(e) => {
            Output::error(&format!("Generation failed: {}", e));
            Err(e.into())
        }
    }
}
