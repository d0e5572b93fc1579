//! Ask command implementation.

use crate::app::App;
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::generation::GenerationRequest;
use crate::models::{ArtifactKind, ArtifactPayload};
use anyhow::Result;
use uuid::Uuid;

/// Run the ask command.
pub async fn run_ask(
    classroom_id: Uuid,
    question: &str,
    documents: &[Uuid],
    account: &str,
    settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(&settings, Operation::Generate) {
        Output::error(&format!("{}", e));
        Output::info("Run 'studydesk doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let app = App::new(settings)?;
    let request = GenerationRequest {
        account_id: account.to_string(),
        classroom_id,
        question: Some(question.to_string()),
        document_ids: documents.to_vec(),
        ..Default::default()
    };

    let spinner = Output::spinner("Searching classroom documents...");
    let result = app.generation().generate(ArtifactKind::ChatAnswer, request).await;
    spinner.finish_and_clear();

    let artifact = match result {
        Ok(artifact) => artifact,
        Err(e) => {
            Output::error(&format!("Failed to generate answer: {}", e));
            return Err(e.into());
        }
    };

    if let ArtifactPayload::ChatAnswer {
        answer,
        has_relevant_context,
        ..
    } = &artifact.payload
    {
        if !has_relevant_context {
            Output::warning("Nothing relevant in the documents; answering from general knowledge.");
        }
        println!("\n{}\n", answer);
    }
    Output::sources(&artifact.sources);

    Ok(())
}
