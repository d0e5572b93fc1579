//! Document commands: upload, list, reindex and delete.

use crate::app::App;
use crate::cli::preflight::{self, Operation};
use crate::cli::{format_size, Output};
use crate::config::Settings;
use anyhow::{Context, Result};
use std::path::Path;
use uuid::Uuid;

/// Upload a file and index it in the foreground.
pub async fn run_upload(
    classroom_id: Uuid,
    path: &Path,
    mime: Option<&str>,
    account: &str,
    settings: Settings,
) -> Result<()> {
    if let Err(e) = preflight::check(&settings, Operation::Ingest) {
        Output::error(&format!("{}", e));
        Output::info("Run 'studydesk doctor' for detailed diagnostics.");
        return Err(e.into());
    }

    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let app = App::new(settings)?;
    let ingestion = app.ingestion();

    let document = ingestion
        .upload(account, classroom_id, &filename, mime, &bytes)
        .await?;
    Output::info(&format!(
        "Uploaded {} ({}, {})",
        document.filename,
        document.mime_type,
        format_size(document.byte_size)
    ));

    let spinner = Output::spinner("Extracting and indexing...");
    match ingestion.ingest(account, document.id).await {
        Ok(document) => {
            spinner.finish_and_clear();
            let chunks = app.store().list_chunks(document.id).await?;
            Output::success(&format!("Indexed {}", document.filename));
            Output::kv("Document", &document.id.to_string());
            Output::kv("Chunks", &chunks.len().to_string());
            if let Some(extractor) = &document.extractor {
                Output::kv("Extractor", extractor);
            }
        }
        Err(e) => {
            spinner.finish_and_clear();
            Output::error(&format!("Failed to index {}: {}", document.filename, e));
            return Err(e.into());
        }
    }

    Ok(())
}

/// List a classroom's documents.
pub async fn run_documents(classroom_id: Uuid, account: &str, settings: Settings) -> Result<()> {
    let app = App::new(settings)?;
    let documents = app.list_documents(account, classroom_id).await?;

    if documents.is_empty() {
        Output::info("No documents yet. Use 'studydesk upload <classroom> <file>' to add one.");
        return Ok(());
    }

    Output::header(&format!("Documents ({})", documents.len()));
    println!();
    for document in &documents {
        Output::document_info(document);
    }

    let total: u64 = documents.iter().map(|d| d.byte_size).sum();
    println!();
    Output::kv("Total size", &format_size(total));

    Ok(())
}

/// Rebuild a READY document's chunks and vectors.
pub async fn run_reindex(document_id: Uuid, account: &str, settings: Settings) -> Result<()> {
    preflight::check(&settings, Operation::Ingest)?;
    let app = App::new(settings)?;

    let spinner = Output::spinner("Re-indexing...");
    let result = app.ingestion().reindex(account, document_id).await;
    spinner.finish_and_clear();

    let chunks = result?;
    Output::success(&format!("Re-indexed {} into {} chunks", document_id, chunks));
    Ok(())
}

/// Delete a document with everything derived from it.
pub async fn run_delete(document_id: Uuid, account: &str, settings: Settings) -> Result<()> {
    let app = App::new(settings)?;
    let document = app.ingestion().delete_document(account, document_id).await?;
    Output::success(&format!("Deleted {} ({})", document.filename, document.id));
    Ok(())
}
