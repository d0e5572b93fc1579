//! Serve command - run the HTTP API.

use crate::app::App;
use crate::cli::Output;
use crate::config::Settings;
use crate::server::{self, ACCOUNT_HEADER};
use std::sync::Arc;

/// Run the HTTP API server.
pub async fn run_serve(
    host: Option<String>,
    port: Option<u16>,
    mut settings: Settings,
) -> anyhow::Result<()> {
    if let Some(host) = host {
        settings.server.host = host;
    }
    if let Some(port) = port {
        settings.server.port = port;
    }

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let app = Arc::new(App::new(settings)?);

    Output::header("Studydesk API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET    /health");
    Output::kv("Classrooms", "GET    /classrooms, POST /classrooms");
    Output::kv("Upload", "POST   /classrooms/{id}/documents");
    Output::kv("Documents", "GET    /classrooms/{id}/documents");
    Output::kv("Document", "GET    /documents/{id}, DELETE /documents/{id}");
    Output::kv("Reindex", "POST   /documents/{id}/reindex");
    Output::kv("Chat", "POST   /classrooms/{id}/chat");
    Output::kv("Flashcards", "POST   /classrooms/{id}/flashcard-sets");
    Output::kv("Quiz", "POST   /classrooms/{id}/quiz-sets");
    Output::kv("Summary", "POST   /classrooms/{id}/summaries");
    Output::kv("Artifacts", "GET    /classrooms/{id}/artifacts");
    Output::kv("Artifact", "GET    /artifacts/{id}, DELETE /artifacts/{id}");
    Output::kv("Usage", "GET    /usage");
    println!();
    Output::info(&format!("Requests identify the account with the {} header.", ACCOUNT_HEADER));
    Output::info("Press Ctrl+C to stop the server.");

    server::run_server(app).await?;

    Ok(())
}
