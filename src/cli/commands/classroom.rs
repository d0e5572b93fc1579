//! Classroom commands.

use crate::app::App;
use crate::cli::{ClassroomAction, Output};
use crate::config::Settings;
use anyhow::Result;

/// Run a classroom subcommand.
pub async fn run_classroom(action: &ClassroomAction, account: &str, settings: Settings) -> Result<()> {
    let app = App::new(settings)?;

    match action {
        ClassroomAction::Create { name } => {
            let classroom = app.create_classroom(account, name).await?;
            Output::success(&format!("Created classroom \"{}\"", classroom.name));
            Output::kv("Id", &classroom.id.to_string());
        }

        ClassroomAction::List => {
            let classrooms = app.list_classrooms(account).await?;
            if classrooms.is_empty() {
                Output::info("No classrooms yet. Use 'studydesk classroom create <name>' to add one.");
                return Ok(());
            }

            Output::header(&format!("Classrooms ({})", classrooms.len()));
            println!();
            for classroom in &classrooms {
                let documents = app.list_documents(account, classroom.id).await?;
                Output::list_item(&format!(
                    "{} ({}, {} documents, created {})",
                    classroom.name,
                    classroom.id,
                    documents.len(),
                    classroom.created_at.format("%Y-%m-%d")
                ));
            }
        }
    }

    Ok(())
}
