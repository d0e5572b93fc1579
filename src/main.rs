//! Studydesk CLI entry point.

use anyhow::Result;
use clap::Parser;
use studydesk::cli::{commands, Cli, Commands};
use studydesk::config::Settings;
use studydesk::models::ArtifactKind;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| {
            format!("studydesk={},tower_http={}", log_level, log_level)
        })))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.clone().unwrap_or_else(Settings::default_config_path);
    let settings = Settings::load_from(Some(&config_path))?;

    std::fs::create_dir_all(settings.data_dir())?;

    let account = cli.account.as_str();

    match &cli.command {
        Commands::Serve { host, port } => {
            commands::run_serve(host.clone(), *port, settings).await?;
        }

        Commands::Classroom { action } => {
            commands::run_classroom(action, account, settings).await?;
        }

        Commands::Upload {
            classroom,
            path,
            mime,
        } => {
            commands::run_upload(*classroom, path, mime.as_deref(), account, settings).await?;
        }

        Commands::Documents { classroom } => {
            commands::run_documents(*classroom, account, settings).await?;
        }

        Commands::Reindex { document } => {
            commands::run_reindex(*document, account, settings).await?;
        }

        Commands::Delete { document } => {
            commands::run_delete(*document, account, settings).await?;
        }

        Commands::Ask {
            classroom,
            question,
            documents,
        } => {
            commands::run_ask(*classroom, question, documents, account, settings).await?;
        }

        Commands::Flashcards { study, count } => {
            commands::run_study(ArtifactKind::Flashcards, study, *count, None, account, settings)
                .await?;
        }

        Commands::Quiz { study, count } => {
            commands::run_study(ArtifactKind::Quiz, study, *count, None, account, settings).await?;
        }

        Commands::Summarize { study, length } => {
            commands::run_study(ArtifactKind::Summary, study, None, *length, account, settings)
                .await?;
        }

        Commands::Artifacts { action } => {
            commands::run_artifacts(action, account, settings).await?;
        }

        Commands::Usage => {
            commands::run_usage(account, settings).await?;
        }

        Commands::Tier { tier } => {
            commands::run_tier(*tier, account, settings).await?;
        }

        Commands::Doctor => {
            commands::run_doctor(&settings, &config_path)?;
        }

        Commands::Config { action } => {
            commands::run_config(action, &settings, &config_path)?;
        }
    }

    Ok(())
}
