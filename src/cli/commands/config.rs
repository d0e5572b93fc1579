//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::Result;
use std::path::Path;

/// Run the config command.
pub fn run_config(action: &ConfigAction, settings: &Settings, config_path: &Path) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(settings)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }

        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                Output::warning(&format!(
                    "{} already exists. Use --force to overwrite it.",
                    config_path.display()
                ));
                return Ok(());
            }
            settings.save_to(config_path)?;
            std::fs::create_dir_all(settings.data_dir())?;
            Output::success(&format!("Wrote config to {}", config_path.display()));
            Output::kv("Data directory", &settings.data_dir().display().to_string());
        }
    }

    Ok(())
}
