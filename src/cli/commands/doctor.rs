//! Doctor command - verify configuration, credentials and storage.

use crate::cli::{format_size, Output};
use crate::config::{EmbeddingProvider, Settings};
use console::style;
use std::path::Path;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub fn run_doctor(settings: &Settings, config_path: &Path) -> anyhow::Result<()> {
    Output::header("Studydesk Doctor");
    println!();
    println!("Checking configuration and storage...\n");

    let sections = [
        ("Configuration", vec![check_config_file(config_path), check_settings(settings)]),
        ("API Keys", check_api_keys(settings)),
        ("Storage", check_storage(settings)),
    ];

    let mut errors = 0;
    let mut warnings = 0;
    for (title, checks) in &sections {
        println!("{}", style(title).bold());
        for check in checks {
            check.print();
            match check.status {
                CheckStatus::Error => errors += 1,
                CheckStatus::Warning => warnings += 1,
                CheckStatus::Ok => {}
            }
        }
        println!();
    }

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before using Studydesk.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Studydesk is ready to use.");
    }

    Ok(())
}

fn check_config_file(path: &Path) -> CheckResult {
    if path.exists() {
        CheckResult::ok("Config file", &path.display().to_string())
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: studydesk config init",
        )
    }
}

fn check_settings(settings: &Settings) -> CheckResult {
    match settings.validate() {
        Ok(()) => CheckResult::ok("Settings", "valid"),
        Err(e) => CheckResult::error("Settings", &e.to_string(), "Fix the value in the config file"),
    }
}

/// Check the API key variables the configured providers need.
fn check_api_keys(settings: &Settings) -> Vec<CheckResult> {
    let mut vars = vec![settings.completion.api_key_env.as_str()];
    if settings.embedding.provider == EmbeddingProvider::OpenAI {
        vars.push(settings.embedding.api_key_env.as_str());
    }
    vars.dedup();
    vars.into_iter().map(check_api_key).collect()
}

fn check_api_key(var: &str) -> CheckResult {
    let hint = format!("Set with: export {}='sk-...'", var);
    match std::env::var(var) {
        Ok(key) if key.len() > 12 => {
            let masked = format!("{}...{}", &key[..4], &key[key.len() - 4..]);
            CheckResult::ok(var, &format!("configured ({})", masked))
        }
        Ok(key) if key.trim().is_empty() => CheckResult::error(var, "empty", &hint),
        Ok(_) => CheckResult::warning(var, "set but looks too short", &hint),
        Err(_) => CheckResult::error(var, "not set", &hint),
    }
}

fn check_storage(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok("Data directory", &data_dir.display().to_string()));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    for (name, path) in [
        ("Metadata database", settings.metadata_path()),
        ("Vector index", settings.vector_index_path()),
    ] {
        if path.exists() {
            let size = std::fs::metadata(&path)
                .map(|m| format_size(m.len()))
                .unwrap_or_else(|_| "unknown size".to_string());
            results.push(CheckResult::ok(name, &format!("{} ({})", path.display(), size)));
        } else {
            results.push(CheckResult::warning(
                name,
                &format!("{} (not created yet)", path.display()),
                "Created on first use",
            ));
        }
    }

    results
}
