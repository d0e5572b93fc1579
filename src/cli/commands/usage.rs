//! Usage and tier commands.

use crate::app::App;
use crate::cli::{format_size, Output};
use crate::config::Settings;
use crate::models::AccountTier;
use anyhow::Result;

/// Print today's usage next to the tier limits.
pub async fn run_usage(account: &str, settings: Settings) -> Result<()> {
    let app = App::new(settings)?;
    let quota = app.quota();

    let usage = app.usage(account).await?;
    let tier = quota.tier(account).await?;
    let limits = quota.limits(account).await?;

    Output::header(&format!("Usage for {} ({})", account, usage.day));
    Output::kv("Tier", tier.as_str());
    Output::kv(
        "Weighted tokens",
        &format!("{} / {}", usage.weighted_tokens, limits.daily_weighted_tokens),
    );
    Output::kv(
        "Classrooms",
        &format!("{} / {}", usage.classroom_count, limits.max_classrooms),
    );
    Output::kv(
        "Storage",
        &format!(
            "{} / {}",
            format_size(usage.storage_bytes),
            format_size(limits.max_storage_bytes)
        ),
    );

    Ok(())
}

/// Show the account tier, or change it when `tier` is given.
pub async fn run_tier(tier: Option<AccountTier>, account: &str, settings: Settings) -> Result<()> {
    let app = App::new(settings)?;
    let accounts = app.accounts();

    match tier {
        Some(tier) => {
            accounts.set_tier(account, tier).await?;
            Output::success(&format!("{} is now on the {} tier", account, tier));
        }
        None => {
            let tier = accounts.get_tier(account).await?;
            println!("{}", tier);
        }
    }

    Ok(())
}
