//! Per-account quota enforcement.
//!
//! The daily weighted-token budget is checked against an estimate before any
//! billable call and reconciled with the real cost afterwards. Days are keyed
//! by UTC date, so the budget resets without a background job.

use crate::config::{TierLimits, TierSettings, UsageWeights};
use crate::error::{Result, StudyError};
use crate::models::{AccountTier, UsageCounter};
use crate::store::{AccountDirectory, MetadataStore};
use chrono::{NaiveDate, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Rough token count for budgeting: one token per four bytes.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Weighted tokens for `tokens` raw tokens at `weight`, rounded up.
pub fn weigh(tokens: u64, weight: f64) -> u64 {
    (tokens as f64 * weight).ceil() as u64
}

/// Accumulates weighted tokens spent by calls that completed, even when the
/// enclosing operation later fails.
#[derive(Debug, Default)]
pub struct UsageTally(AtomicU64);

impl UsageTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, weighted_tokens: u64) {
        self.0.fetch_add(weighted_tokens, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Return the tally and reset it to zero.
    pub fn take(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}

pub struct QuotaGuard {
    store: Arc<dyn MetadataStore>,
    accounts: Arc<dyn AccountDirectory>,
    tiers: TierSettings,
    weights: UsageWeights,
    clock: fn() -> NaiveDate,
}

fn utc_today() -> NaiveDate {
    Utc::now().date_naive()
}

impl QuotaGuard {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        accounts: Arc<dyn AccountDirectory>,
        tiers: TierSettings,
        weights: UsageWeights,
    ) -> Self {
        Self {
            store,
            accounts,
            tiers,
            weights,
            clock: utc_today,
        }
    }

    /// Replace the clock that decides which day usage is charged to.
    pub fn with_clock(mut self, clock: fn() -> NaiveDate) -> Self {
        self.clock = clock;
        self
    }

    pub fn today(&self) -> NaiveDate {
        (self.clock)()
    }

    pub fn weights(&self) -> &UsageWeights {
        &self.weights
    }

    pub async fn tier(&self, account_id: &str) -> Result<AccountTier> {
        self.accounts.get_tier(account_id).await
    }

    pub async fn limits(&self, account_id: &str) -> Result<TierLimits> {
        let tier = self.tier(account_id).await?;
        Ok(self.tiers.limits(tier).clone())
    }

    pub fn embedding_cost(&self, tokens: u64) -> u64 {
        weigh(tokens, self.weights.embedding)
    }

    pub fn completion_cost(&self, input_tokens: u64, output_tokens: u64) -> u64 {
        weigh(input_tokens, self.weights.completion_input)
            + weigh(output_tokens, self.weights.completion_output)
    }

    pub fn vision_cost(&self, tokens: u64) -> u64 {
        weigh(tokens, self.weights.vision)
    }

    /// Reject the request if `estimate` would push today's usage past the cap.
    ///
    /// Nothing is written; the real cost is added by [`QuotaGuard::record`]
    /// once the call completes.
    #[instrument(skip(self))]
    pub async fn check_and_reserve(&self, account_id: &str, estimate: u64) -> Result<()> {
        let limits = self.limits(account_id).await?;
        let used = self.store.usage_for_day(account_id, self.today()).await?;
        let cap = limits.daily_weighted_tokens;

        if used.saturating_add(estimate) > cap {
            info!(
                "Rejecting request for {}: {} used + {} estimated > {}",
                account_id, used, estimate, cap
            );
            return Err(StudyError::QuotaExceeded(format!(
                "daily budget of {} weighted tokens reached ({} used, {} requested)",
                cap, used, estimate
            )));
        }
        Ok(())
    }

    /// Add actual usage to today's counter.
    pub async fn record(&self, account_id: &str, weighted_tokens: u64) -> Result<u64> {
        if weighted_tokens == 0 {
            return self.store.usage_for_day(account_id, self.today()).await;
        }
        let total = self
            .store
            .add_usage(account_id, self.today(), weighted_tokens)
            .await?;
        debug!("Recorded {} weighted tokens for {} (total {})", weighted_tokens, account_id, total);
        Ok(total)
    }

    /// Reject an upload that would exceed the tier's storage cap.
    pub async fn check_storage(&self, account_id: &str, additional_bytes: u64) -> Result<()> {
        let limits = self.limits(account_id).await?;
        let used = self.store.storage_used(account_id).await?;
        if used.saturating_add(additional_bytes) > limits.max_storage_bytes {
            return Err(StudyError::QuotaExceeded(format!(
                "storage limit of {} bytes reached ({} used, {} uploading)",
                limits.max_storage_bytes, used, additional_bytes
            )));
        }
        Ok(())
    }

    /// Reject classroom creation past the tier's classroom cap.
    pub async fn check_classroom_slot(&self, account_id: &str) -> Result<()> {
        let limits = self.limits(account_id).await?;
        let count = self.store.count_classrooms(account_id).await?;
        if count >= limits.max_classrooms {
            return Err(StudyError::QuotaExceeded(format!(
                "classroom limit of {} reached",
                limits.max_classrooms
            )));
        }
        Ok(())
    }

    /// Today's usage counter for an account.
    pub async fn usage(&self, account_id: &str) -> Result<UsageCounter> {
        let day = self.today();
        Ok(UsageCounter {
            account_id: account_id.to_string(),
            day,
            weighted_tokens: self.store.usage_for_day(account_id, day).await?,
            classroom_count: self.store.count_classrooms(account_id).await?,
            storage_bytes: self.store.storage_used(account_id).await?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Classroom;
    use crate::store::SqliteMetadataStore;

    fn guard_with_cap(cap: u64) -> (Arc<SqliteMetadataStore>, QuotaGuard) {
        let store = Arc::new(SqliteMetadataStore::in_memory().unwrap());
        let tiers = TierSettings {
            free: TierLimits {
                max_classrooms: 1,
                max_storage_bytes: 1_000,
                daily_weighted_tokens: cap,
            },
            ..TierSettings::default()
        };
        let guard = QuotaGuard::new(store.clone(), store.clone(), tiers, UsageWeights::default())
            .with_clock(|| NaiveDate::from_ymd_opt(2026, 1, 5).unwrap());
        (store, guard)
    }

    #[tokio::test]
    async fn test_rejects_estimate_that_would_exceed_cap() {
        let (_, guard) = guard_with_cap(100);
        guard.record("acct", 99).await.unwrap();

        let err = guard.check_and_reserve("acct", 5).await.unwrap_err();
        assert!(matches!(err, StudyError::QuotaExceeded(_)));
        guard.check_and_reserve("acct", 1).await.unwrap();
    }

    #[tokio::test]
    async fn test_record_may_overshoot_cap() {
        let (_, guard) = guard_with_cap(100);
        guard.check_and_reserve("acct", 90).await.unwrap();
        assert_eq!(guard.record("acct", 120).await.unwrap(), 120);
        assert!(guard.check_and_reserve("acct", 0).await.is_err());
    }

    #[tokio::test]
    async fn test_usage_is_keyed_by_day() {
        let (store, guard) = guard_with_cap(100);
        store
            .add_usage("acct", NaiveDate::from_ymd_opt(2026, 1, 4).unwrap(), 100)
            .await
            .unwrap();
        guard.check_and_reserve("acct", 100).await.unwrap();
        assert_eq!(guard.usage("acct").await.unwrap().weighted_tokens, 0);
    }

    #[tokio::test]
    async fn test_premium_tier_uses_premium_limits() {
        let (store, guard) = guard_with_cap(10);
        store.set_tier("paid", AccountTier::Premium).await.unwrap();
        guard.check_and_reserve("paid", 10_000).await.unwrap();
        assert!(guard.check_and_reserve("free", 11).await.is_err());
    }

    #[tokio::test]
    async fn test_classroom_and_storage_caps() {
        let (store, guard) = guard_with_cap(100);
        guard.check_classroom_slot("acct").await.unwrap();
        store.create_classroom(&Classroom::new("acct", "One")).await.unwrap();
        assert!(matches!(
            guard.check_classroom_slot("acct").await,
            Err(StudyError::QuotaExceeded(_))
        ));

        guard.check_storage("acct", 1_000).await.unwrap();
        assert!(guard.check_storage("acct", 1_001).await.is_err());
    }

    #[test]
    fn test_costs_round_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(weigh(3, 0.1), 1);
        assert_eq!(weigh(10, 3.0), 30);
        let tally = UsageTally::new();
        tally.add(4);
        tally.add(6);
        assert_eq!(tally.take(), 10);
        assert_eq!(tally.total(), 0);
    }
}
