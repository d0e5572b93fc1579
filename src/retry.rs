//! Bounded retry with exponential backoff and per-call timeouts.
//!
//! Every external call (extraction model, embeddings, vector index, completion)
//! goes through [`RetryPolicy::run`]. Only errors for which
//! [`StudyError::is_transient`] holds are retried; a call exceeding the timeout
//! counts as transient. When attempts run out the last error is returned as-is
//! so the caller can convert it with [`StudyError::exhausted`].

use crate::config::RetrySettings;
use crate::error::{Result, StudyError};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&RetrySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            call_timeout: Duration::from_secs(settings.call_timeout_secs),
        }
    }

    /// A single attempt with the given timeout.
    pub fn no_retry(call_timeout: Duration) -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            call_timeout,
        }
    }

    /// Delay before attempt `attempt` (1-based, so attempt 2 waits `initial_backoff`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = 1u32 << (attempt - 2).min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts are exhausted.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let outcome = match tokio::time::timeout(self.call_timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(StudyError::Transient(format!(
                    "{} timed out after {:?}",
                    label, self.call_timeout
                ))),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", label, attempt);
                    }
                    return Ok(value);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        "{} failed ({}), retrying in {:?} (attempt {}/{})",
                        label, e, delay, attempt, self.max_attempts
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            call_timeout: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
            call_timeout: Duration::from_secs(1),
        };
        assert_eq!(policy.backoff(1), Duration::ZERO);
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(4), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(3)
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(StudyError::Transient("503".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(3)
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StudyError::Transient("503".to_string()))
            })
            .await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = fast_policy(3)
            .run("bad request", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(StudyError::Embedding("400".to_string()))
            })
            .await;

        assert!(matches!(result, Err(StudyError::Embedding(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let policy = RetryPolicy {
            call_timeout: Duration::from_millis(5),
            ..fast_policy(2)
        };
        let calls = AtomicU32::new(0);
        let result: Result<()> = policy
            .run("slow", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(StudyError::Transient(ref m)) if m.contains("timed out")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
