//! Bounded retry with exponential backoff for external reads.
//!
//! Applied at the custodian and brokerage boundary so a transient blip does not
//! show up as an execution error. The per-run timeout still bounds the total.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tally_shared::config::RetryConfig;

use super::sources::{BrokerageClient, CustodianClient, SourceError};

/// Retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff: Duration,
    /// Cap on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `retry` (0-based).
    #[must_use]
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.min(16);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error, or runs out of
    /// attempts.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, SourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(operation, attempt, "External read succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.backoff(attempt - 1);
                    tracing::warn!(
                        operation,
                        attempt,
                        error = %e,
                        "External read failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Custodian client with retries.
pub struct RetryingCustodian {
    inner: Arc<dyn CustodianClient>,
    policy: RetryPolicy,
}

impl RetryingCustodian {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn CustodianClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl CustodianClient for RetryingCustodian {
    async fn total_stablecoin_balance(&self) -> Result<Decimal, SourceError> {
        self.policy
            .run("custodian.total_stablecoin_balance", || {
                self.inner.total_stablecoin_balance()
            })
            .await
    }
}

/// Brokerage client with retries.
pub struct RetryingBrokerage {
    inner: Arc<dyn BrokerageClient>,
    policy: RetryPolicy,
}

impl RetryingBrokerage {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn BrokerageClient>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl BrokerageClient for RetryingBrokerage {
    async fn total_buying_power(&self) -> Result<Decimal, SourceError> {
        self.policy
            .run("brokerage.total_buying_power", || self.inner.total_buying_power())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::reconciliation::sources::MockCustodianClient;

    fn unavailable() -> SourceError {
        SourceError::Unavailable {
            source_name: "custodian",
            message: "503".to_string(),
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = fast_policy(5);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(250));
        assert_eq!(policy.backoff(30), Duration::from_millis(250));
    }

    #[test]
    fn test_policy_from_config_never_zero_attempts() {
        let config = RetryConfig {
            max_attempts: 0,
            ..RetryConfig::default()
        };
        assert_eq!(RetryPolicy::from(&config).max_attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_is_retried() {
        let mut mock = MockCustodianClient::new();
        let mut calls = 0;
        mock.expect_total_stablecoin_balance().times(3).returning(move || {
            calls += 1;
            if calls < 3 { Err(unavailable()) } else { Ok(dec!(1000)) }
        });

        let client = RetryingCustodian::new(Arc::new(mock), fast_policy(3));

        assert_eq!(client.total_stablecoin_balance().await.unwrap(), dec!(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let mut mock = MockCustodianClient::new();
        mock.expect_total_stablecoin_balance()
            .times(2)
            .returning(|| Err(unavailable()));

        let client = RetryingCustodian::new(Arc::new(mock), fast_policy(2));

        assert!(client.total_stablecoin_balance().await.unwrap_err().is_retryable());
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let mut mock = MockCustodianClient::new();
        mock.expect_total_stablecoin_balance().times(1).returning(|| {
            Err(SourceError::Rejected {
                source_name: "custodian",
                message: "401 unauthorized".to_string(),
            })
        });

        let client = RetryingCustodian::new(Arc::new(mock), fast_policy(5));

        assert!(!client.total_stablecoin_balance().await.unwrap_err().is_retryable());
    }
}
