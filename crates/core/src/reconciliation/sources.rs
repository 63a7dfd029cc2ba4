//! Data sources the checks read from.
//!
//! The ledger side comes from `LedgerAggregates` and the engine. Everything here is
//! owned by another system: the custodian, the brokerage, and the deposit,
//! withdrawal and conversion-job records kept by the funding services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use uuid::Uuid;

use crate::ledger::{LedgerError, StoreError};

/// Errors raised while fetching reconciliation inputs.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Ledger query failed.
    #[error("ledger query failed: {0}")]
    Ledger(String),

    /// Temporary failure (network, timeout, 5xx); worth retrying.
    #[error("{source_name} temporarily unavailable: {message}")]
    Unavailable {
        /// Which source.
        source_name: &'static str,
        /// Detail.
        message: String,
    },

    /// Failure that a retry will not fix (bad credentials, malformed payload).
    #[error("{source_name} request failed: {message}")]
    Rejected {
        /// Which source.
        source_name: &'static str,
        /// Detail.
        message: String,
    },
}

impl SourceError {
    /// Returns true if a retry may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

impl From<StoreError> for SourceError {
    fn from(err: StoreError) -> Self {
        Self::Ledger(err.to_string())
    }
}

impl From<LedgerError> for SourceError {
    fn from(err: LedgerError) -> Self {
        Self::Ledger(err.to_string())
    }
}

/// Stablecoin custodian holding the platform's wallets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CustodianClient: Send + Sync {
    /// Sum of USDC across all custodial wallets.
    async fn total_stablecoin_balance(&self) -> Result<Decimal, SourceError>;
}

/// Brokerage holding users' dollar exposure.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerageClient: Send + Sync {
    /// Total buying power across all brokerage accounts.
    async fn total_buying_power(&self) -> Result<Decimal, SourceError>;
}

/// Deposit records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DepositSource: Send + Sync {
    /// Sum of completed deposits.
    async fn total_completed_deposits(&self) -> Result<Decimal, SourceError>;
}

/// Withdrawal records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WithdrawalSource: Send + Sync {
    /// Sum of completed withdrawals.
    async fn total_completed_withdrawals(&self) -> Result<Decimal, SourceError>;
}

/// A conversion job that the provider reported as completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionJob {
    /// Job ID.
    pub id: Uuid,
    /// Converted amount in USD.
    pub amount: Decimal,
    /// e.g. `usdc_to_usd`.
    pub direction: String,
    /// Provider that executed it.
    pub provider: Option<String>,
    /// Completion time.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Conversion job records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversionSource: Send + Sync {
    /// Completed jobs that have no ledger transaction, oldest first.
    async fn completed_jobs_without_ledger_entry(&self) -> Result<Vec<ConversionJob>, SourceError>;
}
