//! The six reconciliation checks.
//!
//! Checks are read-only and independent of each other. Each implements
//! `ReconciliationCheck`; `execute` times a check and turns a data-source failure
//! into an execution error so one unreachable source never stops the run.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tally_shared::types::{Currency, ReportId};

use super::severity::SeverityPolicy;
use super::sources::{
    BrokerageClient, ConversionSource, CustodianClient, DepositSource, SourceError,
    WithdrawalSource,
};
use super::types::{CheckResult, CheckType, ReconciliationException, Severity};
use crate::ledger::{AccountType, LedgerAggregates, LedgerEngine};

/// What a check computed when it could reach all of its data.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    /// Value the check expected.
    pub expected: Decimal,
    /// Value the check observed.
    pub actual: Decimal,
    /// Findings, empty when the check passes.
    pub exceptions: Vec<ReconciliationException>,
}

/// A single audit routine.
#[async_trait]
pub trait ReconciliationCheck: Send + Sync {
    /// Which check this is.
    fn check_type(&self) -> CheckType;

    /// Fetches the data and compares it.
    async fn evaluate(&self, report_id: ReportId) -> Result<CheckOutcome, SourceError>;
}

/// Runs one check and packages the outcome as a `CheckResult`.
pub async fn execute(check: &dyn ReconciliationCheck, report_id: ReportId) -> CheckResult {
    let check_type = check.check_type();
    let started = Instant::now();
    match check.evaluate(report_id).await {
        Ok(outcome) => CheckResult::completed(
            check_type,
            outcome.expected,
            outcome.actual,
            outcome.exceptions,
            started.elapsed(),
        ),
        Err(e) => {
            tracing::error!(check = %check_type, error = %e, "Reconciliation check could not run");
            CheckResult::execution_error(check_type, e.to_string(), started.elapsed())
        }
    }
}

/// Builds the exception for a two-system comparison if `|actual - expected|`
/// exceeds `tolerance`.
#[allow(clippy::too_many_arguments)]
fn compare_with_tolerance(
    report_id: ReportId,
    check_type: CheckType,
    severity: &SeverityPolicy,
    description: &str,
    expected: Decimal,
    actual: Decimal,
    tolerance: Decimal,
    currency: Currency,
    labels: (&str, &str),
) -> Vec<ReconciliationException> {
    let difference = actual - expected;
    if difference.abs() <= tolerance {
        return Vec::new();
    }

    let exception = ReconciliationException::new(
        report_id,
        check_type,
        severity.classify(difference, currency),
        description,
        expected,
        actual,
        Some(currency),
    )
    .with_metadata(labels.0, expected.to_string())
    .with_metadata(labels.1, actual.to_string())
    .with_metadata("tolerance", tolerance.to_string());
    vec![exception]
}

/// Global debits vs credits plus structural corruption counts.
pub struct LedgerConsistencyCheck {
    aggregates: Arc<dyn LedgerAggregates>,
    severity: Arc<SeverityPolicy>,
}

impl LedgerConsistencyCheck {
    /// Creates the check.
    #[must_use]
    pub fn new(aggregates: Arc<dyn LedgerAggregates>, severity: Arc<SeverityPolicy>) -> Self {
        Self {
            aggregates,
            severity,
        }
    }
}

#[async_trait]
impl ReconciliationCheck for LedgerConsistencyCheck {
    fn check_type(&self) -> CheckType {
        CheckType::LedgerConsistency
    }

    async fn evaluate(&self, report_id: ReportId) -> Result<CheckOutcome, SourceError> {
        let totals = self.aggregates.total_debits_and_credits().await?;
        let orphaned = self.aggregates.orphaned_entry_count().await?;
        let malformed = self.aggregates.malformed_transaction_count().await?;
        let check_type = self.check_type();
        let mut exceptions = Vec::new();

        if !totals.is_balanced() {
            exceptions.push(
                ReconciliationException::new(
                    report_id,
                    check_type,
                    self.severity.classify(totals.difference(), Currency::Usd),
                    "Ledger debits and credits do not balance",
                    totals.debits,
                    totals.credits,
                    Some(Currency::Usd),
                )
                .with_metadata("total_debits", totals.debits.to_string())
                .with_metadata("total_credits", totals.credits.to_string()),
            );
        }

        if orphaned > 0 {
            exceptions.push(
                ReconciliationException::new(
                    report_id,
                    check_type,
                    Severity::High,
                    format!("Found {orphaned} orphaned ledger entries without matching transactions"),
                    Decimal::ZERO,
                    Decimal::from(orphaned),
                    None,
                )
                .with_metadata("orphaned_count", orphaned),
            );
        }

        if malformed > 0 {
            exceptions.push(
                ReconciliationException::new(
                    report_id,
                    check_type,
                    Severity::High,
                    format!("Found {malformed} transactions without exactly 2 entries"),
                    Decimal::ZERO,
                    Decimal::from(malformed),
                    None,
                )
                .with_metadata("malformed_transaction_count", malformed),
            );
        }

        Ok(CheckOutcome {
            expected: totals.debits,
            actual: totals.credits,
            exceptions,
        })
    }
}

/// Ledger USDC buffer vs custodian wallet balances.
pub struct CustodianBalanceCheck {
    ledger: LedgerEngine,
    custodian: Arc<dyn CustodianClient>,
    tolerance: Decimal,
    severity: Arc<SeverityPolicy>,
}

impl CustodianBalanceCheck {
    /// Creates the check.
    #[must_use]
    pub fn new(
        ledger: LedgerEngine,
        custodian: Arc<dyn CustodianClient>,
        tolerance: Decimal,
        severity: Arc<SeverityPolicy>,
    ) -> Self {
        Self {
            ledger,
            custodian,
            tolerance,
            severity,
        }
    }
}

#[async_trait]
impl ReconciliationCheck for CustodianBalanceCheck {
    fn check_type(&self) -> CheckType {
        CheckType::CustodianBalance
    }

    async fn evaluate(&self, report_id: ReportId) -> Result<CheckOutcome, SourceError> {
        let ledger_balance = self
            .ledger
            .get_system_buffer_balance(AccountType::SystemBufferUsdc)
            .await?;
        let custodian_balance = self.custodian.total_stablecoin_balance().await?;

        let exceptions = compare_with_tolerance(
            report_id,
            self.check_type(),
            &self.severity,
            "Custodian wallet balance does not match ledger system_buffer_usdc",
            ledger_balance,
            custodian_balance,
            self.tolerance,
            Currency::Usdc,
            ("ledger_balance", "custodian_balance"),
        );

        Ok(CheckOutcome {
            expected: ledger_balance,
            actual: custodian_balance,
            exceptions,
        })
    }
}

/// Sum of user fiat exposure vs brokerage buying power.
pub struct BrokerageBalanceCheck {
    ledger: LedgerEngine,
    brokerage: Arc<dyn BrokerageClient>,
    tolerance: Decimal,
    severity: Arc<SeverityPolicy>,
}

impl BrokerageBalanceCheck {
    /// Creates the check.
    #[must_use]
    pub fn new(
        ledger: LedgerEngine,
        brokerage: Arc<dyn BrokerageClient>,
        tolerance: Decimal,
        severity: Arc<SeverityPolicy>,
    ) -> Self {
        Self {
            ledger,
            brokerage,
            tolerance,
            severity,
        }
    }
}

#[async_trait]
impl ReconciliationCheck for BrokerageBalanceCheck {
    fn check_type(&self) -> CheckType {
        CheckType::BrokerageBalance
    }

    async fn evaluate(&self, report_id: ReportId) -> Result<CheckOutcome, SourceError> {
        let fiat_exposure = self.ledger.get_total_user_fiat_exposure().await?;
        let buying_power = self.brokerage.total_buying_power().await?;

        let exceptions = compare_with_tolerance(
            report_id,
            self.check_type(),
            &self.severity,
            "Brokerage buying power does not match total user fiat exposure",
            fiat_exposure,
            buying_power,
            self.tolerance,
            Currency::Usd,
            ("ledger_fiat_exposure", "brokerage_buying_power"),
        );

        Ok(CheckOutcome {
            expected: fiat_exposure,
            actual: buying_power,
            exceptions,
        })
    }
}

/// Completed deposits vs credit entries of deposit transactions.
pub struct DepositsCheck {
    aggregates: Arc<dyn LedgerAggregates>,
    deposits: Arc<dyn DepositSource>,
    severity: Arc<SeverityPolicy>,
}

impl DepositsCheck {
    /// Creates the check.
    #[must_use]
    pub fn new(
        aggregates: Arc<dyn LedgerAggregates>,
        deposits: Arc<dyn DepositSource>,
        severity: Arc<SeverityPolicy>,
    ) -> Self {
        Self {
            aggregates,
            deposits,
            severity,
        }
    }
}

#[async_trait]
impl ReconciliationCheck for DepositsCheck {
    fn check_type(&self) -> CheckType {
        CheckType::Deposits
    }

    async fn evaluate(&self, report_id: ReportId) -> Result<CheckOutcome, SourceError> {
        let recorded = self.deposits.total_completed_deposits().await?;
        let ledger_total = self.aggregates.total_deposit_entries().await?;

        let exceptions = compare_with_tolerance(
            report_id,
            self.check_type(),
            &self.severity,
            "Deposit records do not match ledger deposit entries",
            recorded,
            ledger_total,
            Decimal::ZERO,
            Currency::Usdc,
            ("deposits_table_total", "ledger_deposits_total"),
        );

        Ok(CheckOutcome {
            expected: recorded,
            actual: ledger_total,
            exceptions,
        })
    }
}

/// Completed withdrawals vs debit entries of withdrawal transactions.
pub struct WithdrawalsCheck {
    aggregates: Arc<dyn LedgerAggregates>,
    withdrawals: Arc<dyn WithdrawalSource>,
    severity: Arc<SeverityPolicy>,
}

impl WithdrawalsCheck {
    /// Creates the check.
    #[must_use]
    pub fn new(
        aggregates: Arc<dyn LedgerAggregates>,
        withdrawals: Arc<dyn WithdrawalSource>,
        severity: Arc<SeverityPolicy>,
    ) -> Self {
        Self {
            aggregates,
            withdrawals,
            severity,
        }
    }
}

#[async_trait]
impl ReconciliationCheck for WithdrawalsCheck {
    fn check_type(&self) -> CheckType {
        CheckType::Withdrawals
    }

    async fn evaluate(&self, report_id: ReportId) -> Result<CheckOutcome, SourceError> {
        let recorded = self.withdrawals.total_completed_withdrawals().await?;
        let ledger_total = self.aggregates.total_withdrawal_entries().await?;

        let exceptions = compare_with_tolerance(
            report_id,
            self.check_type(),
            &self.severity,
            "Withdrawal records do not match ledger withdrawal entries",
            recorded,
            ledger_total,
            Decimal::ZERO,
            Currency::Usdc,
            ("withdrawals_table_total", "ledger_withdrawals_total"),
        );

        Ok(CheckOutcome {
            expected: recorded,
            actual: ledger_total,
            exceptions,
        })
    }
}

/// Completed conversion jobs that never reached the ledger.
///
/// Each orphaned job is its own exception.
pub struct ConversionJobsCheck {
    conversions: Arc<dyn ConversionSource>,
}

impl ConversionJobsCheck {
    /// Creates the check.
    #[must_use]
    pub fn new(conversions: Arc<dyn ConversionSource>) -> Self {
        Self { conversions }
    }
}

#[async_trait]
impl ReconciliationCheck for ConversionJobsCheck {
    fn check_type(&self) -> CheckType {
        CheckType::ConversionJobs
    }

    async fn evaluate(&self, report_id: ReportId) -> Result<CheckOutcome, SourceError> {
        let orphaned = self.conversions.completed_jobs_without_ledger_entry().await?;

        let exceptions = orphaned
            .iter()
            .map(|job| {
                let mut exception = ReconciliationException::new(
                    report_id,
                    self.check_type(),
                    Severity::High,
                    format!("Conversion job {} completed but has no ledger entry", job.id),
                    Decimal::ZERO,
                    job.amount,
                    Some(Currency::Usd),
                )
                .with_entity(job.id.to_string())
                .with_metadata("direction", job.direction.clone());
                if let Some(provider) = &job.provider {
                    exception = exception.with_metadata("provider", provider.clone());
                }
                if let Some(completed_at) = job.completed_at {
                    exception = exception.with_metadata("completed_at", completed_at.to_rfc3339());
                }
                exception
            })
            .collect();

        Ok(CheckOutcome {
            expected: Decimal::ZERO,
            actual: Decimal::from(orphaned.len()),
            exceptions,
        })
    }
}

/// Sources the default check set reads from.
pub struct CheckSources {
    /// Ledger engine, for buffer and exposure balances.
    pub ledger: LedgerEngine,
    /// Ledger aggregate queries.
    pub aggregates: Arc<dyn LedgerAggregates>,
    /// Custodian adapter.
    pub custodian: Arc<dyn CustodianClient>,
    /// Brokerage adapter.
    pub brokerage: Arc<dyn BrokerageClient>,
    /// Deposit records.
    pub deposits: Arc<dyn DepositSource>,
    /// Withdrawal records.
    pub withdrawals: Arc<dyn WithdrawalSource>,
    /// Conversion job records.
    pub conversions: Arc<dyn ConversionSource>,
}

/// Tolerances applied by the two-system balance checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tolerances {
    /// Custodian balance tolerance.
    pub custodian: Decimal,
    /// Brokerage balance tolerance.
    pub brokerage: Decimal,
}

/// Builds the registry of all six checks.
#[must_use]
pub fn default_checks(
    sources: CheckSources,
    tolerances: Tolerances,
    severity: Arc<SeverityPolicy>,
) -> Vec<Arc<dyn ReconciliationCheck>> {
    vec![
        Arc::new(LedgerConsistencyCheck::new(
            sources.aggregates.clone(),
            severity.clone(),
        )),
        Arc::new(CustodianBalanceCheck::new(
            sources.ledger.clone(),
            sources.custodian,
            tolerances.custodian,
            severity.clone(),
        )),
        Arc::new(BrokerageBalanceCheck::new(
            sources.ledger,
            sources.brokerage,
            tolerances.brokerage,
            severity.clone(),
        )),
        Arc::new(DepositsCheck::new(
            sources.aggregates.clone(),
            sources.deposits,
            severity.clone(),
        )),
        Arc::new(WithdrawalsCheck::new(
            sources.aggregates,
            sources.withdrawals,
            severity,
        )),
        Arc::new(ConversionJobsCheck::new(sources.conversions)),
    ]
}

#[cfg(test)]
#[path = "checks_tests.rs"]
mod tests;
