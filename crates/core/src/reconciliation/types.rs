//! Reconciliation reports, check results and exceptions.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{Currency, ExceptionId, ReportId};

/// What triggered a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunType {
    /// Hourly schedule.
    Hourly,
    /// Daily schedule.
    Daily,
    /// Operator request.
    Manual,
}

impl RunType {
    /// Every variant.
    pub const ALL: [Self; 3] = [Self::Hourly, Self::Daily, Self::Manual];

    /// Returns the snake_case name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hourly => "hourly",
            Self::Daily => "daily",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for RunType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("Unknown run type: {s}"))
    }
}

/// Lifecycle of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Checks are running.
    InProgress,
    /// Every check ran (findings do not make a run fail).
    Completed,
    /// The run was abandoned, e.g. it exceeded its timeout.
    Failed,
    /// The run was cancelled by shutdown.
    Cancelled,
}

impl RunStatus {
    /// Every variant.
    pub const ALL: [Self; 4] = [Self::InProgress, Self::Completed, Self::Failed, Self::Cancelled];

    /// Returns the snake_case name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("Unknown run status: {s}"))
    }
}

/// The six audit routines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    /// Global debits vs credits, orphaned entries, malformed transactions.
    LedgerConsistency,
    /// USDC buffer vs custodian wallets.
    CustodianBalance,
    /// User fiat exposure vs brokerage buying power.
    BrokerageBalance,
    /// Completed deposits vs deposit entries.
    Deposits,
    /// Completed withdrawals vs withdrawal entries.
    Withdrawals,
    /// Completed conversion jobs without a ledger transaction.
    ConversionJobs,
}

impl CheckType {
    /// Every check type, in reporting order.
    pub const ALL: [Self; 6] = [
        Self::LedgerConsistency,
        Self::CustodianBalance,
        Self::BrokerageBalance,
        Self::Deposits,
        Self::Withdrawals,
        Self::ConversionJobs,
    ];

    /// Returns the snake_case name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LedgerConsistency => "ledger_consistency",
            Self::CustodianBalance => "custodian_balance",
            Self::BrokerageBalance => "brokerage_balance",
            Self::Deposits => "deposits",
            Self::Withdrawals => "withdrawals",
            Self::ConversionJobs => "conversion_jobs",
        }
    }
}

impl std::fmt::Display for CheckType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("Unknown check type: {s}"))
    }
}

/// How serious a discrepancy is. Ordered from least to most serious.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Rounding-level noise.
    Low,
    /// Worth a look.
    Medium,
    /// Needs attention; alerts are sent.
    High,
    /// Needs attention now; alerts are sent.
    Critical,
}

impl Severity {
    /// Every variant.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Returns the snake_case name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// High and critical findings are alerted on.
    #[must_use]
    pub const fn requires_alert(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("Unknown severity: {s}"))
    }
}

/// One detected discrepancy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationException {
    /// Exception ID.
    pub id: ExceptionId,
    /// Owning report.
    pub report_id: ReportId,
    /// Check that raised it.
    pub check_type: CheckType,
    /// Severity.
    pub severity: Severity,
    /// Human-readable summary.
    pub description: String,
    /// Value the check expected.
    pub expected: Decimal,
    /// Value the check observed.
    pub actual: Decimal,
    /// `actual - expected`.
    pub difference: Decimal,
    /// Currency of the amounts, `None` when they are counts.
    pub currency: Option<Currency>,
    /// ID of the external entity involved, if any.
    pub affected_entity: Option<String>,
    /// Extra context.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Set once the correction hook has handled it.
    pub auto_corrected: bool,
    /// Set by an operator.
    pub resolved: bool,
    /// Detection time.
    pub created_at: DateTime<Utc>,
}

impl ReconciliationException {
    /// Creates an exception for an amount (or count, when `currency` is `None`).
    #[must_use]
    pub fn new(
        report_id: ReportId,
        check_type: CheckType,
        severity: Severity,
        description: impl Into<String>,
        expected: Decimal,
        actual: Decimal,
        currency: Option<Currency>,
    ) -> Self {
        Self {
            id: ExceptionId::new(),
            report_id,
            check_type,
            severity,
            description: description.into(),
            expected,
            actual,
            difference: actual - expected,
            currency,
            affected_entity: None,
            metadata: serde_json::Map::new(),
            auto_corrected: false,
            resolved: false,
            created_at: Utc::now(),
        }
    }

    /// Names the external entity involved.
    #[must_use]
    pub fn with_entity(mut self, entity: impl Into<String>) -> Self {
        self.affected_entity = Some(entity.into());
        self
    }

    /// Adds a metadata field.
    #[must_use]
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// Only low-severity exceptions that were not already handled may be
    /// auto-corrected.
    #[must_use]
    pub fn can_auto_correct(&self) -> bool {
        self.severity == Severity::Low && !self.auto_corrected
    }
}

/// Outcome of one check within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    /// Which check.
    pub check_type: CheckType,
    /// Value the check expected.
    pub expected_value: Decimal,
    /// Value the check observed.
    pub actual_value: Decimal,
    /// `actual_value - expected_value`.
    pub difference: Decimal,
    /// True when the check ran and found nothing.
    pub passed: bool,
    /// Set when the check could not fetch its data.
    pub error_message: Option<String>,
    /// Findings.
    pub exceptions: Vec<ReconciliationException>,
    /// Wall time spent.
    pub execution_time: Duration,
}

impl CheckResult {
    /// A check that ran to completion. Passes iff there are no exceptions.
    #[must_use]
    pub fn completed(
        check_type: CheckType,
        expected_value: Decimal,
        actual_value: Decimal,
        exceptions: Vec<ReconciliationException>,
        execution_time: Duration,
    ) -> Self {
        Self {
            check_type,
            expected_value,
            actual_value,
            difference: actual_value - expected_value,
            passed: exceptions.is_empty(),
            error_message: None,
            exceptions,
            execution_time,
        }
    }

    /// A check that could not fetch its data. Fails without exceptions.
    #[must_use]
    pub fn execution_error(
        check_type: CheckType,
        message: impl Into<String>,
        execution_time: Duration,
    ) -> Self {
        Self {
            check_type,
            expected_value: Decimal::ZERO,
            actual_value: Decimal::ZERO,
            difference: Decimal::ZERO,
            passed: false,
            error_message: Some(message.into()),
            exceptions: Vec::new(),
            execution_time,
        }
    }

    /// Returns true if the check failed because it could not run.
    #[must_use]
    pub const fn is_execution_error(&self) -> bool {
        self.error_message.is_some()
    }
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    /// Report ID.
    pub id: ReportId,
    /// What triggered the run.
    pub run_type: RunType,
    /// Lifecycle state.
    pub status: RunStatus,
    /// Run start.
    pub started_at: DateTime<Utc>,
    /// Run end, once finalized.
    pub completed_at: Option<DateTime<Utc>>,
    /// Checks recorded so far.
    pub total_checks: u32,
    /// Checks that passed.
    pub passed_checks: u32,
    /// Checks that found something or could not run.
    pub failed_checks: u32,
    /// Exceptions across all checks.
    pub exceptions_count: u32,
    /// Why the run failed or was cancelled.
    pub error_message: Option<String>,
    /// Extra context.
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Per-check results.
    pub checks: Vec<CheckResult>,
}

impl ReconciliationReport {
    /// Starts a new in-progress report.
    #[must_use]
    pub fn start(run_type: RunType) -> Self {
        Self {
            id: ReportId::new(),
            run_type,
            status: RunStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            total_checks: 0,
            passed_checks: 0,
            failed_checks: 0,
            exceptions_count: 0,
            error_message: None,
            metadata: serde_json::Map::new(),
            checks: Vec::new(),
        }
    }

    /// Adds a check result and updates the counters.
    pub fn record(&mut self, result: CheckResult) {
        self.total_checks += 1;
        if result.passed {
            self.passed_checks += 1;
        } else {
            self.failed_checks += 1;
        }
        self.exceptions_count += u32::try_from(result.exceptions.len()).unwrap_or(u32::MAX);
        self.checks.push(result);
    }

    /// Marks the run as finished.
    pub fn finalize(&mut self, status: RunStatus, error_message: Option<String>) {
        self.status = status;
        self.error_message = error_message;
        self.completed_at = Some(Utc::now());
    }

    /// Every exception across all checks.
    pub fn exceptions(&self) -> impl Iterator<Item = &ReconciliationException> {
        self.checks.iter().flat_map(|c| c.exceptions.iter())
    }

    /// Most serious exception severity, if any.
    #[must_use]
    pub fn highest_severity(&self) -> Option<Severity> {
        self.exceptions().map(|e| e.severity).max()
    }

    /// Exceptions that warrant an alert.
    pub fn alertable_exceptions(&self) -> impl Iterator<Item = &ReconciliationException> {
        self.exceptions().filter(|e| e.severity.requires_alert())
    }

    /// True once the run is no longer in progress.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.status != RunStatus::InProgress
    }
}
