//! Reconciliation: read-only audits of the ledger against itself and against
//! the systems that actually hold the money.
//!
//! - Report, check result and exception types
//! - The severity classifier
//! - The six checks and the external-source seams they read from
//! - Retry wrappers for the external balance sources
//! - The run service, its report store, alerts and metrics
//! - The scheduler

pub mod alerts;
pub mod checks;
pub mod metrics;
pub mod retry;
pub mod scheduler;
pub mod service;
pub mod severity;
pub mod sources;
pub mod store;
pub mod types;

pub use alerts::{
    Alert, AlertError, AlertSink, CorrectionHook, FanoutAlertSink, LoggingCorrectionHook,
};
pub use checks::{
    BrokerageBalanceCheck, CheckOutcome, CheckSources, ConversionJobsCheck, CustodianBalanceCheck,
    DepositsCheck, LedgerConsistencyCheck, ReconciliationCheck, Tolerances, WithdrawalsCheck,
    default_checks,
};
pub use metrics::{ReconciliationMetrics, TracingMetrics};
pub use retry::{RetryPolicy, RetryingBrokerage, RetryingCustodian};
pub use scheduler::{ReconciliationScheduler, Schedule, SchedulerError, next_daily_run};
pub use service::{ReconciliationError, ReconciliationService, RunOptions};
pub use severity::SeverityPolicy;
pub use sources::{
    BrokerageClient, ConversionJob, ConversionSource, CustodianClient, DepositSource, SourceError,
    WithdrawalSource,
};
pub use store::{InMemoryReportStore, ReportStore, ReportStoreError};
pub use types::{
    CheckResult, CheckType, ReconciliationException, ReconciliationReport, RunStatus, RunType,
    Severity,
};
