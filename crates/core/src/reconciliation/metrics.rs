//! Reconciliation observability counters.

use std::time::Duration;

use rust_decimal::Decimal;

use super::types::{CheckType, ReconciliationReport, RunType, Severity};

/// Receives reconciliation counters and gauges.
pub trait ReconciliationMetrics: Send + Sync {
    /// A run started.
    fn run_started(&self, run_type: RunType);

    /// A run finished, whatever its status.
    fn run_completed(&self, report: &ReconciliationReport);

    /// One check finished.
    fn check_result(&self, check_type: CheckType, passed: bool, execution_time: Duration);

    /// Size of a discrepancy found by a check.
    fn discrepancy_amount(&self, check_type: CheckType, amount: Decimal);

    /// An exception was handed to the correction hook.
    fn exception_auto_corrected(&self, check_type: CheckType);

    /// An alertable exception was reported.
    fn alert_sent(&self, check_type: CheckType, severity: Severity);
}

/// Emits every metric as a structured `tracing` event under the
/// `tally::metrics` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl ReconciliationMetrics for TracingMetrics {
    fn run_started(&self, run_type: RunType) {
        tracing::info!(target: "tally::metrics", metric = "reconciliation_runs_total", run_type = %run_type);
    }

    fn run_completed(&self, report: &ReconciliationReport) {
        tracing::info!(
            target: "tally::metrics",
            metric = "reconciliation_runs_completed_total",
            run_type = %report.run_type,
            status = %report.status,
            total_checks = report.total_checks,
            passed_checks = report.passed_checks,
            failed_checks = report.failed_checks,
            exceptions = report.exceptions_count,
        );
    }

    fn check_result(&self, check_type: CheckType, passed: bool, execution_time: Duration) {
        tracing::info!(
            target: "tally::metrics",
            metric = "reconciliation_check_duration_ms",
            check_type = %check_type,
            passed,
            value = u64::try_from(execution_time.as_millis()).unwrap_or(u64::MAX),
        );
    }

    fn discrepancy_amount(&self, check_type: CheckType, amount: Decimal) {
        tracing::info!(
            target: "tally::metrics",
            metric = "reconciliation_discrepancy_amount",
            check_type = %check_type,
            value = %amount,
        );
    }

    fn exception_auto_corrected(&self, check_type: CheckType) {
        tracing::info!(
            target: "tally::metrics",
            metric = "reconciliation_exceptions_auto_corrected_total",
            check_type = %check_type,
        );
    }

    fn alert_sent(&self, check_type: CheckType, severity: Severity) {
        tracing::info!(
            target: "tally::metrics",
            metric = "reconciliation_alerts_total",
            check_type = %check_type,
            severity = %severity,
        );
    }
}
