//! Reconciliation runs.
//!
//! A run creates a report, executes every registered check, applies the optional
//! correction hook, sends at most one alert and finalizes the report. Findings never
//! make a run fail; only a timeout (`failed`) or cancellation (`cancelled`) does.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tally_shared::config::ReconciliationConfig;
use tally_shared::types::ReportId;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::alerts::{Alert, AlertSink, CorrectionHook, LoggingCorrectionHook};
use super::checks::{ReconciliationCheck, execute};
use super::metrics::{ReconciliationMetrics, TracingMetrics};
use super::store::{ReportStore, ReportStoreError};
use super::types::{CheckResult, ReconciliationReport, RunStatus, RunType};

/// Errors that prevent a run from producing a report at all.
#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// The report could not be created.
    #[error("Failed to create reconciliation report: {0}")]
    Storage(#[from] ReportStoreError),
}

/// Run behavior taken from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    /// Run checks concurrently instead of one after another.
    pub concurrent_checks: bool,
    /// Abandon a run that takes longer than this.
    pub run_timeout: Duration,
    /// Hand low-severity exceptions to the correction hook.
    pub auto_correct_low_severity: bool,
    /// Send alerts for high and critical exceptions.
    pub enable_alerting: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&ReconciliationConfig::default())
    }
}

impl From<&ReconciliationConfig> for RunOptions {
    fn from(config: &ReconciliationConfig) -> Self {
        Self {
            concurrent_checks: config.concurrent_checks,
            run_timeout: config.run_timeout(),
            auto_correct_low_severity: config.auto_correct_low_severity,
            enable_alerting: config.enable_alerting,
        }
    }
}

enum Outcome {
    Finished(Vec<CheckResult>),
    TimedOut,
    Cancelled,
}

/// Executes reconciliation runs.
#[derive(Clone)]
pub struct ReconciliationService {
    checks: Arc<[Arc<dyn ReconciliationCheck>]>,
    reports: Arc<dyn ReportStore>,
    metrics: Arc<dyn ReconciliationMetrics>,
    correction: Arc<dyn CorrectionHook>,
    alerts: Option<Arc<dyn AlertSink>>,
    options: RunOptions,
}

impl std::fmt::Debug for ReconciliationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationService")
            .field("checks", &self.checks.len())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ReconciliationService {
    /// Creates a service with tracing metrics, the logging correction hook and no
    /// alert sink.
    #[must_use]
    pub fn new(
        checks: Vec<Arc<dyn ReconciliationCheck>>,
        reports: Arc<dyn ReportStore>,
        options: RunOptions,
    ) -> Self {
        Self {
            checks: checks.into(),
            reports,
            metrics: Arc::new(TracingMetrics),
            correction: Arc::new(LoggingCorrectionHook),
            alerts: None,
            options,
        }
    }

    /// Replaces the metrics sink.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ReconciliationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replaces the correction hook.
    #[must_use]
    pub fn with_correction_hook(mut self, hook: Arc<dyn CorrectionHook>) -> Self {
        self.correction = hook;
        self
    }

    /// Sets where alerts are delivered.
    #[must_use]
    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(sink);
        self
    }

    /// Report storage.
    #[must_use]
    pub fn reports(&self) -> &Arc<dyn ReportStore> {
        &self.reports
    }

    /// Performs one run and returns its finalized report.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the report cannot be created. Failures after that are
    /// logged and reflected in the report instead.
    #[instrument(skip(self, cancel), fields(run_type = %run_type))]
    pub async fn run(
        &self,
        run_type: RunType,
        cancel: &CancellationToken,
    ) -> Result<ReconciliationReport, ReconciliationError> {
        info!("Starting reconciliation run");

        let mut report = ReconciliationReport::start(run_type);
        self.reports.create_report(&report).await?;
        self.metrics.run_started(run_type);

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Outcome::Cancelled,
            finished = tokio::time::timeout(self.options.run_timeout, self.run_checks(report.id)) => {
                finished.map_or(Outcome::TimedOut, Outcome::Finished)
            }
        };

        match outcome {
            Outcome::Finished(results) => {
                for result in results {
                    self.record(&mut report, result).await;
                }
                report.finalize(RunStatus::Completed, None);
                self.alert(&report).await;
            }
            Outcome::TimedOut => {
                let message = format!(
                    "reconciliation run timed out after {}s",
                    self.options.run_timeout.as_secs()
                );
                error!(report_id = %report.id, "{message}");
                report.finalize(RunStatus::Failed, Some(message));
            }
            Outcome::Cancelled => {
                warn!(report_id = %report.id, "Reconciliation run cancelled");
                report.finalize(RunStatus::Cancelled, Some("reconciliation run cancelled".to_string()));
            }
        }

        if let Err(e) = self.reports.update_report(&report).await {
            error!(report_id = %report.id, error = %e, "Failed to update reconciliation report");
        }
        self.metrics.run_completed(&report);

        info!(
            report_id = %report.id,
            status = %report.status,
            total_checks = report.total_checks,
            passed = report.passed_checks,
            failed = report.failed_checks,
            exceptions = report.exceptions_count,
            "Reconciliation run finished"
        );

        Ok(report)
    }

    async fn run_checks(&self, report_id: ReportId) -> Vec<CheckResult> {
        if self.options.concurrent_checks {
            join_all(self.checks.iter().map(|c| execute(c.as_ref(), report_id))).await
        } else {
            let mut results = Vec::with_capacity(self.checks.len());
            for check in self.checks.iter() {
                results.push(execute(check.as_ref(), report_id).await);
            }
            results
        }
    }

    async fn record(&self, report: &mut ReconciliationReport, mut result: CheckResult) {
        if self.options.auto_correct_low_severity {
            for exception in &mut result.exceptions {
                if !exception.can_auto_correct() {
                    continue;
                }
                if let Some(action) = self.correction.correct(exception).await {
                    exception.auto_corrected = true;
                    exception
                        .metadata
                        .insert("correction_action".to_string(), action.into());
                    self.metrics.exception_auto_corrected(exception.check_type);
                }
            }
        }

        self.metrics
            .check_result(result.check_type, result.passed, result.execution_time);
        if !result.passed && !result.is_execution_error() {
            self.metrics
                .discrepancy_amount(result.check_type, result.difference.abs());
        }

        if let Err(e) = self.reports.save_check(report.id, &result).await {
            error!(check_type = %result.check_type, error = %e, "Failed to save check result");
        }
        report.record(result);
    }

    async fn alert(&self, report: &ReconciliationReport) {
        if !self.options.enable_alerting {
            return;
        }
        let Some(alert) = Alert::from_report(report) else {
            return;
        };

        warn!(
            count = alert.count,
            severity = %alert.severity,
            "High priority reconciliation exceptions detected"
        );
        for exception in &alert.exceptions {
            self.metrics
                .alert_sent(exception.check_type, exception.severity);
        }

        let Some(sink) = &self.alerts else {
            return;
        };
        match sink.send(&alert).await {
            Ok(()) => info!(exceptions_count = alert.count, "Reconciliation alert sent"),
            Err(e) => error!(error = %e, "Failed to send reconciliation alert"),
        }
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
