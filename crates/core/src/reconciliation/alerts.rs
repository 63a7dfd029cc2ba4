//! Alerting and auto-correction seams.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tally_shared::types::ReportId;
use thiserror::Error;
use tracing::warn;

use super::types::{CheckType, ReconciliationException, ReconciliationReport, RunType, Severity};

/// Payload sent once per run that produced high or critical exceptions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    /// Always `reconciliation_alert`.
    pub event_type: &'static str,
    /// Report that raised the alert.
    pub report_id: ReportId,
    /// What triggered the run.
    pub run_type: RunType,
    /// When the alert was built.
    pub timestamp: DateTime<Utc>,
    /// Most serious severity among `exceptions`.
    pub severity: Severity,
    /// Number of alertable exceptions.
    pub count: usize,
    /// The high and critical exceptions.
    pub exceptions: Vec<ReconciliationException>,
}

impl Alert {
    /// Event type carried by every alert.
    pub const EVENT_TYPE: &'static str = "reconciliation_alert";

    /// Builds the alert for a report, or `None` if nothing in it warrants one.
    #[must_use]
    pub fn from_report(report: &ReconciliationReport) -> Option<Self> {
        let exceptions: Vec<_> = report.alertable_exceptions().cloned().collect();
        let severity = exceptions.iter().map(|e| e.severity).max()?;
        Some(Self {
            event_type: Self::EVENT_TYPE,
            report_id: report.id,
            run_type: report.run_type,
            timestamp: Utc::now(),
            severity,
            count: exceptions.len(),
            exceptions,
        })
    }
}

/// Alert delivery failures.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The request never completed.
    #[error("Alert delivery failed: {0}")]
    Delivery(String),

    /// The receiver answered with an error status.
    #[error("Alert receiver returned status {0}")]
    Rejected(u16),

    /// Some destinations of a fan-out did not take the alert.
    #[error("Alert delivery failed for {failed} of {total} destinations")]
    Partial {
        /// Destinations that failed.
        failed: usize,
        /// Destinations tried.
        total: usize,
    },
}

/// Where alerts go.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Delivers one alert.
    async fn send(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Sends every alert to all of its destinations at once.
///
/// One destination failing does not stop the others. Each failure is logged with
/// the destination name.
#[derive(Clone, Default)]
pub struct FanoutAlertSink {
    sinks: Vec<(&'static str, Arc<dyn AlertSink>)>,
}

impl std::fmt::Debug for FanoutAlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutAlertSink")
            .field("sinks", &self.names())
            .finish()
    }
}

impl FanoutAlertSink {
    /// Creates a fan-out with no destinations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a destination.
    #[must_use]
    pub fn with_sink(mut self, name: &'static str, sink: Arc<dyn AlertSink>) -> Self {
        self.sinks.push((name, sink));
        self
    }

    /// Destination names, in the order they were added.
    pub fn names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|(name, _)| *name).collect()
    }

    /// Whether no destination is configured.
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

#[async_trait]
impl AlertSink for FanoutAlertSink {
    async fn send(&self, alert: &Alert) -> Result<(), AlertError> {
        let results = join_all(self.sinks.iter().map(|(_, sink)| sink.send(alert))).await;

        let mut failed = 0;
        for ((name, _), result) in self.sinks.iter().zip(results) {
            if let Err(e) = result {
                failed += 1;
                warn!(sink = *name, error = %e, "Alert destination failed");
            }
        }

        if failed == 0 {
            Ok(())
        } else {
            Err(AlertError::Partial {
                failed,
                total: self.sinks.len(),
            })
        }
    }
}

/// Handles low-severity exceptions when auto-correction is enabled.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CorrectionHook: Send + Sync {
    /// Returns the action taken, or `None` if the exception was left alone.
    async fn correct(&self, exception: &ReconciliationException) -> Option<String>;
}

/// Records the discrepancy for manual review without touching the ledger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCorrectionHook;

#[async_trait]
impl CorrectionHook for LoggingCorrectionHook {
    async fn correct(&self, exception: &ReconciliationException) -> Option<String> {
        let action = match exception.check_type {
            CheckType::LedgerConsistency => "Logged ledger inconsistency for manual review",
            CheckType::CustodianBalance => "Logged custodian balance discrepancy for investigation",
            CheckType::BrokerageBalance => "Logged brokerage balance discrepancy for investigation",
            _ => "Logged discrepancy for manual review",
        };
        tracing::info!(
            exception_id = %exception.id,
            check_type = %exception.check_type,
            difference = %exception.difference,
            action,
            "Auto-correcting reconciliation exception"
        );
        Some(action.to_string())
    }
}
