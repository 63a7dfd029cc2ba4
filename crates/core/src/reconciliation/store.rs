//! Persistence seam for reconciliation reports.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tally_shared::types::{ExceptionId, ReportId};
use thiserror::Error;

use super::types::{CheckResult, ReconciliationException, ReconciliationReport, RunType, Severity};

/// Errors raised by report storage.
#[derive(Debug, Error)]
pub enum ReportStoreError {
    /// The report or exception does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Any other backend failure.
    #[error("Report storage error: {0}")]
    Backend(String),
}

/// Stores reports, their check results and exceptions.
///
/// Listing methods return report summaries with `checks` left empty; `get_report`
/// loads the checks and their exceptions.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Inserts a freshly started report.
    async fn create_report(&self, report: &ReconciliationReport) -> Result<(), ReportStoreError>;

    /// Stores one check result together with its exceptions.
    async fn save_check(
        &self,
        report_id: ReportId,
        result: &CheckResult,
    ) -> Result<(), ReportStoreError>;

    /// Writes the report's status, counters, completion time and error message.
    async fn update_report(&self, report: &ReconciliationReport) -> Result<(), ReportStoreError>;

    /// Loads a report with its checks.
    async fn get_report(&self, id: ReportId)
    -> Result<Option<ReconciliationReport>, ReportStoreError>;

    /// Most recent report of the given run type.
    async fn latest_report(
        &self,
        run_type: RunType,
    ) -> Result<Option<ReconciliationReport>, ReportStoreError>;

    /// Reports, newest first.
    async fn list_reports(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ReconciliationReport>, ReportStoreError>;

    /// Unresolved exceptions of one severity, newest first.
    async fn unresolved_exceptions(
        &self,
        severity: Severity,
    ) -> Result<Vec<ReconciliationException>, ReportStoreError>;

    /// Marks an exception as resolved by an operator.
    async fn resolve_exception(&self, id: ExceptionId) -> Result<(), ReportStoreError>;
}

/// Report store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryReportStore {
    reports: RwLock<HashMap<ReportId, ReconciliationReport>>,
}

impl InMemoryReportStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ReportId, ReconciliationReport>>, ReportStoreError>
    {
        self.reports
            .read()
            .map_err(|_| ReportStoreError::Backend("lock poisoned".to_string()))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ReportId, ReconciliationReport>>, ReportStoreError>
    {
        self.reports
            .write()
            .map_err(|_| ReportStoreError::Backend("lock poisoned".to_string()))
    }
}

fn summary(report: &ReconciliationReport) -> ReconciliationReport {
    ReconciliationReport {
        checks: Vec::new(),
        ..report.clone()
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn create_report(&self, report: &ReconciliationReport) -> Result<(), ReportStoreError> {
        self.write()?.insert(report.id, summary(report));
        Ok(())
    }

    async fn save_check(
        &self,
        report_id: ReportId,
        result: &CheckResult,
    ) -> Result<(), ReportStoreError> {
        let mut reports = self.write()?;
        let report = reports
            .get_mut(&report_id)
            .ok_or_else(|| ReportStoreError::NotFound(format!("Report {report_id}")))?;
        report.checks.push(result.clone());
        Ok(())
    }

    async fn update_report(&self, report: &ReconciliationReport) -> Result<(), ReportStoreError> {
        let mut reports = self.write()?;
        let stored = reports
            .get_mut(&report.id)
            .ok_or_else(|| ReportStoreError::NotFound(format!("Report {}", report.id)))?;
        let checks = std::mem::take(&mut stored.checks);
        *stored = ReconciliationReport {
            checks,
            ..report.clone()
        };
        Ok(())
    }

    async fn get_report(
        &self,
        id: ReportId,
    ) -> Result<Option<ReconciliationReport>, ReportStoreError> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn latest_report(
        &self,
        run_type: RunType,
    ) -> Result<Option<ReconciliationReport>, ReportStoreError> {
        Ok(self
            .read()?
            .values()
            .filter(|r| r.run_type == run_type)
            .max_by_key(|r| r.started_at)
            .map(summary))
    }

    async fn list_reports(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ReconciliationReport>, ReportStoreError> {
        let reports = self.read()?;
        let mut all: Vec<_> = reports.values().collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(all
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .map(summary)
            .collect())
    }

    async fn unresolved_exceptions(
        &self,
        severity: Severity,
    ) -> Result<Vec<ReconciliationException>, ReportStoreError> {
        let reports = self.read()?;
        let mut found: Vec<_> = reports
            .values()
            .flat_map(|r| r.exceptions())
            .filter(|e| e.severity == severity && !e.resolved)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn resolve_exception(&self, id: ExceptionId) -> Result<(), ReportStoreError> {
        let mut reports = self.write()?;
        let exception = reports
            .values_mut()
            .flat_map(|r| r.checks.iter_mut())
            .flat_map(|c| c.exceptions.iter_mut())
            .find(|e| e.id == id)
            .ok_or_else(|| ReportStoreError::NotFound(format!("Exception {id}")))?;
        exception.resolved = true;
        Ok(())
    }
}
