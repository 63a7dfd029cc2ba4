//! Reconciliation report repository.
//!
//! A report row is written when a run starts, one check row plus its exception
//! rows per finished check, and the report row again when the run is finalized.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, NotSet, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait, Unchanged,
};
use serde_json::{Map, Value};
use tally_core::reconciliation::{
    CheckResult, ReconciliationException, ReconciliationReport, ReportStore, ReportStoreError,
    RunType, Severity,
};
use tally_shared::types::{Currency, ExceptionId, ReportId};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::{reconciliation_checks, reconciliation_exceptions, reconciliation_reports};

/// Report store over the `reconciliation_*` tables.
#[derive(Debug, Clone)]
pub struct ReportRepository {
    db: DatabaseConnection,
}

impl ReportRepository {
    /// Creates a new report repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn load_checks(&self, report_id: Uuid) -> Result<Vec<CheckResult>, ReportStoreError> {
        let checks = reconciliation_checks::Entity::find()
            .filter(reconciliation_checks::Column::ReportId.eq(report_id))
            .order_by_asc(reconciliation_checks::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(backend)?;

        let mut by_check: HashMap<Uuid, Vec<ReconciliationException>> = HashMap::new();
        for model in reconciliation_exceptions::Entity::find()
            .filter(reconciliation_exceptions::Column::ReportId.eq(report_id))
            .order_by_asc(reconciliation_exceptions::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(backend)?
        {
            let check_id = model.check_id;
            by_check
                .entry(check_id)
                .or_default()
                .push(exception_from_model(model)?);
        }

        checks
            .into_iter()
            .map(|model| {
                let exceptions = by_check.remove(&model.id).unwrap_or_default();
                check_from_model(model, exceptions)
            })
            .collect()
    }
}

#[async_trait]
impl ReportStore for ReportRepository {
    #[instrument(skip(self, report), fields(report_id = %report.id))]
    async fn create_report(&self, report: &ReconciliationReport) -> Result<(), ReportStoreError> {
        report_to_active(report)
            .insert(&self.db)
            .await
            .map_err(backend)?;
        Ok(())
    }

    #[instrument(skip(self, result), fields(check_type = %result.check_type))]
    async fn save_check(
        &self,
        report_id: ReportId,
        result: &CheckResult,
    ) -> Result<(), ReportStoreError> {
        let check_id = Uuid::now_v7();
        let txn = self.db.begin().await.map_err(backend)?;

        reconciliation_checks::ActiveModel {
            id: Set(check_id),
            report_id: Set(report_id.into_inner()),
            check_type: Set(result.check_type.as_str().to_string()),
            expected_value: Set(result.expected_value),
            actual_value: Set(result.actual_value),
            difference: Set(result.difference),
            passed: Set(result.passed),
            error_message: Set(result.error_message.clone()),
            execution_time_ms: Set(i64::try_from(result.execution_time.as_millis()).unwrap_or(i64::MAX)),
            created_at: Set(Utc::now().into()),
        }
        .insert(&txn)
        .await
        .map_err(backend)?;

        if !result.exceptions.is_empty() {
            reconciliation_exceptions::Entity::insert_many(
                result
                    .exceptions
                    .iter()
                    .map(|exception| exception_to_active(exception, check_id)),
            )
            .exec(&txn)
            .await
            .map_err(backend)?;
        }

        txn.commit().await.map_err(backend)
    }

    #[instrument(skip(self, report), fields(report_id = %report.id, status = %report.status))]
    async fn update_report(&self, report: &ReconciliationReport) -> Result<(), ReportStoreError> {
        let mut active = report_to_active(report);
        active.id = Unchanged(report.id.into_inner());
        active.started_at = NotSet;
        active.run_type = NotSet;

        active.update(&self.db).await.map_err(|e| match e {
            DbErr::RecordNotUpdated => ReportStoreError::NotFound(format!("Report {}", report.id)),
            other => backend(other),
        })?;
        Ok(())
    }

    async fn get_report(
        &self,
        id: ReportId,
    ) -> Result<Option<ReconciliationReport>, ReportStoreError> {
        let Some(model) = reconciliation_reports::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(backend)?
        else {
            return Ok(None);
        };

        let checks = self.load_checks(model.id).await?;
        let mut report = report_from_model(model)?;
        report.checks = checks;
        Ok(Some(report))
    }

    async fn latest_report(
        &self,
        run_type: RunType,
    ) -> Result<Option<ReconciliationReport>, ReportStoreError> {
        reconciliation_reports::Entity::find()
            .filter(reconciliation_reports::Column::RunType.eq(run_type.as_str()))
            .order_by_desc(reconciliation_reports::Column::StartedAt)
            .one(&self.db)
            .await
            .map_err(backend)?
            .map(report_from_model)
            .transpose()
    }

    async fn list_reports(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<ReconciliationReport>, ReportStoreError> {
        reconciliation_reports::Entity::find()
            .order_by_desc(reconciliation_reports::Column::StartedAt)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await
            .map_err(backend)?
            .into_iter()
            .map(report_from_model)
            .collect()
    }

    async fn unresolved_exceptions(
        &self,
        severity: Severity,
    ) -> Result<Vec<ReconciliationException>, ReportStoreError> {
        reconciliation_exceptions::Entity::find()
            .filter(reconciliation_exceptions::Column::Severity.eq(severity.as_str()))
            .filter(reconciliation_exceptions::Column::ResolvedAt.is_null())
            .order_by_desc(reconciliation_exceptions::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(backend)?
            .into_iter()
            .map(exception_from_model)
            .collect()
    }

    #[instrument(skip(self))]
    async fn resolve_exception(&self, id: ExceptionId) -> Result<(), ReportStoreError> {
        let result = reconciliation_exceptions::Entity::update_many()
            .col_expr(
                reconciliation_exceptions::Column::ResolvedAt,
                Expr::value(DateTimeWithTimeZone::from(Utc::now())),
            )
            .filter(reconciliation_exceptions::Column::Id.eq(id.into_inner()))
            .exec(&self.db)
            .await
            .map_err(backend)?;

        if result.rows_affected == 0 {
            return Err(ReportStoreError::NotFound(format!("Exception {id}")));
        }
        Ok(())
    }
}

fn backend(err: DbErr) -> ReportStoreError {
    ReportStoreError::Backend(err.to_string())
}

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T, ReportStoreError> {
    value.parse().map_err(ReportStoreError::Backend)
}

fn to_count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn from_count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn report_to_active(report: &ReconciliationReport) -> reconciliation_reports::ActiveModel {
    reconciliation_reports::ActiveModel {
        id: Set(report.id.into_inner()),
        run_type: Set(report.run_type.as_str().to_string()),
        status: Set(report.status.as_str().to_string()),
        started_at: Set(report.started_at.into()),
        completed_at: Set(report.completed_at.map(Into::into)),
        total_checks: Set(to_count(report.total_checks)),
        passed_checks: Set(to_count(report.passed_checks)),
        failed_checks: Set(to_count(report.failed_checks)),
        exceptions_count: Set(to_count(report.exceptions_count)),
        error_message: Set(report.error_message.clone()),
        metadata: Set(Value::Object(report.metadata.clone())),
    }
}

fn report_from_model(
    model: reconciliation_reports::Model,
) -> Result<ReconciliationReport, ReportStoreError> {
    Ok(ReconciliationReport {
        id: ReportId::from_uuid(model.id),
        run_type: parse(&model.run_type)?,
        status: parse(&model.status)?,
        started_at: model.started_at.with_timezone(&Utc),
        completed_at: model.completed_at.map(|at| at.with_timezone(&Utc)),
        total_checks: from_count(model.total_checks),
        passed_checks: from_count(model.passed_checks),
        failed_checks: from_count(model.failed_checks),
        exceptions_count: from_count(model.exceptions_count),
        error_message: model.error_message,
        metadata: object(model.metadata),
        checks: Vec::new(),
    })
}

fn check_from_model(
    model: reconciliation_checks::Model,
    exceptions: Vec<ReconciliationException>,
) -> Result<CheckResult, ReportStoreError> {
    Ok(CheckResult {
        check_type: parse(&model.check_type)?,
        expected_value: model.expected_value,
        actual_value: model.actual_value,
        difference: model.difference,
        passed: model.passed,
        error_message: model.error_message,
        exceptions,
        execution_time: Duration::from_millis(u64::try_from(model.execution_time_ms).unwrap_or(0)),
    })
}

fn exception_to_active(
    exception: &ReconciliationException,
    check_id: Uuid,
) -> reconciliation_exceptions::ActiveModel {
    reconciliation_exceptions::ActiveModel {
        id: Set(exception.id.into_inner()),
        report_id: Set(exception.report_id.into_inner()),
        check_id: Set(check_id),
        check_type: Set(exception.check_type.as_str().to_string()),
        severity: Set(exception.severity.as_str().to_string()),
        description: Set(exception.description.clone()),
        expected_value: Set(exception.expected),
        actual_value: Set(exception.actual),
        difference: Set(exception.difference),
        currency: Set(exception.currency.map(|c| c.code().to_string())),
        affected_entity: Set(exception.affected_entity.clone()),
        metadata: Set(Value::Object(exception.metadata.clone())),
        auto_corrected: Set(exception.auto_corrected),
        resolved_at: Set(exception.resolved.then(|| Utc::now().into())),
        created_at: Set(exception.created_at.into()),
    }
}

fn exception_from_model(
    model: reconciliation_exceptions::Model,
) -> Result<ReconciliationException, ReportStoreError> {
    Ok(ReconciliationException {
        id: ExceptionId::from_uuid(model.id),
        report_id: ReportId::from_uuid(model.report_id),
        check_type: parse(&model.check_type)?,
        severity: parse(&model.severity)?,
        description: model.description,
        expected: model.expected_value,
        actual: model.actual_value,
        difference: model.difference,
        currency: model.currency.as_deref().map(parse::<Currency>).transpose()?,
        affected_entity: model.affected_entity,
        metadata: object(model.metadata),
        auto_corrected: model.auto_corrected,
        resolved: model.resolved_at.is_some(),
        created_at: model.created_at.with_timezone(&Utc),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tally_core::reconciliation::{CheckType, RunStatus};

    #[test]
    fn test_report_counters_survive_conversion() {
        let mut report = ReconciliationReport::start(RunType::Daily);
        report.record(CheckResult::completed(
            CheckType::LedgerConsistency,
            dec!(10),
            dec!(10),
            Vec::new(),
            Duration::from_millis(3),
        ));
        report.finalize(RunStatus::Completed, None);

        let active = report_to_active(&report);

        assert_eq!(active.run_type.clone().unwrap(), "daily");
        assert_eq!(active.status.clone().unwrap(), "completed");
        assert_eq!(active.total_checks.clone().unwrap(), 1);
        assert_eq!(active.passed_checks.clone().unwrap(), 1);
        assert!(active.completed_at.clone().unwrap().is_some());
    }

    #[test]
    fn test_exception_round_trips_through_row() {
        let report_id = ReportId::new();
        let exception = ReconciliationException::new(
            report_id,
            CheckType::CustodianBalance,
            Severity::Medium,
            "Custodian balance mismatch",
            dec!(1000),
            dec!(1050),
            Some(Currency::Usdc),
        )
        .with_metadata("tolerance", "10");
        let check_id = Uuid::now_v7();

        let active = exception_to_active(&exception, check_id);
        let now = Utc::now().into();
        let model = reconciliation_exceptions::Model {
            id: active.id.unwrap(),
            report_id: active.report_id.unwrap(),
            check_id,
            check_type: active.check_type.unwrap(),
            severity: active.severity.unwrap(),
            description: active.description.unwrap(),
            expected_value: active.expected_value.unwrap(),
            actual_value: active.actual_value.unwrap(),
            difference: active.difference.unwrap(),
            currency: active.currency.unwrap(),
            affected_entity: active.affected_entity.unwrap(),
            metadata: active.metadata.unwrap(),
            auto_corrected: active.auto_corrected.unwrap(),
            resolved_at: None,
            created_at: now,
        };

        let restored = exception_from_model(model).unwrap();

        assert_eq!(restored.id, exception.id);
        assert_eq!(restored.severity, Severity::Medium);
        assert_eq!(restored.currency, Some(Currency::Usdc));
        assert_eq!(restored.difference, dec!(50));
        assert_eq!(restored.metadata.get("tolerance"), Some(&Value::from("10")));
        assert!(!restored.resolved);
    }

    #[test]
    fn test_non_object_metadata_reads_as_empty() {
        assert!(object(Value::Null).is_empty());
        assert!(object(Value::from(3)).is_empty());
    }

    #[test]
    fn test_negative_counts_clamp_to_zero() {
        assert_eq!(from_count(-1), 0);
        assert_eq!(from_count(7), 7);
    }
}
