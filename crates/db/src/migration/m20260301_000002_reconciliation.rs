//! Reconciliation reports, check results and exceptions.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(REPORTS_SQL).await?;
        db.execute_unprepared(CHECKS_SQL).await?;
        db.execute_unprepared(EXCEPTIONS_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS reconciliation_exceptions CASCADE;
             DROP TABLE IF EXISTS reconciliation_checks CASCADE;
             DROP TABLE IF EXISTS reconciliation_reports CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const REPORTS_SQL: &str = r"
CREATE TABLE reconciliation_reports (
    id UUID PRIMARY KEY,
    run_type VARCHAR(16) NOT NULL,
    status VARCHAR(16) NOT NULL,
    started_at TIMESTAMPTZ NOT NULL,
    completed_at TIMESTAMPTZ,
    total_checks INTEGER NOT NULL DEFAULT 0,
    passed_checks INTEGER NOT NULL DEFAULT 0,
    failed_checks INTEGER NOT NULL DEFAULT 0,
    exceptions_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    CONSTRAINT chk_reconciliation_reports_run_type CHECK (run_type IN ('hourly', 'daily', 'manual')),
    CONSTRAINT chk_reconciliation_reports_status
        CHECK (status IN ('in_progress', 'completed', 'failed', 'cancelled'))
);

CREATE INDEX idx_reconciliation_reports_type ON reconciliation_reports(run_type, started_at DESC);
CREATE INDEX idx_reconciliation_reports_started ON reconciliation_reports(started_at DESC);
";

const CHECKS_SQL: &str = r"
CREATE TABLE reconciliation_checks (
    id UUID PRIMARY KEY,
    report_id UUID NOT NULL REFERENCES reconciliation_reports(id) ON DELETE CASCADE,
    check_type VARCHAR(32) NOT NULL,
    expected_value NUMERIC(36, 18) NOT NULL,
    actual_value NUMERIC(36, 18) NOT NULL,
    difference NUMERIC(36, 18) NOT NULL,
    passed BOOLEAN NOT NULL,
    error_message TEXT,
    execution_time_ms BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX idx_reconciliation_checks_report ON reconciliation_checks(report_id);
";

const EXCEPTIONS_SQL: &str = r"
CREATE TABLE reconciliation_exceptions (
    id UUID PRIMARY KEY,
    report_id UUID NOT NULL REFERENCES reconciliation_reports(id) ON DELETE CASCADE,
    check_id UUID NOT NULL REFERENCES reconciliation_checks(id) ON DELETE CASCADE,
    check_type VARCHAR(32) NOT NULL,
    severity VARCHAR(16) NOT NULL,
    description TEXT NOT NULL,
    expected_value NUMERIC(36, 18) NOT NULL,
    actual_value NUMERIC(36, 18) NOT NULL,
    difference NUMERIC(36, 18) NOT NULL,
    currency VARCHAR(8),
    affected_entity VARCHAR(255),
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    auto_corrected BOOLEAN NOT NULL DEFAULT false,
    resolved_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_reconciliation_exceptions_severity
        CHECK (severity IN ('low', 'medium', 'high', 'critical'))
);

CREATE INDEX idx_reconciliation_exceptions_report ON reconciliation_exceptions(report_id);
CREATE INDEX idx_reconciliation_exceptions_unresolved
    ON reconciliation_exceptions(severity, created_at DESC) WHERE resolved_at IS NULL;
";
