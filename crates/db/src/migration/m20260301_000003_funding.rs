//! Funding tables read by reconciliation.
//!
//! Deposits, withdrawals and conversion jobs are written by the funding services.
//! Only the columns reconciliation reads are declared here.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(FUNDING_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS conversion_jobs CASCADE;
             DROP TABLE IF EXISTS withdrawals CASCADE;
             DROP TABLE IF EXISTS deposits CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const FUNDING_SQL: &str = r"
CREATE TABLE IF NOT EXISTS deposits (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    amount NUMERIC(36, 18) NOT NULL,
    status VARCHAR(32) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS withdrawals (
    id UUID PRIMARY KEY,
    user_id UUID NOT NULL,
    amount NUMERIC(36, 18) NOT NULL,
    status VARCHAR(32) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE TABLE IF NOT EXISTS conversion_jobs (
    id UUID PRIMARY KEY,
    direction VARCHAR(32) NOT NULL,
    amount NUMERIC(36, 18) NOT NULL,
    status VARCHAR(32) NOT NULL,
    provider_name VARCHAR(64),
    ledger_transaction_id UUID,
    completed_at TIMESTAMPTZ,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);

CREATE INDEX IF NOT EXISTS idx_conversion_jobs_unlinked
    ON conversion_jobs(completed_at) WHERE status = 'completed' AND ledger_transaction_id IS NULL;
";
