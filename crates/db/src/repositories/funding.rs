//! Read-only queries over the funding services' tables.
//!
//! Deposits, withdrawals and conversion jobs are written by other services; the
//! reconciler only sums and lists them.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{DatabaseConnection, DbBackend, DbErr, FromQueryResult, Statement};
use tally_core::reconciliation::{
    ConversionJob, ConversionSource, DepositSource, SourceError, WithdrawalSource,
};
use uuid::Uuid;

/// Deposits count once the brokerage account has been funded.
const DEPOSIT_SETTLED_STATUS: &str = "broker_funded";
const WITHDRAWAL_SETTLED_STATUS: &str = "completed";

const DEPOSITS_TOTAL_SQL: &str =
    "SELECT COALESCE(SUM(amount), 0) AS total FROM deposits WHERE status = $1";

const WITHDRAWALS_TOTAL_SQL: &str =
    "SELECT COALESCE(SUM(amount), 0) AS total FROM withdrawals WHERE status = $1";

const UNLINKED_CONVERSIONS_SQL: &str = r"
    SELECT id, direction, amount, provider_name, completed_at
    FROM conversion_jobs
    WHERE status = 'completed'
      AND ledger_transaction_id IS NULL
    ORDER BY completed_at
";

#[derive(Debug, FromQueryResult)]
struct SumRow {
    total: Decimal,
}

#[derive(Debug, FromQueryResult)]
struct ConversionRow {
    id: Uuid,
    direction: String,
    amount: Decimal,
    provider_name: Option<String>,
    completed_at: Option<DateTimeWithTimeZone>,
}

impl From<ConversionRow> for ConversionJob {
    fn from(row: ConversionRow) -> Self {
        Self {
            id: row.id,
            amount: row.amount,
            direction: row.direction,
            provider: row.provider_name,
            completed_at: row.completed_at.map(|at| at.with_timezone(&Utc)),
        }
    }
}

/// Funding-side totals and unlinked conversion jobs.
#[derive(Debug, Clone)]
pub struct FundingRepository {
    db: DatabaseConnection,
}

impl FundingRepository {
    /// Creates a new funding repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn total(
        &self,
        source_name: &'static str,
        sql: &str,
        status: &str,
    ) -> Result<Decimal, SourceError> {
        let row = SumRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            [status.into()],
        ))
        .one(&self.db)
        .await
        .map_err(|e| unavailable(source_name, &e))?;
        Ok(row.map_or(Decimal::ZERO, |r| r.total))
    }
}

#[async_trait]
impl DepositSource for FundingRepository {
    async fn total_completed_deposits(&self) -> Result<Decimal, SourceError> {
        self.total("deposits", DEPOSITS_TOTAL_SQL, DEPOSIT_SETTLED_STATUS)
            .await
    }
}

#[async_trait]
impl WithdrawalSource for FundingRepository {
    async fn total_completed_withdrawals(&self) -> Result<Decimal, SourceError> {
        self.total("withdrawals", WITHDRAWALS_TOTAL_SQL, WITHDRAWAL_SETTLED_STATUS)
            .await
    }
}

#[async_trait]
impl ConversionSource for FundingRepository {
    async fn completed_jobs_without_ledger_entry(&self) -> Result<Vec<ConversionJob>, SourceError> {
        let rows = ConversionRow::find_by_statement(Statement::from_string(
            DbBackend::Postgres,
            UNLINKED_CONVERSIONS_SQL,
        ))
        .all(&self.db)
        .await
        .map_err(|e| unavailable("conversion_jobs", &e))?;
        Ok(rows.into_iter().map(ConversionJob::from).collect())
    }
}

fn unavailable(source_name: &'static str, err: &DbErr) -> SourceError {
    SourceError::Unavailable {
        source_name,
        message: err.to_string(),
    }
}
