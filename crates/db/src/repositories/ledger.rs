//! `PostgreSQL` ledger store.
//!
//! Postings run in one database transaction. Every account a posting touches is
//! locked with `SELECT ... FOR UPDATE` in ID order before balances are read, so
//! concurrent postings against the same account serialize and cannot deadlock.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::Value;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, DbErr,
    EntityTrait, FromQueryResult, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, Statement,
    TransactionTrait,
};
use tally_core::ledger::balance::balance_deltas;
use tally_core::ledger::{
    Account, AccountType, DebitCreditTotals, Entry, LedgerAggregates, LedgerStore, NewPosting,
    StoreError, Transaction, TransactionWithEntries,
};
use tally_shared::types::{AccountId, EntryId, TransactionId, UserId};
use uuid::Uuid;

use crate::entities::{ledger_accounts, ledger_entries, ledger_transactions};

const INSERT_ACCOUNT_SQL: &str = r"
    INSERT INTO ledger_accounts (id, user_id, account_type, currency, balance, created_at, updated_at)
    VALUES ($1, $2, $3, $4, 0, now(), now())
    ON CONFLICT ON CONSTRAINT uq_ledger_accounts_owner_type DO NOTHING
";

const TOTALS_SQL: &str = r"
    SELECT
        COALESCE(SUM(CASE WHEN entry_type = 'debit' THEN amount ELSE 0 END), 0) AS debits,
        COALESCE(SUM(CASE WHEN entry_type = 'credit' THEN amount ELSE 0 END), 0) AS credits
    FROM ledger_entries
";

const ORPHANED_ENTRIES_SQL: &str = r"
    SELECT COUNT(*) AS count
    FROM ledger_entries le
    LEFT JOIN ledger_transactions lt ON lt.id = le.transaction_id
    WHERE lt.id IS NULL
";

const MALFORMED_TRANSACTIONS_SQL: &str = r"
    SELECT COUNT(*) AS count
    FROM (
        SELECT le.transaction_id
        FROM ledger_entries le
        JOIN ledger_transactions lt ON lt.id = le.transaction_id
        GROUP BY le.transaction_id
        HAVING COUNT(*) <> 2
    ) AS malformed
";

const ENTRIES_BY_TYPE_SQL: &str = r"
    SELECT COALESCE(SUM(le.amount), 0) AS total
    FROM ledger_entries le
    JOIN ledger_transactions lt ON lt.id = le.transaction_id
    WHERE lt.transaction_type = $1
      AND le.entry_type = $2
";

const USER_BALANCE_SQL: &str = r"
    SELECT COALESCE(SUM(balance), 0) AS total
    FROM ledger_accounts
    WHERE user_id IS NOT NULL
      AND account_type = $1
";

#[derive(Debug, FromQueryResult)]
struct TotalsRow {
    debits: Decimal,
    credits: Decimal,
}

#[derive(Debug, FromQueryResult)]
struct CountRow {
    count: i64,
}

#[derive(Debug, FromQueryResult)]
struct SumRow {
    total: Decimal,
}

/// Ledger store over `ledger_accounts`, `ledger_transactions` and `ledger_entries`.
#[derive(Debug, Clone)]
pub struct LedgerRepository {
    db: DatabaseConnection,
}

impl LedgerRepository {
    /// Creates a new ledger repository.
    #[must_use]
    pub const fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn count(&self, sql: &str) -> Result<u64, StoreError> {
        let row = CountRow::find_by_statement(Statement::from_string(DbBackend::Postgres, sql))
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(row.map_or(0, |r| u64::try_from(r.count).unwrap_or(0)))
    }

    async fn with_entries(
        &self,
        transaction: ledger_transactions::Model,
    ) -> Result<TransactionWithEntries, StoreError> {
        let entries = ledger_entries::Entity::find()
            .filter(ledger_entries::Column::TransactionId.eq(transaction.id))
            .order_by_asc(ledger_entries::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(backend)?
            .into_iter()
            .map(entry_from_model)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TransactionWithEntries {
            transaction: transaction_from_model(transaction)?,
            entries,
        })
    }

    async fn sum(&self, sql: &str, values: Vec<Value>) -> Result<Decimal, StoreError> {
        let row = SumRow::find_by_statement(Statement::from_sql_and_values(
            DbBackend::Postgres,
            sql,
            values,
        ))
        .one(&self.db)
        .await
        .map_err(backend)?;
        Ok(row.map_or(Decimal::ZERO, |r| r.total))
    }
}

#[async_trait]
impl LedgerStore for LedgerRepository {
    async fn get_or_create_account(
        &self,
        owner: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Account, StoreError> {
        if let Some(account) = self.find_account(owner, account_type).await? {
            return Ok(account);
        }

        // Concurrent creators race on the unique constraint; losers insert nothing.
        self.db
            .execute(Statement::from_sql_and_values(
                DbBackend::Postgres,
                INSERT_ACCOUNT_SQL,
                [
                    Uuid::now_v7().into(),
                    owner.map(UserId::into_inner).into(),
                    account_type.as_str().into(),
                    account_type.currency().code().into(),
                ],
            ))
            .await
            .map_err(backend)?;

        self.find_account(owner, account_type)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("account {account_type} missing after insert")))
    }

    async fn find_account(
        &self,
        owner: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        let owner_filter = match owner {
            Some(owner) => ledger_accounts::Column::UserId.eq(owner.into_inner()),
            None => ledger_accounts::Column::UserId.is_null(),
        };
        ledger_accounts::Entity::find()
            .filter(owner_filter)
            .filter(ledger_accounts::Column::AccountType.eq(account_type.as_str()))
            .one(&self.db)
            .await
            .map_err(backend)?
            .map(account_from_model)
            .transpose()
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        ledger_accounts::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(backend)?
            .map(account_from_model)
            .transpose()
    }

    async fn user_accounts(&self, owner: UserId) -> Result<Vec<Account>, StoreError> {
        ledger_accounts::Entity::find()
            .filter(ledger_accounts::Column::UserId.eq(owner.into_inner()))
            .order_by_asc(ledger_accounts::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(backend)?
            .into_iter()
            .map(account_from_model)
            .collect()
    }

    async fn find_transaction_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<TransactionWithEntries>, StoreError> {
        let transaction = ledger_transactions::Entity::find()
            .filter(ledger_transactions::Column::IdempotencyKey.eq(idempotency_key))
            .one(&self.db)
            .await
            .map_err(backend)?;
        match transaction {
            Some(transaction) => self.with_entries(transaction).await.map(Some),
            None => Ok(None),
        }
    }

    async fn find_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionWithEntries>, StoreError> {
        let transaction = ledger_transactions::Entity::find_by_id(id.into_inner())
            .one(&self.db)
            .await
            .map_err(backend)?;
        match transaction {
            Some(transaction) => self.with_entries(transaction).await.map(Some),
            None => Ok(None),
        }
    }

    async fn owner_entries(
        &self,
        owner: UserId,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Entry>, StoreError> {
        ledger_entries::Entity::find()
            .inner_join(ledger_accounts::Entity)
            .filter(ledger_accounts::Column::UserId.eq(owner.into_inner()))
            .order_by_desc(ledger_entries::Column::CreatedAt)
            .order_by_desc(ledger_entries::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await
            .map_err(backend)?
            .into_iter()
            .map(entry_from_model)
            .collect()
    }

    async fn commit_posting(&self, posting: NewPosting) -> Result<(), StoreError> {
        let NewPosting {
            transaction,
            entries,
            guards,
        } = posting;
        let deltas = balance_deltas(&entries);
        let account_ids: Vec<Uuid> = deltas.keys().map(|id| id.into_inner()).collect();

        let txn = self.db.begin().await.map_err(backend)?;

        let locked = ledger_accounts::Entity::find()
            .filter(ledger_accounts::Column::Id.is_in(account_ids))
            .order_by_asc(ledger_accounts::Column::Id)
            .lock_exclusive()
            .all(&txn)
            .await
            .map_err(backend)?;

        if let Some(missing) = deltas
            .keys()
            .find(|id| !locked.iter().any(|a| a.id == id.into_inner()))
        {
            return Err(StoreError::AccountNotFound(*missing));
        }

        // A same-key posting may have committed while this one waited on the locks.
        // Report it as a duplicate before the guards see the balance it already moved.
        let key = transaction.idempotency_key.clone();
        let already_posted = ledger_transactions::Entity::find()
            .filter(ledger_transactions::Column::IdempotencyKey.eq(key.as_str()))
            .one(&txn)
            .await
            .map_err(backend)?
            .is_some();
        if already_posted {
            return Err(StoreError::DuplicateIdempotencyKey(key));
        }

        for guard in &guards {
            let Some(account) = locked.iter().find(|a| a.id == guard.account_id.into_inner()) else {
                return Err(StoreError::AccountNotFound(guard.account_id));
            };
            let delta = deltas.get(&guard.account_id).copied().unwrap_or_default();
            if account.balance + delta < guard.minimum {
                return Err(StoreError::InsufficientFunds {
                    account_id: guard.account_id,
                    available: account.balance,
                    required: -delta,
                });
            }
        }

        transaction_to_active(transaction)
            .insert(&txn)
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => StoreError::DuplicateIdempotencyKey(key),
                _ => backend(e),
            })?;

        ledger_entries::Entity::insert_many(entries.into_iter().map(entry_to_active))
            .exec(&txn)
            .await
            .map_err(backend)?;

        let now = Utc::now().into();
        for account in locked {
            let delta = deltas
                .get(&AccountId::from_uuid(account.id))
                .copied()
                .unwrap_or_default();
            let balance = account.balance + delta;
            let mut active: ledger_accounts::ActiveModel = account.into();
            active.balance = Set(balance);
            active.updated_at = Set(now);
            active.update(&txn).await.map_err(backend)?;
        }

        txn.commit().await.map_err(backend)
    }
}

#[async_trait]
impl LedgerAggregates for LedgerRepository {
    async fn total_debits_and_credits(&self) -> Result<DebitCreditTotals, StoreError> {
        let row = TotalsRow::find_by_statement(Statement::from_string(DbBackend::Postgres, TOTALS_SQL))
            .one(&self.db)
            .await
            .map_err(backend)?;
        Ok(row.map_or_else(DebitCreditTotals::default, |r| DebitCreditTotals {
            debits: r.debits,
            credits: r.credits,
        }))
    }

    async fn orphaned_entry_count(&self) -> Result<u64, StoreError> {
        self.count(ORPHANED_ENTRIES_SQL).await
    }

    async fn malformed_transaction_count(&self) -> Result<u64, StoreError> {
        self.count(MALFORMED_TRANSACTIONS_SQL).await
    }

    async fn total_deposit_entries(&self) -> Result<Decimal, StoreError> {
        self.sum(ENTRIES_BY_TYPE_SQL, vec!["deposit".into(), "credit".into()])
            .await
    }

    async fn total_withdrawal_entries(&self) -> Result<Decimal, StoreError> {
        self.sum(ENTRIES_BY_TYPE_SQL, vec!["withdrawal".into(), "debit".into()])
            .await
    }

    async fn total_user_balance(&self, account_type: AccountType) -> Result<Decimal, StoreError> {
        self.sum(USER_BALANCE_SQL, vec![account_type.as_str().into()])
            .await
    }
}

fn backend(err: DbErr) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn parse<T: FromStr<Err = String>>(value: &str) -> Result<T, StoreError> {
    value.parse().map_err(StoreError::Backend)
}

fn account_from_model(model: ledger_accounts::Model) -> Result<Account, StoreError> {
    Ok(Account {
        id: AccountId::from_uuid(model.id),
        owner: model.user_id.map(UserId::from_uuid),
        account_type: parse(&model.account_type)?,
        balance: model.balance,
        currency: parse(&model.currency)?,
        created_at: model.created_at.with_timezone(&Utc),
        updated_at: model.updated_at.with_timezone(&Utc),
    })
}

fn transaction_from_model(model: ledger_transactions::Model) -> Result<Transaction, StoreError> {
    Ok(Transaction {
        id: TransactionId::from_uuid(model.id),
        idempotency_key: model.idempotency_key,
        transaction_type: parse(&model.transaction_type)?,
        owner: model.user_id.map(UserId::from_uuid),
        reference_id: model.reference_id,
        reference_type: model.reference_type,
        description: model.description,
        metadata: model.metadata,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn entry_from_model(model: ledger_entries::Model) -> Result<Entry, StoreError> {
    Ok(Entry {
        id: EntryId::from_uuid(model.id),
        transaction_id: TransactionId::from_uuid(model.transaction_id),
        account_id: AccountId::from_uuid(model.account_id),
        direction: parse(&model.entry_type)?,
        amount: model.amount,
        currency: parse(&model.currency)?,
        description: model.description,
        created_at: model.created_at.with_timezone(&Utc),
    })
}

fn transaction_to_active(transaction: Transaction) -> ledger_transactions::ActiveModel {
    ledger_transactions::ActiveModel {
        id: Set(transaction.id.into_inner()),
        user_id: Set(transaction.owner.map(UserId::into_inner)),
        transaction_type: Set(transaction.transaction_type.as_str().to_string()),
        reference_id: Set(transaction.reference_id),
        reference_type: Set(transaction.reference_type),
        idempotency_key: Set(transaction.idempotency_key),
        description: Set(transaction.description),
        metadata: Set(transaction.metadata),
        created_at: Set(transaction.created_at.into()),
    }
}

fn entry_to_active(entry: Entry) -> ledger_entries::ActiveModel {
    ledger_entries::ActiveModel {
        id: Set(entry.id.into_inner()),
        transaction_id: Set(entry.transaction_id.into_inner()),
        account_id: Set(entry.account_id.into_inner()),
        entry_type: Set(entry.direction.as_str().to_string()),
        amount: Set(entry.amount),
        currency: Set(entry.currency.code().to_string()),
        description: Set(entry.description),
        created_at: Set(entry.created_at.into()),
    }
}
