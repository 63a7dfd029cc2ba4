//! Ledger schema.
//!
//! Creates the account store, the transaction journal and the entries table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(LEDGER_ACCOUNTS_SQL).await?;
        db.execute_unprepared(LEDGER_TRANSACTIONS_SQL).await?;
        db.execute_unprepared(LEDGER_ENTRIES_SQL).await?;
        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let db = manager.get_connection();
        db.execute_unprepared(
            "DROP TABLE IF EXISTS ledger_entries CASCADE;
             DROP TABLE IF EXISTS ledger_transactions CASCADE;
             DROP TABLE IF EXISTS ledger_accounts CASCADE;",
        )
        .await?;
        Ok(())
    }
}

const LEDGER_ACCOUNTS_SQL: &str = r"
CREATE TABLE ledger_accounts (
    id UUID PRIMARY KEY,
    user_id UUID,
    account_type VARCHAR(32) NOT NULL,
    currency VARCHAR(8) NOT NULL,
    balance NUMERIC(36, 18) NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_ledger_accounts_type CHECK (account_type IN (
        'usdc_balance', 'fiat_exposure', 'pending_investment', 'spending_balance',
        'stash_balance', 'system_buffer_usdc', 'system_buffer_fiat', 'broker_operational'
    )),
    CONSTRAINT chk_ledger_accounts_currency CHECK (currency IN ('USDC', 'USD')),
    -- System accounts have no owner; NULLS NOT DISTINCT keeps them singletons.
    CONSTRAINT uq_ledger_accounts_owner_type UNIQUE NULLS NOT DISTINCT (user_id, account_type)
);

CREATE INDEX idx_ledger_accounts_type ON ledger_accounts(account_type);
";

const LEDGER_TRANSACTIONS_SQL: &str = r"
CREATE TABLE ledger_transactions (
    id UUID PRIMARY KEY,
    user_id UUID,
    transaction_type VARCHAR(32) NOT NULL,
    reference_id UUID,
    reference_type VARCHAR(64),
    idempotency_key VARCHAR(255) NOT NULL,
    description TEXT,
    metadata JSONB NOT NULL DEFAULT '{}'::jsonb,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT uq_ledger_transactions_idempotency_key UNIQUE (idempotency_key),
    CONSTRAINT chk_ledger_transactions_type CHECK (transaction_type IN (
        'deposit', 'withdrawal', 'investment', 'conversion', 'internal_transfer',
        'buffer_replenishment', 'reversal', 'card_payment'
    ))
);

CREATE INDEX idx_ledger_transactions_user ON ledger_transactions(user_id, created_at DESC);
CREATE INDEX idx_ledger_transactions_reference ON ledger_transactions(reference_type, reference_id);
";

const LEDGER_ENTRIES_SQL: &str = r"
CREATE TABLE ledger_entries (
    id UUID PRIMARY KEY,
    transaction_id UUID NOT NULL REFERENCES ledger_transactions(id),
    account_id UUID NOT NULL REFERENCES ledger_accounts(id),
    entry_type VARCHAR(6) NOT NULL,
    amount NUMERIC(36, 18) NOT NULL,
    currency VARCHAR(8) NOT NULL,
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    CONSTRAINT chk_ledger_entries_type CHECK (entry_type IN ('debit', 'credit')),
    CONSTRAINT chk_ledger_entries_amount CHECK (amount > 0)
);

CREATE INDEX idx_ledger_entries_transaction ON ledger_entries(transaction_id);
CREATE INDEX idx_ledger_entries_account ON ledger_entries(account_id, created_at DESC);
";
