//! Storage seam for the ledger.
//!
//! `LedgerStore` is the account store plus transaction journal. Implementations must
//! apply `commit_posting` atomically and serialize concurrent postings that touch the
//! same account. `LedgerAggregates` holds the read-only cross-account queries used by
//! reconciliation.

use async_trait::async_trait;
use rust_decimal::Decimal;
use tally_shared::types::{AccountId, TransactionId, UserId};
use thiserror::Error;

use super::balance::DebitCreditTotals;
use super::types::{Account, AccountType, Entry, Transaction, TransactionWithEntries};

/// Errors raised by storage implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A transaction with this idempotency key already exists.
    #[error("Idempotency key already exists: {0}")]
    DuplicateIdempotencyKey(String),

    /// An entry referenced an account that does not exist.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// A balance guard failed.
    #[error("Insufficient funds in account {account_id}: have {available}, need {required}")]
    InsufficientFunds {
        /// The guarded account.
        account_id: AccountId,
        /// Balance before the posting.
        available: Decimal,
        /// Amount the posting would remove.
        required: Decimal,
    },

    /// Any other backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Floor an account's balance must stay at or above after a posting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceGuard {
    /// Guarded account.
    pub account_id: AccountId,
    /// Minimum balance after the posting is applied.
    pub minimum: Decimal,
}

impl BalanceGuard {
    /// Guard that keeps `account_id` from going negative.
    #[must_use]
    pub const fn non_negative(account_id: AccountId) -> Self {
        Self {
            account_id,
            minimum: Decimal::ZERO,
        }
    }
}

/// A fully validated posting ready to be written.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPosting {
    /// Transaction header.
    pub transaction: Transaction,
    /// Its two entries.
    pub entries: Vec<Entry>,
    /// Floors evaluated under the row locks before anything is written.
    pub guards: Vec<BalanceGuard>,
}

/// Account store and transaction journal.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Returns the account for `(owner, account_type)`, creating it at zero balance if
    /// needed. Concurrent callers converge on one row.
    async fn get_or_create_account(
        &self,
        owner: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Account, StoreError>;

    /// Looks up the account for `(owner, account_type)` without creating it.
    async fn find_account(
        &self,
        owner: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError>;

    /// Looks up an account by ID.
    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// All accounts owned by a user.
    async fn user_accounts(&self, owner: UserId) -> Result<Vec<Account>, StoreError>;

    /// Looks up a transaction and its entries by idempotency key.
    async fn find_transaction_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<TransactionWithEntries>, StoreError>;

    /// Looks up a transaction and its entries by ID.
    async fn find_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionWithEntries>, StoreError>;

    /// Entries on any account owned by `owner`, newest first.
    async fn owner_entries(
        &self,
        owner: UserId,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Entry>, StoreError>;

    /// Atomically inserts the transaction and its entries and applies the balance
    /// deltas. Fails with `DuplicateIdempotencyKey` if the key is taken, in which case
    /// nothing is written. The key is checked before any `BalanceGuard`, so a retry
    /// that lost the race to its own first attempt is reported as a duplicate rather
    /// than as `InsufficientFunds`.
    async fn commit_posting(&self, posting: NewPosting) -> Result<(), StoreError>;
}

/// Read-only ledger aggregates consumed by reconciliation.
#[async_trait]
pub trait LedgerAggregates: Send + Sync {
    /// Sum of all debit amounts and of all credit amounts.
    async fn total_debits_and_credits(&self) -> Result<DebitCreditTotals, StoreError>;

    /// Entries whose parent transaction does not exist.
    async fn orphaned_entry_count(&self) -> Result<u64, StoreError>;

    /// Transactions that do not have exactly two entries.
    async fn malformed_transaction_count(&self) -> Result<u64, StoreError>;

    /// Sum of credit entries on `deposit` transactions.
    async fn total_deposit_entries(&self) -> Result<Decimal, StoreError>;

    /// Sum of debit entries on `withdrawal` transactions.
    async fn total_withdrawal_entries(&self) -> Result<Decimal, StoreError>;

    /// Sum of balances over all user-owned accounts of one type.
    async fn total_user_balance(&self, account_type: AccountType) -> Result<Decimal, StoreError>;
}
