//! Ledger error types for validation, conflict and storage errors.

use rust_decimal::Decimal;
use tally_shared::AppError;
use tally_shared::types::{AccountId, Currency, TransactionId};
use thiserror::Error;

use super::store::StoreError;
use super::types::AccountType;

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    // ========== Validation Errors ==========
    /// Idempotency key is missing or blank.
    #[error("Idempotency key is required")]
    MissingIdempotencyKey,

    /// Transaction must have exactly 2 entries.
    #[error("Transaction must have exactly 2 entries, got {0}")]
    InvalidEntryCount(usize),

    /// Entry amount must be strictly positive.
    #[error("Entry amount must be positive, got {0}")]
    NonPositiveAmount(Decimal),

    /// Amount carries more decimal places than the ledger stores.
    #[error("Entry amount {amount} has more than {max_scale} decimal places")]
    ExcessiveScale {
        /// The rejected amount.
        amount: Decimal,
        /// Largest accepted scale.
        max_scale: u32,
    },

    /// Both entries are on the same side.
    #[error("Transaction must have one debit and one credit entry")]
    SingleSided,

    /// Both entries target the same account.
    #[error("Entries must target two different accounts, got {0} twice")]
    SameAccount(AccountId),

    /// Entry currency differs from the account's currency.
    #[error("Entry currency {entry} does not match account {account_id} currency {account}")]
    CurrencyMismatch {
        /// The account ID.
        account_id: AccountId,
        /// The account's currency.
        account: Currency,
        /// The currency on the entry.
        entry: Currency,
    },

    /// Debit and credit amounts differ.
    #[error("Transaction is not balanced. Debit: {debit}, Credit: {credit}")]
    UnbalancedTransaction {
        /// Debit amount.
        debit: Decimal,
        /// Credit amount.
        credit: Decimal,
    },

    /// User account requested without an owner, or system account with one.
    #[error("Account type {account_type} {}", if account_type.is_system() { "cannot have an owner" } else { "requires an owner" })]
    InvalidOwnership {
        /// The requested account type.
        account_type: AccountType,
    },

    /// A system-only operation was given a user account type.
    #[error("Account type {0} is not a system account")]
    NotSystemAccount(AccountType),

    // ========== Account Errors ==========
    /// Account not found.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transaction not found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    /// Posting would take a guarded account below its floor.
    #[error("Insufficient funds in account {account_id}: have {available}, need {required}")]
    InsufficientFunds {
        /// The account ID.
        account_id: AccountId,
        /// Balance before the posting.
        available: Decimal,
        /// Amount the posting would remove.
        required: Decimal,
    },

    // ========== Conflict Errors ==========
    /// Idempotency key already used by a transaction with different content.
    #[error("Idempotency key {key} was already used for a different transaction")]
    IdempotencyConflict {
        /// The reused key.
        key: String,
    },

    // ========== Storage Errors ==========
    /// Storage backend error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl LedgerError {
    /// Returns the stable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::MissingIdempotencyKey => "MISSING_IDEMPOTENCY_KEY",
            Self::InvalidEntryCount(_) => "INVALID_ENTRY_COUNT",
            Self::NonPositiveAmount(_) => "NON_POSITIVE_AMOUNT",
            Self::ExcessiveScale { .. } => "EXCESSIVE_SCALE",
            Self::SingleSided => "SINGLE_SIDED",
            Self::SameAccount(_) => "SAME_ACCOUNT",
            Self::CurrencyMismatch { .. } => "CURRENCY_MISMATCH",
            Self::UnbalancedTransaction { .. } => "UNBALANCED_TRANSACTION",
            Self::InvalidOwnership { .. } => "INVALID_OWNERSHIP",
            Self::NotSystemAccount(_) => "NOT_SYSTEM_ACCOUNT",
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::TransactionNotFound(_) => "TRANSACTION_NOT_FOUND",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::IdempotencyConflict { .. } => "IDEMPOTENCY_CONFLICT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true for malformed requests that were rejected before touching storage.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingIdempotencyKey
                | Self::InvalidEntryCount(_)
                | Self::NonPositiveAmount(_)
                | Self::ExcessiveScale { .. }
                | Self::SingleSided
                | Self::SameAccount(_)
                | Self::CurrencyMismatch { .. }
                | Self::UnbalancedTransaction { .. }
                | Self::InvalidOwnership { .. }
                | Self::NotSystemAccount(_)
        )
    }

    /// Returns true if the caller may retry with the same idempotency key.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_))
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::AccountNotFound(id) => Self::AccountNotFound(id),
            StoreError::InsufficientFunds {
                account_id,
                available,
                required,
            } => Self::InsufficientFunds {
                account_id,
                available,
                required,
            },
            StoreError::DuplicateIdempotencyKey(key) => Self::IdempotencyConflict { key },
            StoreError::Backend(msg) => Self::Storage(msg),
        }
    }
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::AccountNotFound(_) | LedgerError::TransactionNotFound(_) => {
                Self::NotFound(message)
            }
            LedgerError::InsufficientFunds { .. } => Self::BusinessRule(message),
            LedgerError::IdempotencyConflict { .. } => Self::Conflict(message),
            LedgerError::Storage(_) => Self::Database(message),
            LedgerError::Internal(_) => Self::Internal(message),
            _ => Self::Validation(message),
        }
    }
}
