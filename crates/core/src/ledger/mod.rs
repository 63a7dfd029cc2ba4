//! Double-entry ledger.
//!
//! This module implements the bookkeeping layer every money-moving feature goes
//! through:
//! - Domain types for accounts, transactions and entries
//! - Balance arithmetic (debit adds, credit subtracts)
//! - Posting validation and idempotent-replay detection
//! - The storage seam and an in-memory implementation
//! - The ledger engine

pub mod balance;
pub mod error;
pub mod memory;
pub mod service;
pub mod store;
pub mod types;
pub mod validation;

#[cfg(test)]
mod service_props;

pub use balance::DebitCreditTotals;
pub use error::LedgerError;
pub use memory::InMemoryLedgerStore;
pub use service::{LedgerBackend, LedgerEngine};
pub use store::{BalanceGuard, LedgerAggregates, LedgerStore, NewPosting, StoreError};
pub use types::{
    Account, AccountType, Entry, EntryDirection, EntryRequest, PostTransactionRequest,
    PostedTransaction, Transaction, TransactionType, TransactionWithEntries, UserBalances,
};
