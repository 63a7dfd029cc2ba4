//! In-memory ledger store.
//!
//! Intended for tests and local runs. One lock guards the whole state, so postings
//! are trivially serialized and atomic.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use tally_shared::types::{AccountId, TransactionId, UserId};

use super::balance::{DebitCreditTotals, balance_deltas};
use super::store::{LedgerAggregates, LedgerStore, NewPosting, StoreError};
use super::types::{
    Account, AccountType, Entry, EntryDirection, Transaction, TransactionType,
    TransactionWithEntries,
};

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<AccountId, Account>,
    account_index: HashMap<(Option<UserId>, AccountType), AccountId>,
    transactions: HashMap<TransactionId, Transaction>,
    keys: HashMap<String, TransactionId>,
    entries: Vec<Entry>,
}

impl State {
    fn entries_of(&self, transaction_id: TransactionId) -> Vec<Entry> {
        self.entries
            .iter()
            .filter(|e| e.transaction_id == transaction_id)
            .cloned()
            .collect()
    }

    fn entries_for_type(&self, transaction_type: TransactionType, direction: EntryDirection) -> Decimal {
        self.entries
            .iter()
            .filter(|e| e.direction == direction)
            .filter(|e| {
                self.transactions
                    .get(&e.transaction_id)
                    .is_some_and(|t| t.transaction_type == transaction_type)
            })
            .map(|e| e.amount)
            .sum()
    }
}

/// Ledger store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    state: RwLock<State>,
}

impl InMemoryLedgerStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, State>, StoreError> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, State>, StoreError> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    /// Appends an entry without any checks, leaving balances untouched.
    ///
    /// Simulates rows written outside the engine (bad imports, manual SQL) so that
    /// consistency checks have something to find.
    pub fn insert_unchecked_entry(&self, entry: Entry) -> Result<(), StoreError> {
        self.write()?.entries.push(entry);
        Ok(())
    }

    /// Number of journaled transactions.
    pub fn transaction_count(&self) -> Result<usize, StoreError> {
        Ok(self.read()?.transactions.len())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_or_create_account(
        &self,
        owner: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Account, StoreError> {
        let mut state = self.write()?;
        if let Some(id) = state.account_index.get(&(owner, account_type)) {
            if let Some(account) = state.accounts.get(id) {
                return Ok(account.clone());
            }
        }

        let account = Account::new(owner, account_type, Utc::now());
        state.account_index.insert((owner, account_type), account.id);
        state.accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_account(
        &self,
        owner: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Option<Account>, StoreError> {
        let state = self.read()?;
        Ok(state
            .account_index
            .get(&(owner, account_type))
            .and_then(|id| state.accounts.get(id))
            .cloned())
    }

    async fn get_account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.read()?.accounts.get(&id).cloned())
    }

    async fn user_accounts(&self, owner: UserId) -> Result<Vec<Account>, StoreError> {
        let state = self.read()?;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| a.owner == Some(owner))
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.account_type);
        Ok(accounts)
    }

    async fn find_transaction_by_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<TransactionWithEntries>, StoreError> {
        let state = self.read()?;
        Ok(state
            .keys
            .get(idempotency_key)
            .and_then(|id| state.transactions.get(id))
            .map(|transaction| TransactionWithEntries {
                transaction: transaction.clone(),
                entries: state.entries_of(transaction.id),
            }))
    }

    async fn find_transaction(
        &self,
        id: TransactionId,
    ) -> Result<Option<TransactionWithEntries>, StoreError> {
        let state = self.read()?;
        Ok(state.transactions.get(&id).map(|transaction| TransactionWithEntries {
            transaction: transaction.clone(),
            entries: state.entries_of(id),
        }))
    }

    async fn owner_entries(
        &self,
        owner: UserId,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Entry>, StoreError> {
        let state = self.read()?;
        let mut entries: Vec<Entry> = state
            .entries
            .iter()
            .filter(|e| {
                state
                    .accounts
                    .get(&e.account_id)
                    .is_some_and(|a| a.owner == Some(owner))
            })
            .cloned()
            .collect();
        entries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(entries
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(usize::MAX))
            .take(usize::try_from(limit).unwrap_or(usize::MAX))
            .collect())
    }

    async fn commit_posting(&self, posting: NewPosting) -> Result<(), StoreError> {
        let mut state = self.write()?;

        let key = &posting.transaction.idempotency_key;
        if state.keys.contains_key(key) {
            return Err(StoreError::DuplicateIdempotencyKey(key.clone()));
        }

        let deltas = balance_deltas(&posting.entries);
        for account_id in deltas.keys() {
            if !state.accounts.contains_key(account_id) {
                return Err(StoreError::AccountNotFound(*account_id));
            }
        }
        for guard in &posting.guards {
            let Some(account) = state.accounts.get(&guard.account_id) else {
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

        // Every check passed; nothing below can fail.
        let now = posting.transaction.created_at;
        for (account_id, delta) in deltas {
            if let Some(account) = state.accounts.get_mut(&account_id) {
                account.balance += delta;
                account.updated_at = now;
            }
        }
        state.keys.insert(key.clone(), posting.transaction.id);
        state.transactions.insert(posting.transaction.id, posting.transaction);
        state.entries.extend(posting.entries);
        Ok(())
    }
}

#[async_trait]
impl LedgerAggregates for InMemoryLedgerStore {
    async fn total_debits_and_credits(&self) -> Result<DebitCreditTotals, StoreError> {
        Ok(DebitCreditTotals::from_entries(&self.read()?.entries))
    }

    async fn orphaned_entry_count(&self) -> Result<u64, StoreError> {
        let state = self.read()?;
        let count = state
            .entries
            .iter()
            .filter(|e| !state.transactions.contains_key(&e.transaction_id))
            .count();
        Ok(count as u64)
    }

    async fn malformed_transaction_count(&self) -> Result<u64, StoreError> {
        let state = self.read()?;
        let mut per_transaction: HashMap<TransactionId, usize> = HashMap::new();
        for entry in &state.entries {
            if state.transactions.contains_key(&entry.transaction_id) {
                *per_transaction.entry(entry.transaction_id).or_default() += 1;
            }
        }
        let count = per_transaction.values().filter(|n| **n != 2).count();
        Ok(count as u64)
    }

    async fn total_deposit_entries(&self) -> Result<Decimal, StoreError> {
        Ok(self
            .read()?
            .entries_for_type(TransactionType::Deposit, EntryDirection::Credit))
    }

    async fn total_withdrawal_entries(&self) -> Result<Decimal, StoreError> {
        Ok(self
            .read()?
            .entries_for_type(TransactionType::Withdrawal, EntryDirection::Debit))
    }

    async fn total_user_balance(&self, account_type: AccountType) -> Result<Decimal, StoreError> {
        Ok(self
            .read()?
            .accounts
            .values()
            .filter(|a| a.owner.is_some() && a.account_type == account_type)
            .map(|a| a.balance)
            .sum())
    }
}
