//! Ledger engine: the only sanctioned path for changing a balance.
//!
//! Every balance change goes through `post_transaction`, which validates the
//! request, enforces idempotency and hands an atomic posting to the store.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tally_shared::config::BalancingPolicy;
use tally_shared::types::{AccountId, EntryId, TransactionId, UserId};
use tracing::{info, instrument, warn};

use super::error::LedgerError;
use super::store::{BalanceGuard, LedgerAggregates, LedgerStore, NewPosting, StoreError};
use super::types::{
    Account, AccountType, Entry, EntryRequest, PostTransactionRequest, PostedTransaction,
    Transaction, TransactionType, TransactionWithEntries, UserBalances,
};
use super::validation::{is_same_posting, validate_against_accounts, validate_shape};

/// Storage the engine needs: the journal plus its aggregate queries.
pub trait LedgerBackend: LedgerStore + LedgerAggregates {}

impl<T: LedgerStore + LedgerAggregates> LedgerBackend for T {}

/// Double-entry ledger engine.
#[derive(Clone)]
pub struct LedgerEngine {
    store: Arc<dyn LedgerBackend>,
    policy: BalancingPolicy,
}

impl std::fmt::Debug for LedgerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerEngine")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl LedgerEngine {
    /// Creates an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerBackend>, policy: BalancingPolicy) -> Self {
        Self { store, policy }
    }

    /// Balancing policy in effect.
    #[must_use]
    pub const fn policy(&self) -> BalancingPolicy {
        self.policy
    }

    /// Returns the account for `(owner, account_type)`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOwnership` if a system type is given an owner or a user type
    /// is not, and `Storage` if the store fails.
    pub async fn get_or_create_account(
        &self,
        owner: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Account, LedgerError> {
        check_ownership(owner, account_type)?;
        Ok(self.store.get_or_create_account(owner, account_type).await?)
    }

    /// Looks up an account by ID.
    ///
    /// # Errors
    ///
    /// Returns `AccountNotFound` if it does not exist.
    pub async fn get_account(&self, id: AccountId) -> Result<Account, LedgerError> {
        self.store
            .get_account(id)
            .await?
            .ok_or(LedgerError::AccountNotFound(id))
    }

    /// Looks up a posted transaction by idempotency key.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    pub async fn get_transaction(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<TransactionWithEntries>, LedgerError> {
        Ok(self.store.find_transaction_by_key(idempotency_key).await?)
    }

    /// Posts a two-entry transaction.
    ///
    /// If a transaction with the same idempotency key exists and records the same
    /// entries, it is returned unchanged with `replayed = true` and no balance moves.
    ///
    /// # Errors
    ///
    /// - Validation errors for malformed requests (nothing persisted)
    /// - `AccountNotFound` if an entry names an unknown account
    /// - `IdempotencyConflict` if the key was used for different entries
    /// - `Storage` if the store fails; retry with the same key
    pub async fn post_transaction(
        &self,
        request: PostTransactionRequest,
    ) -> Result<PostedTransaction, LedgerError> {
        self.post_guarded(request, Vec::new()).await
    }

    #[instrument(
        skip(self, request, guards),
        fields(key = %request.idempotency_key, transaction_type = %request.transaction_type)
    )]
    async fn post_guarded(
        &self,
        request: PostTransactionRequest,
        guards: Vec<BalanceGuard>,
    ) -> Result<PostedTransaction, LedgerError> {
        let (debit, credit) = validate_shape(&request)?;

        if let Some(existing) = self
            .store
            .find_transaction_by_key(&request.idempotency_key)
            .await?
        {
            return replay_or_conflict(existing, &request);
        }

        let debit_account = self.get_account(debit.account_id).await?;
        let credit_account = self.get_account(credit.account_id).await?;
        validate_against_accounts(
            (debit, &debit_account),
            (credit, &credit_account),
            self.policy,
        )?;

        let posting = build_posting(&request, guards);
        let transaction = posting.transaction.clone();
        let entries = posting.entries.clone();

        match self.store.commit_posting(posting).await {
            Ok(()) => {
                info!(transaction_id = %transaction.id, "Transaction posted");
                Ok(PostedTransaction {
                    transaction,
                    entries,
                    replayed: false,
                })
            }
            Err(StoreError::DuplicateIdempotencyKey(key)) => {
                // Lost a race with a concurrent first-time posting of the same key.
                let existing = self
                    .store
                    .find_transaction_by_key(&key)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Internal(format!("transaction for key {key} vanished"))
                    })?;
                replay_or_conflict(existing, &request)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Posts the compensating transaction for `transaction_id`: the same entries with
    /// debit and credit swapped, typed `reversal`.
    ///
    /// Keyed by `reversal:{transaction_id}`, so a transaction is reversed at most once
    /// and retries return the first reversal.
    ///
    /// # Errors
    ///
    /// Returns `TransactionNotFound` if there is nothing to reverse, and the usual
    /// posting errors otherwise.
    #[instrument(skip(self))]
    pub async fn reverse_transaction(
        &self,
        transaction_id: TransactionId,
        reason: &str,
    ) -> Result<PostedTransaction, LedgerError> {
        let original = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or(LedgerError::TransactionNotFound(transaction_id))?;

        let entry_description = format!("Reversal of transaction {transaction_id}: {reason}");
        let entries = original
            .entries
            .iter()
            .map(|e| EntryRequest {
                account_id: e.account_id,
                direction: e.direction.opposite(),
                amount: e.amount,
                currency: e.currency,
                description: Some(entry_description.clone()),
            })
            .collect();

        let mut request = PostTransactionRequest::new(
            TransactionType::Reversal,
            format!("reversal:{transaction_id}"),
            entries,
        )
        .with_reference(Some(transaction_id.into_inner()), "ledger_transaction")
        .with_description(format!("Reversal: {reason}"))
        .with_metadata(serde_json::json!({
            "reversed_transaction_id": transaction_id,
            "reversed_transaction_type": original.transaction.transaction_type,
            "reason": reason,
        }));
        request.owner = original.transaction.owner;

        let posted = self.post_transaction(request).await?;
        if !posted.replayed {
            info!(
                original_transaction_id = %transaction_id,
                reversal_transaction_id = %posted.transaction.id,
                reason,
                "Transaction reversed"
            );
        }
        Ok(posted)
    }

    /// Entries on the user's accounts, newest first.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    pub async fn get_transaction_history(
        &self,
        owner: UserId,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Entry>, LedgerError> {
        Ok(self.store.owner_entries(owner, limit, offset).await?)
    }

    /// Balance of `(owner, account_type)`, zero if the account does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    pub async fn get_balance(
        &self,
        owner: Option<UserId>,
        account_type: AccountType,
    ) -> Result<Decimal, LedgerError> {
        Ok(self
            .store
            .find_account(owner, account_type)
            .await?
            .map_or(Decimal::ZERO, |a| a.balance))
    }

    /// USDC, fiat exposure and pending investment balances of a user.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    pub async fn get_user_balances(&self, owner: UserId) -> Result<UserBalances, LedgerError> {
        let accounts = self.store.user_accounts(owner).await?;
        Ok(UserBalances::from_accounts(&accounts))
    }

    /// Moves `amount` from the user's USDC balance into pending investment.
    ///
    /// Keyed by `reserve:{owner}:{reference}`, so retrying with the same reference
    /// is safe.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` if the USDC balance is below `amount`.
    pub async fn reserve_for_investment(
        &self,
        owner: UserId,
        amount: Decimal,
        reference: &str,
    ) -> Result<PostedTransaction, LedgerError> {
        let usdc = self.get_or_create_account(Some(owner), AccountType::UsdcBalance).await?;
        let pending = self
            .get_or_create_account(Some(owner), AccountType::PendingInvestment)
            .await?;
        let description = "Reserve funds for investment";

        let request = PostTransactionRequest::new(
            TransactionType::InternalTransfer,
            format!("reserve:{owner}:{reference}"),
            vec![
                EntryRequest::credit(usdc.id, amount, usdc.currency).with_description(description),
                EntryRequest::debit(pending.id, amount, pending.currency).with_description(description),
            ],
        )
        .with_owner(owner)
        .with_description(description)
        .with_metadata(serde_json::json!({ "reference": reference }));

        self.post_guarded(request, vec![BalanceGuard::non_negative(usdc.id)])
            .await
    }

    /// Exact inverse of `reserve_for_investment`.
    ///
    /// Keyed by `release:{owner}:{reference}`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` if pending investment is below `amount`.
    pub async fn release_reservation(
        &self,
        owner: UserId,
        amount: Decimal,
        reference: &str,
    ) -> Result<PostedTransaction, LedgerError> {
        let usdc = self.get_or_create_account(Some(owner), AccountType::UsdcBalance).await?;
        let pending = self
            .get_or_create_account(Some(owner), AccountType::PendingInvestment)
            .await?;
        let description = "Release investment reservation";

        let request = PostTransactionRequest::new(
            TransactionType::InternalTransfer,
            format!("release:{owner}:{reference}"),
            vec![
                EntryRequest::credit(pending.id, amount, pending.currency)
                    .with_description(description),
                EntryRequest::debit(usdc.id, amount, usdc.currency).with_description(description),
            ],
        )
        .with_owner(owner)
        .with_description(description)
        .with_metadata(serde_json::json!({ "reference": reference }));

        self.post_guarded(request, vec![BalanceGuard::non_negative(pending.id)])
            .await
    }

    /// Settles a card spend: reduces the user's spending balance and moves the
    /// amount into the fiat settlement buffer.
    ///
    /// Keyed by `card:{reference}`.
    ///
    /// # Errors
    ///
    /// Returns `InsufficientFunds` if the spending balance is below `amount`.
    pub async fn record_card_transaction(
        &self,
        owner: UserId,
        amount: Decimal,
        reference: &str,
    ) -> Result<PostedTransaction, LedgerError> {
        let spending = self
            .get_or_create_account(Some(owner), AccountType::SpendingBalance)
            .await?;
        let settlement = self
            .get_or_create_account(None, AccountType::SystemBufferFiat)
            .await?;
        let description = format!("Card transaction: {reference}");

        let request = PostTransactionRequest::new(
            TransactionType::CardPayment,
            format!("card:{reference}"),
            vec![
                EntryRequest::credit(spending.id, amount, spending.currency)
                    .with_description(description.clone()),
                EntryRequest::debit(settlement.id, amount, settlement.currency)
                    .with_description(description.clone()),
            ],
        )
        .with_owner(owner)
        .with_reference(None, "card_transaction")
        .with_description(description)
        .with_metadata(serde_json::json!({ "card_reference": reference }));

        self.post_guarded(request, vec![BalanceGuard::non_negative(spending.id)])
            .await
    }

    /// Sum of every user's fiat exposure.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store fails.
    pub async fn get_total_user_fiat_exposure(&self) -> Result<Decimal, LedgerError> {
        Ok(self
            .store
            .total_user_balance(AccountType::FiatExposure)
            .await?)
    }

    /// Balance of a system account, zero if it was never created.
    ///
    /// # Errors
    ///
    /// Returns `NotSystemAccount` for user account types.
    pub async fn get_system_buffer_balance(
        &self,
        account_type: AccountType,
    ) -> Result<Decimal, LedgerError> {
        if !account_type.is_system() {
            return Err(LedgerError::NotSystemAccount(account_type));
        }
        self.get_balance(None, account_type).await
    }
}

fn check_ownership(owner: Option<UserId>, account_type: AccountType) -> Result<(), LedgerError> {
    if owner.is_some() == account_type.is_system() {
        return Err(LedgerError::InvalidOwnership { account_type });
    }
    Ok(())
}

fn replay_or_conflict(
    existing: TransactionWithEntries,
    request: &PostTransactionRequest,
) -> Result<PostedTransaction, LedgerError> {
    if is_same_posting(&existing, request) {
        info!(
            transaction_id = %existing.transaction.id,
            "Idempotent replay, returning existing transaction"
        );
        return Ok(PostedTransaction::replay(existing));
    }

    warn!(
        key = %request.idempotency_key,
        existing_transaction_id = %existing.transaction.id,
        "Idempotency key reused with different entries"
    );
    Err(LedgerError::IdempotencyConflict {
        key: request.idempotency_key.clone(),
    })
}

fn build_posting(request: &PostTransactionRequest, guards: Vec<BalanceGuard>) -> NewPosting {
    let now = Utc::now();
    let transaction_id = TransactionId::new();

    let transaction = Transaction {
        id: transaction_id,
        idempotency_key: request.idempotency_key.clone(),
        transaction_type: request.transaction_type,
        owner: request.owner,
        reference_id: request.reference_id,
        reference_type: request.reference_type.clone(),
        description: request.description.clone(),
        metadata: request
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({})),
        created_at: now,
    };

    let entries = request
        .entries
        .iter()
        .map(|e| Entry {
            id: EntryId::new(),
            transaction_id,
            account_id: e.account_id,
            direction: e.direction,
            amount: e.amount,
            currency: e.currency,
            description: e.description.clone(),
            created_at: now,
        })
        .collect();

    NewPosting {
        transaction,
        entries,
        guards,
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
