//! Property-based tests for the ledger engine.
//!
//! - Global invariant: after any sequence of valid postings, total debits equal
//!   total credits.
//! - Every cached balance equals the signed sum of the entries posted against it.
//! - Replaying any posting changes nothing.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;
use rust_decimal::Decimal;
use tally_shared::config::BalancingPolicy;
use tally_shared::types::{AccountId, UserId};

use super::memory::InMemoryLedgerStore;
use super::service::LedgerEngine;
use super::store::LedgerAggregates;
use super::types::{Account, AccountType, EntryRequest, PostTransactionRequest, TransactionType};

/// Strategy to generate positive decimal amounts (0.01 to 10,000.00).
fn positive_amount() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
}

/// A posting between two of the USDC accounts, by index, in a given direction.
fn posting_strategy() -> impl Strategy<Value = (usize, usize, Decimal)> {
    (0usize..4, 0usize..4, positive_amount()).prop_filter("distinct accounts", |(a, b, _)| a != b)
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

async fn usdc_accounts(engine: &LedgerEngine) -> Vec<Account> {
    let mut accounts = Vec::new();
    for _ in 0..3 {
        accounts.push(
            engine
                .get_or_create_account(Some(UserId::new()), AccountType::UsdcBalance)
                .await
                .unwrap(),
        );
    }
    accounts.push(
        engine
            .get_or_create_account(None, AccountType::SystemBufferUsdc)
            .await
            .unwrap(),
    );
    accounts
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_valid_postings_preserve_invariants(
        postings in prop::collection::vec(posting_strategy(), 1..30),
        replay_every in 1usize..5,
    ) {
        runtime().block_on(async {
            let store = Arc::new(InMemoryLedgerStore::new());
            let engine = LedgerEngine::new(store.clone(), BalancingPolicy::RequireEqualAmounts);
            let accounts = usdc_accounts(&engine).await;
            let mut expected: HashMap<AccountId, Decimal> = HashMap::new();
            let mut requests = Vec::new();

            for (i, (debit, credit, amount)) in postings.iter().enumerate() {
                let debit = &accounts[*debit];
                let credit = &accounts[*credit];
                let request = PostTransactionRequest::new(
                    TransactionType::InternalTransfer,
                    format!("prop-{i}"),
                    vec![
                        EntryRequest::debit(debit.id, *amount, debit.currency),
                        EntryRequest::credit(credit.id, *amount, credit.currency),
                    ],
                );
                engine.post_transaction(request.clone()).await.unwrap();
                *expected.entry(debit.id).or_default() += *amount;
                *expected.entry(credit.id).or_default() -= *amount;
                requests.push(request);
            }

            for request in requests.into_iter().step_by(replay_every) {
                let replay = engine.post_transaction(request).await.unwrap();
                assert!(replay.replayed);
            }

            let totals = store.total_debits_and_credits().await.unwrap();
            assert_eq!(totals.debits, totals.credits);
            assert_eq!(store.transaction_count().unwrap(), postings.len());
            assert_eq!(store.malformed_transaction_count().await.unwrap(), 0);

            for account in &accounts {
                let balance = engine.get_account(account.id).await.unwrap().balance;
                let want = expected.get(&account.id).copied().unwrap_or_default();
                assert_eq!(balance, want);
            }

            let net: Decimal = expected.values().copied().sum();
            assert_eq!(net, Decimal::ZERO);
        });
    }
}
