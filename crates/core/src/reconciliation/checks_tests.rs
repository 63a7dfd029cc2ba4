use super::*;
use chrono::TimeZone;
use rust_decimal_macros::dec;
use tally_shared::config::BalancingPolicy;
use uuid::Uuid;

use crate::ledger::{
    Account, Entry, EntryDirection, EntryRequest, InMemoryLedgerStore, PostTransactionRequest,
    TransactionType,
};
use crate::reconciliation::sources::{
    ConversionJob, MockBrokerageClient, MockConversionSource, MockCustodianClient,
    MockDepositSource, MockWithdrawalSource,
};
use tally_shared::types::{EntryId, TransactionId, UserId};

fn policy() -> Arc<SeverityPolicy> {
    Arc::new(SeverityPolicy::default())
}

fn engine() -> (LedgerEngine, Arc<InMemoryLedgerStore>) {
    let store = Arc::new(InMemoryLedgerStore::new());
    let engine = LedgerEngine::new(store.clone(), BalancingPolicy::RequireEqualAmounts);
    (engine, store)
}

fn custodian_reporting(balance: Decimal) -> Arc<dyn CustodianClient> {
    let mut custodian = MockCustodianClient::new();
    custodian
        .expect_total_stablecoin_balance()
        .returning(move || Ok(balance));
    Arc::new(custodian)
}

/// Moves `amount` into the system USDC buffer.
async fn fund_buffer(engine: &LedgerEngine, amount: Decimal) -> (Account, Account) {
    let owner = UserId::new();
    let user = engine
        .get_or_create_account(Some(owner), AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = engine
        .get_or_create_account(None, AccountType::SystemBufferUsdc)
        .await
        .unwrap();
    engine
        .post_transaction(
            PostTransactionRequest::new(
                TransactionType::Deposit,
                format!("fund-{owner}"),
                vec![
                    EntryRequest::debit(buffer.id, amount, Currency::Usdc),
                    EntryRequest::credit(user.id, amount, Currency::Usdc),
                ],
            )
            .with_owner(owner),
        )
        .await
        .unwrap();
    (user, buffer)
}

#[tokio::test]
async fn test_custodian_within_tolerance_produces_no_exception() {
    let (engine, _) = engine();
    fund_buffer(&engine, dec!(1000)).await;
    let check = CustodianBalanceCheck::new(engine, custodian_reporting(dec!(1005)), dec!(10), policy());

    let result = execute(&check, ReportId::new()).await;

    assert!(result.passed);
    assert!(result.exceptions.is_empty());
    assert_eq!(result.expected_value, dec!(1000));
    assert_eq!(result.actual_value, dec!(1005));
    assert_eq!(result.difference, dec!(5));
}

#[tokio::test]
async fn test_custodian_outside_tolerance_raises_one_exception() {
    let (engine, _) = engine();
    fund_buffer(&engine, dec!(1000)).await;
    let check = CustodianBalanceCheck::new(engine, custodian_reporting(dec!(1050)), dec!(10), policy());

    let result = execute(&check, ReportId::new()).await;

    assert!(!result.passed);
    assert!(!result.is_execution_error());
    assert_eq!(result.exceptions.len(), 1);
    let exception = &result.exceptions[0];
    assert_eq!(exception.severity, policy().classify(dec!(50), Currency::Usdc));
    assert_eq!(exception.severity, Severity::Medium);
    assert_eq!(exception.difference, dec!(50));
    assert_eq!(exception.currency, Some(Currency::Usdc));
    assert_eq!(exception.check_type, CheckType::CustodianBalance);
}

#[tokio::test]
async fn test_tolerance_boundary_is_inclusive() {
    let (engine, _) = engine();
    fund_buffer(&engine, dec!(1000)).await;
    let check = CustodianBalanceCheck::new(engine, custodian_reporting(dec!(990)), dec!(10), policy());

    assert!(execute(&check, ReportId::new()).await.passed);
}

#[tokio::test]
async fn test_unreachable_custodian_is_an_execution_error() {
    let (engine, _) = engine();
    let mut custodian = MockCustodianClient::new();
    custodian.expect_total_stablecoin_balance().returning(|| {
        Err(SourceError::Unavailable {
            source_name: "custodian",
            message: "connection refused".into(),
        })
    });
    let check = CustodianBalanceCheck::new(engine, Arc::new(custodian), dec!(10), policy());

    let result = execute(&check, ReportId::new()).await;

    assert!(!result.passed);
    assert!(result.is_execution_error());
    assert!(result.exceptions.is_empty());
    assert!(result.error_message.unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_brokerage_compares_user_fiat_exposure() {
    let (engine, _) = engine();
    let owner = UserId::new();
    let exposure = engine
        .get_or_create_account(Some(owner), AccountType::FiatExposure)
        .await
        .unwrap();
    let buffer = engine
        .get_or_create_account(None, AccountType::SystemBufferFiat)
        .await
        .unwrap();
    engine
        .post_transaction(
            PostTransactionRequest::new(
                TransactionType::Conversion,
                "exposure-1",
                vec![
                    EntryRequest::debit(exposure.id, dec!(2500), Currency::Usd),
                    EntryRequest::credit(buffer.id, dec!(2500), Currency::Usd),
                ],
            )
            .with_owner(owner),
        )
        .await
        .unwrap();

    let mut brokerage = MockBrokerageClient::new();
    brokerage.expect_total_buying_power().returning(|| Ok(dec!(2300)));
    let check = BrokerageBalanceCheck::new(engine, Arc::new(brokerage), dec!(100), policy());

    let result = execute(&check, ReportId::new()).await;

    assert_eq!(result.expected_value, dec!(2500));
    assert_eq!(result.exceptions.len(), 1);
    assert_eq!(result.exceptions[0].difference, dec!(-200));
    assert_eq!(result.exceptions[0].severity, Severity::High);
    assert_eq!(result.exceptions[0].currency, Some(Currency::Usd));
}

#[tokio::test]
async fn test_ledger_consistency_passes_on_clean_ledger() {
    let (engine, store) = engine();
    fund_buffer(&engine, dec!(100)).await;
    let check = LedgerConsistencyCheck::new(store, policy());

    let result = execute(&check, ReportId::new()).await;

    assert!(result.passed);
    assert_eq!(result.expected_value, dec!(100));
    assert_eq!(result.actual_value, dec!(100));
}

#[tokio::test]
async fn test_ledger_consistency_reports_orphans_and_imbalance() {
    let (engine, store) = engine();
    let (user, _) = fund_buffer(&engine, dec!(100)).await;
    store
        .insert_unchecked_entry(Entry {
            id: EntryId::new(),
            transaction_id: TransactionId::new(),
            account_id: user.id,
            direction: EntryDirection::Debit,
            amount: dec!(5),
            currency: Currency::Usdc,
            description: None,
            created_at: chrono::Utc::now(),
        })
        .unwrap();
    let check = LedgerConsistencyCheck::new(store, policy());

    let result = execute(&check, ReportId::new()).await;

    assert!(!result.passed);
    assert_eq!(result.exceptions.len(), 2);
    let imbalance = &result.exceptions[0];
    assert_eq!(imbalance.expected, dec!(105));
    assert_eq!(imbalance.actual, dec!(100));
    assert_eq!(imbalance.severity, Severity::Medium);
    let orphans = &result.exceptions[1];
    assert_eq!(orphans.severity, Severity::High);
    assert_eq!(orphans.currency, None);
    assert_eq!(orphans.actual, dec!(1));
}

#[tokio::test]
async fn test_deposits_have_zero_tolerance() {
    let (engine, store) = engine();
    fund_buffer(&engine, dec!(100)).await;
    let mut deposits = MockDepositSource::new();
    deposits
        .expect_total_completed_deposits()
        .returning(|| Ok(dec!(100.01)));
    let check = DepositsCheck::new(store, Arc::new(deposits), policy());

    let result = execute(&check, ReportId::new()).await;

    assert_eq!(result.exceptions.len(), 1);
    assert_eq!(result.exceptions[0].severity, Severity::Low);
    assert_eq!(result.exceptions[0].expected, dec!(100.01));
    assert_eq!(result.exceptions[0].actual, dec!(100));
}

#[tokio::test]
async fn test_withdrawals_match() {
    let (_, store) = engine();
    let mut withdrawals = MockWithdrawalSource::new();
    withdrawals
        .expect_total_completed_withdrawals()
        .returning(|| Ok(Decimal::ZERO));
    let check = WithdrawalsCheck::new(store, Arc::new(withdrawals), policy());

    assert!(execute(&check, ReportId::new()).await.passed);
}

#[tokio::test]
async fn test_conversion_job_without_ledger_entry_is_reported() {
    let job_id = Uuid::new_v4();
    let mut conversions = MockConversionSource::new();
    conversions
        .expect_completed_jobs_without_ledger_entry()
        .returning(move || {
            Ok(vec![ConversionJob {
                id: job_id,
                amount: dec!(250),
                direction: "usdc_to_usd".into(),
                provider: Some("circle".into()),
                completed_at: Some(chrono::Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap()),
            }])
        });
    let check = ConversionJobsCheck::new(Arc::new(conversions));

    let result = execute(&check, ReportId::new()).await;

    assert!(!result.passed);
    assert_eq!(result.exceptions.len(), 1);
    let exception = &result.exceptions[0];
    assert_eq!(exception.affected_entity.as_deref(), Some(job_id.to_string().as_str()));
    assert_eq!(exception.severity, Severity::High);
    assert_eq!(exception.actual, dec!(250));
    assert_eq!(exception.metadata["provider"], "circle");
}

#[tokio::test]
async fn test_transaction_with_extra_entries_is_malformed() {
    let (engine, store) = engine();
    let owner = UserId::new();
    let user = engine
        .get_or_create_account(Some(owner), AccountType::UsdcBalance)
        .await
        .unwrap();
    let buffer = engine
        .get_or_create_account(None, AccountType::SystemBufferUsdc)
        .await
        .unwrap();
    let posted = engine
        .post_transaction(
            PostTransactionRequest::new(
                TransactionType::Deposit,
                "dep-malformed",
                vec![
                    EntryRequest::debit(buffer.id, dec!(40), Currency::Usdc),
                    EntryRequest::credit(user.id, dec!(40), Currency::Usdc),
                ],
            )
            .with_owner(owner),
        )
        .await
        .unwrap();
    // A balanced pair appended to an existing transaction leaves it with four entries.
    for direction in [EntryDirection::Debit, EntryDirection::Credit] {
        store
            .insert_unchecked_entry(Entry {
                id: EntryId::new(),
                transaction_id: posted.transaction.id,
                account_id: user.id,
                direction,
                amount: dec!(5),
                currency: Currency::Usdc,
                description: None,
                created_at: chrono::Utc::now(),
            })
            .unwrap();
    }
    let check = LedgerConsistencyCheck::new(store, policy());

    let result = execute(&check, ReportId::new()).await;

    assert!(!result.passed);
    assert!(result.error_message.is_none());
    assert_eq!(result.expected_value, dec!(45));
    assert_eq!(result.actual_value, dec!(45));
    assert_eq!(result.exceptions.len(), 1);
    let malformed = &result.exceptions[0];
    assert_eq!(malformed.severity, Severity::High);
    assert_eq!(malformed.currency, None);
    assert_eq!(malformed.actual, dec!(1));
    assert_eq!(malformed.metadata["malformed_transaction_count"], 1);
}

#[tokio::test]
async fn test_each_orphaned_conversion_job_is_its_own_exception() {
    let orphaned: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
    let jobs: Vec<ConversionJob> = orphaned
        .iter()
        .zip([dec!(10), dec!(20), dec!(30)])
        .map(|(id, amount)| ConversionJob {
            id: *id,
            amount,
            direction: "usd_to_usdc".into(),
            provider: None,
            completed_at: None,
        })
        .collect();
    let mut conversions = MockConversionSource::new();
    conversions
        .expect_completed_jobs_without_ledger_entry()
        .times(1)
        .returning(move || Ok(jobs.clone()));
    let check = ConversionJobsCheck::new(Arc::new(conversions));

    let result = execute(&check, ReportId::new()).await;

    assert!(!result.passed);
    assert_eq!(result.actual_value, dec!(3));
    assert_eq!(result.exceptions.len(), 3);
    let mut entities: Vec<String> = result
        .exceptions
        .iter()
        .map(|e| e.affected_entity.clone().unwrap())
        .collect();
    entities.sort();
    entities.dedup();
    let mut expected: Vec<String> = orphaned.iter().map(ToString::to_string).collect();
    expected.sort();
    assert_eq!(entities, expected);
    assert!(result.exceptions.iter().all(|e| e.severity == Severity::High));
    assert_eq!(
        result.exceptions.iter().map(|e| e.actual).sum::<Decimal>(),
        dec!(60)
    );
}

#[tokio::test]
async fn test_default_checks_cover_every_check_type() {
    let (engine, store) = engine();
    let sources = CheckSources {
        ledger: engine,
        aggregates: store,
        custodian: Arc::new(MockCustodianClient::new()),
        brokerage: Arc::new(MockBrokerageClient::new()),
        deposits: Arc::new(MockDepositSource::new()),
        withdrawals: Arc::new(MockWithdrawalSource::new()),
        conversions: Arc::new(MockConversionSource::new()),
    };
    let tolerances = Tolerances {
        custodian: dec!(10),
        brokerage: dec!(100),
    };

    let checks = default_checks(sources, tolerances, policy());

    let types: Vec<_> = checks.iter().map(|c| c.check_type()).collect();
    assert_eq!(types, CheckType::ALL);
}
