//! Domain types for the ledger: accounts, transactions, entries and posting requests.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tally_shared::types::{AccountId, Currency, EntryId, TransactionId, UserId};
use uuid::Uuid;

/// Kinds of balance holders.
///
/// The currency of an account is fixed by its type. System types are platform-wide
/// singletons and never have an owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// User's spendable stablecoin balance.
    UsdcBalance,
    /// User's dollar exposure held at the brokerage.
    FiatExposure,
    /// Stablecoin set aside for an investment that has not settled yet.
    PendingInvestment,
    /// Card spending pocket.
    SpendingBalance,
    /// Savings pocket.
    StashBalance,
    /// Platform stablecoin buffer held at the custodian.
    SystemBufferUsdc,
    /// Platform dollar buffer used for card settlement.
    SystemBufferFiat,
    /// Platform operating cash at the brokerage.
    BrokerOperational,
}

impl AccountType {
    /// Every account type.
    pub const ALL: [Self; 8] = [
        Self::UsdcBalance,
        Self::FiatExposure,
        Self::PendingInvestment,
        Self::SpendingBalance,
        Self::StashBalance,
        Self::SystemBufferUsdc,
        Self::SystemBufferFiat,
        Self::BrokerOperational,
    ];

    /// Returns the snake_case name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UsdcBalance => "usdc_balance",
            Self::FiatExposure => "fiat_exposure",
            Self::PendingInvestment => "pending_investment",
            Self::SpendingBalance => "spending_balance",
            Self::StashBalance => "stash_balance",
            Self::SystemBufferUsdc => "system_buffer_usdc",
            Self::SystemBufferFiat => "system_buffer_fiat",
            Self::BrokerOperational => "broker_operational",
        }
    }

    /// Currency every account of this type is denominated in.
    #[must_use]
    pub const fn currency(self) -> Currency {
        match self {
            Self::FiatExposure
            | Self::SpendingBalance
            | Self::SystemBufferFiat
            | Self::BrokerOperational => Currency::Usd,
            Self::UsdcBalance
            | Self::PendingInvestment
            | Self::StashBalance
            | Self::SystemBufferUsdc => Currency::Usdc,
        }
    }

    /// Returns true for platform-wide accounts without an owner.
    #[must_use]
    pub const fn is_system(self) -> bool {
        matches!(
            self,
            Self::SystemBufferUsdc | Self::SystemBufferFiat | Self::BrokerOperational
        )
    }
}

impl std::fmt::Display for AccountType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AccountType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown account type: {s}"))
    }
}

/// Business meaning of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    /// Funds arriving from outside the platform.
    Deposit,
    /// Funds leaving the platform.
    Withdrawal,
    /// Purchase or sale of brokerage exposure.
    Investment,
    /// Stablecoin to dollar conversion (or back).
    Conversion,
    /// Movement between a user's own accounts.
    InternalTransfer,
    /// Top-up of a system buffer.
    BufferReplenishment,
    /// Compensating entry for an earlier transaction.
    Reversal,
    /// Card settlement.
    CardPayment,
}

impl TransactionType {
    /// Every transaction type.
    pub const ALL: [Self; 8] = [
        Self::Deposit,
        Self::Withdrawal,
        Self::Investment,
        Self::Conversion,
        Self::InternalTransfer,
        Self::BufferReplenishment,
        Self::Reversal,
        Self::CardPayment,
    ];

    /// Returns the snake_case name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Deposit => "deposit",
            Self::Withdrawal => "withdrawal",
            Self::Investment => "investment",
            Self::Conversion => "conversion",
            Self::InternalTransfer => "internal_transfer",
            Self::BufferReplenishment => "buffer_replenishment",
            Self::Reversal => "reversal",
            Self::CardPayment => "card_payment",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("Unknown transaction type: {s}"))
    }
}

/// Side of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryDirection {
    /// Increases the account balance.
    Debit,
    /// Decreases the account balance.
    Credit,
}

impl EntryDirection {
    /// Returns the snake_case name stored in the database.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Credit => "credit",
        }
    }

    /// The opposite side.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Debit => Self::Credit,
            Self::Credit => Self::Debit,
        }
    }
}

impl std::fmt::Display for EntryDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntryDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debit" => Ok(Self::Debit),
            "credit" => Ok(Self::Credit),
            _ => Err(format!("Unknown entry direction: {s}")),
        }
    }
}

/// A named balance holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account ID.
    pub id: AccountId,
    /// Owning user, `None` for system accounts.
    pub owner: Option<UserId>,
    /// Account type.
    pub account_type: AccountType,
    /// Cached signed sum of every entry posted against the account.
    pub balance: Decimal,
    /// Denomination.
    pub currency: Currency,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Time of the last balance change.
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Creates an empty account of the given type.
    #[must_use]
    pub fn new(owner: Option<UserId>, account_type: AccountType, now: DateTime<Utc>) -> Self {
        Self {
            id: AccountId::new(),
            owner,
            account_type,
            balance: Decimal::ZERO,
            currency: account_type.currency(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// An immutable journal record of one balance-affecting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID.
    pub id: TransactionId,
    /// Caller-supplied, globally unique token.
    pub idempotency_key: String,
    /// Business meaning.
    pub transaction_type: TransactionType,
    /// User the transaction belongs to, if any.
    pub owner: Option<UserId>,
    /// ID of the external entity (deposit, withdrawal, conversion job) this records.
    pub reference_id: Option<Uuid>,
    /// Kind of the external entity.
    pub reference_type: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Arbitrary JSON metadata.
    pub metadata: serde_json::Value,
    /// Posting time.
    pub created_at: DateTime<Utc>,
}

/// One side of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Entry ID.
    pub id: EntryId,
    /// Parent transaction.
    pub transaction_id: TransactionId,
    /// Affected account.
    pub account_id: AccountId,
    /// Debit or credit.
    pub direction: EntryDirection,
    /// Strictly positive amount.
    pub amount: Decimal,
    /// Denomination, always equal to the account's currency.
    pub currency: Currency,
    /// Free-form description.
    pub description: Option<String>,
    /// Posting time.
    pub created_at: DateTime<Utc>,
}

impl Entry {
    /// Balance delta this entry applies to its account.
    #[must_use]
    pub fn signed_amount(&self) -> Decimal {
        super::balance::signed_amount(self.direction, self.amount)
    }
}

/// A transaction together with its entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionWithEntries {
    /// The transaction header.
    pub transaction: Transaction,
    /// Its entries.
    pub entries: Vec<Entry>,
}

/// Result of `post_transaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostedTransaction {
    /// The transaction header.
    pub transaction: Transaction,
    /// Its entries.
    pub entries: Vec<Entry>,
    /// True when the idempotency key had already been posted and nothing changed.
    pub replayed: bool,
}

impl PostedTransaction {
    pub(crate) fn replay(existing: TransactionWithEntries) -> Self {
        Self {
            transaction: existing.transaction,
            entries: existing.entries,
            replayed: true,
        }
    }
}

/// One entry of a posting request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRequest {
    /// Account to post against.
    pub account_id: AccountId,
    /// Debit or credit.
    pub direction: EntryDirection,
    /// Strictly positive amount.
    pub amount: Decimal,
    /// Must equal the account's currency.
    pub currency: Currency,
    /// Free-form description.
    pub description: Option<String>,
}

impl EntryRequest {
    /// Debit `amount` to `account_id`.
    #[must_use]
    pub const fn debit(account_id: AccountId, amount: Decimal, currency: Currency) -> Self {
        Self {
            account_id,
            direction: EntryDirection::Debit,
            amount,
            currency,
            description: None,
        }
    }

    /// Credit `amount` to `account_id`.
    #[must_use]
    pub const fn credit(account_id: AccountId, amount: Decimal, currency: Currency) -> Self {
        Self {
            account_id,
            direction: EntryDirection::Credit,
            amount,
            currency,
            description: None,
        }
    }

    /// Sets the entry description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Input to `post_transaction`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostTransactionRequest {
    /// User the transaction belongs to, if any.
    pub owner: Option<UserId>,
    /// Business meaning.
    pub transaction_type: TransactionType,
    /// Required, globally unique token.
    pub idempotency_key: String,
    /// ID of the external entity this records.
    pub reference_id: Option<Uuid>,
    /// Kind of the external entity.
    pub reference_type: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Arbitrary JSON metadata.
    pub metadata: Option<serde_json::Value>,
    /// Exactly two entries.
    pub entries: Vec<EntryRequest>,
}

impl PostTransactionRequest {
    /// Creates a request with no owner, reference, description or metadata.
    #[must_use]
    pub fn new(
        transaction_type: TransactionType,
        idempotency_key: impl Into<String>,
        entries: Vec<EntryRequest>,
    ) -> Self {
        Self {
            owner: None,
            transaction_type,
            idempotency_key: idempotency_key.into(),
            reference_id: None,
            reference_type: None,
            description: None,
            metadata: None,
            entries,
        }
    }

    /// Sets the owning user.
    #[must_use]
    pub const fn with_owner(mut self, owner: UserId) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Points the transaction at an external entity.
    #[must_use]
    pub fn with_reference(mut self, reference_id: Option<Uuid>, reference_type: impl Into<String>) -> Self {
        self.reference_id = reference_id;
        self.reference_type = Some(reference_type.into());
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Per-user balance summary relied on by the rest of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UserBalances {
    /// `usdc_balance`.
    pub usdc: Decimal,
    /// `fiat_exposure`.
    pub fiat_exposure: Decimal,
    /// `pending_investment`.
    pub pending_investment: Decimal,
    /// Sum of the three, at 1 USDC = 1 USD.
    pub total: Decimal,
}

impl UserBalances {
    /// Builds the summary from a user's accounts, ignoring unrelated types.
    #[must_use]
    pub fn from_accounts<'a>(accounts: impl IntoIterator<Item = &'a Account>) -> Self {
        let mut balances = Self::default();
        for account in accounts {
            match account.account_type {
                AccountType::UsdcBalance => balances.usdc = account.balance,
                AccountType::FiatExposure => balances.fiat_exposure = account.balance,
                AccountType::PendingInvestment => balances.pending_investment = account.balance,
                _ => {}
            }
        }
        balances.total = balances.usdc + balances.fiat_exposure + balances.pending_investment;
        balances
    }
}
