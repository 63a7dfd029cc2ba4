//! Balance arithmetic.
//!
//! The ledger uses a single-sided convention: a debit increases the account's
//! balance and a credit decreases it, whatever the account type.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use tally_shared::types::AccountId;

use super::types::{Entry, EntryDirection};

/// Balance delta of one entry.
#[must_use]
pub fn signed_amount(direction: EntryDirection, amount: Decimal) -> Decimal {
    match direction {
        EntryDirection::Debit => amount,
        EntryDirection::Credit => -amount,
    }
}

/// Net balance change per account for a set of entries.
#[must_use]
pub fn balance_deltas<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> BTreeMap<AccountId, Decimal> {
    let mut deltas = BTreeMap::new();
    for entry in entries {
        *deltas.entry(entry.account_id).or_insert(Decimal::ZERO) += entry.signed_amount();
    }
    deltas
}

/// Sum of debit amounts and sum of credit amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DebitCreditTotals {
    /// Sum of all debit amounts.
    pub debits: Decimal,
    /// Sum of all credit amounts.
    pub credits: Decimal,
}

impl DebitCreditTotals {
    /// Accumulates totals over entries.
    #[must_use]
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        let mut totals = Self::default();
        for entry in entries {
            match entry.direction {
                EntryDirection::Debit => totals.debits += entry.amount,
                EntryDirection::Credit => totals.credits += entry.amount,
            }
        }
        totals
    }

    /// `credits - debits`, zero for a consistent ledger.
    #[must_use]
    pub fn difference(&self) -> Decimal {
        self.credits - self.debits
    }

    /// Returns true if debits equal credits.
    #[must_use]
    pub fn is_balanced(&self) -> bool {
        self.debits == self.credits
    }
}
