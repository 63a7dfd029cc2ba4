//! Business rule validation for posting requests.

use tally_shared::config::BalancingPolicy;

use super::error::LedgerError;
use super::types::{
    Account, EntryDirection, EntryRequest, PostTransactionRequest, TransactionWithEntries,
};

/// Number of entries every transaction carries.
pub const ENTRIES_PER_TRANSACTION: usize = 2;

/// Most decimal places an amount may carry. Matches the `NUMERIC(36,18)` columns, so a
/// stored amount always compares equal to the request that produced it.
pub const MAX_AMOUNT_SCALE: u32 = 18;

/// Validates the structure of a request without looking at accounts.
///
/// Returns the `(debit, credit)` pair on success.
///
/// # Errors
///
/// Returns a validation error if the key is blank, there are not exactly two entries,
/// an amount is not positive or has more than `MAX_AMOUNT_SCALE` decimal places, both
/// entries sit on the same side, or both target the same account.
pub fn validate_shape(
    request: &PostTransactionRequest,
) -> Result<(&EntryRequest, &EntryRequest), LedgerError> {
    if request.idempotency_key.trim().is_empty() {
        return Err(LedgerError::MissingIdempotencyKey);
    }

    let [first, second] = request.entries.as_slice() else {
        return Err(LedgerError::InvalidEntryCount(request.entries.len()));
    };

    for entry in [first, second] {
        if entry.amount.is_sign_negative() || entry.amount.is_zero() {
            return Err(LedgerError::NonPositiveAmount(entry.amount));
        }
        if entry.amount.normalize().scale() > MAX_AMOUNT_SCALE {
            return Err(LedgerError::ExcessiveScale {
                amount: entry.amount,
                max_scale: MAX_AMOUNT_SCALE,
            });
        }
    }

    let (debit, credit) = match (first.direction, second.direction) {
        (EntryDirection::Debit, EntryDirection::Credit) => (first, second),
        (EntryDirection::Credit, EntryDirection::Debit) => (second, first),
        _ => return Err(LedgerError::SingleSided),
    };

    if debit.account_id == credit.account_id {
        return Err(LedgerError::SameAccount(debit.account_id));
    }

    Ok((debit, credit))
}

/// Validates entries against their resolved accounts and the balancing policy.
///
/// # Errors
///
/// Returns `CurrencyMismatch` if an entry is not in its account's currency and
/// `UnbalancedTransaction` if the amounts violate `policy`.
pub fn validate_against_accounts(
    debit: (&EntryRequest, &Account),
    credit: (&EntryRequest, &Account),
    policy: BalancingPolicy,
) -> Result<(), LedgerError> {
    for (entry, account) in [debit, credit] {
        if entry.currency != account.currency {
            return Err(LedgerError::CurrencyMismatch {
                account_id: account.id,
                account: account.currency,
                entry: entry.currency,
            });
        }
    }

    let (debit, credit) = (debit.0, credit.0);
    let amounts_must_match = match policy {
        BalancingPolicy::RequireEqualAmounts => true,
        BalancingPolicy::LinkedPair => debit.currency == credit.currency,
    };

    if amounts_must_match && debit.amount != credit.amount {
        return Err(LedgerError::UnbalancedTransaction {
            debit: debit.amount,
            credit: credit.amount,
        });
    }

    Ok(())
}

/// Returns true if a stored transaction records exactly what `request` asks for.
///
/// Entries are compared as an unordered set of `(account, direction, amount, currency)`,
/// so a retry that lists the two entries in the other order is still a replay.
/// Descriptions and metadata are not compared.
#[must_use]
pub fn is_same_posting(existing: &TransactionWithEntries, request: &PostTransactionRequest) -> bool {
    let header = &existing.transaction;
    if header.transaction_type != request.transaction_type || header.owner != request.owner {
        return false;
    }
    if existing.entries.len() != request.entries.len() {
        return false;
    }

    let mut stored: Vec<_> = existing
        .entries
        .iter()
        .map(|e| (e.account_id, e.direction, e.amount, e.currency))
        .collect();
    let mut requested: Vec<_> = request
        .entries
        .iter()
        .map(|e| (e.account_id, e.direction, e.amount, e.currency))
        .collect();
    stored.sort();
    requested.sort();
    stored == requested
}
