//! `SeaORM` entity definitions.
//!
//! Enumerated columns are stored as their snake_case names and converted to the
//! core types in the repositories.

pub mod ledger_accounts;
pub mod ledger_entries;
pub mod ledger_transactions;
pub mod reconciliation_checks;
pub mod reconciliation_exceptions;
pub mod reconciliation_reports;
