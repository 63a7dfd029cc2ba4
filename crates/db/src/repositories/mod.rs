//! Repository implementations of the core storage seams.
//!
//! Repositories hide the `SeaORM` details from the ledger engine and the
//! reconciliation service.

pub mod funding;
pub mod ledger;
pub mod reconciliation;

pub use funding::FundingRepository;
pub use ledger::LedgerRepository;
pub use reconciliation::ReportRepository;
