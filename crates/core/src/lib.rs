//! Core business logic for Tally.
//!
//! This crate contains pure business logic with ZERO web or database dependencies.
//! Storage and external systems sit behind traits implemented in `tally-db` and
//! `tally-clients`.
//!
//! # Modules
//!
//! - `ledger` - Double-entry bookkeeping with idempotent postings
//! - `reconciliation` - Audits, reports and the reconciliation scheduler

pub mod ledger;
pub mod reconciliation;
