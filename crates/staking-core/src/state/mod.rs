//! State management for transaction records.
//!
//! The [`TransactionStore`] is the only writer of transaction records; every
//! handler goes through it so lifecycle rules hold regardless of caller.

pub mod transaction;

pub use transaction::{RecordGuard, TransactionStateError, TransactionStore};
