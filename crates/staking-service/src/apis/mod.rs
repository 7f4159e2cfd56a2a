//! Request processing behind the HTTP handlers.

pub mod staking;
pub mod transactions;
