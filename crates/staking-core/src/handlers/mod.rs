//! Handlers for the staking workflow steps.
//!
//! Each step of a transaction's life has its own handler: building the
//! unsigned transaction through the upstream API, signing it, and relaying it
//! with retries.

pub mod broadcast;
pub mod request;
pub mod signing;

pub use broadcast::{BroadcastHandler, BroadcastOutcome, RetryPolicy};
pub use request::RequestHandler;
pub use signing::SigningHandler;
