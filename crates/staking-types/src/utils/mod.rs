//! Small string helpers shared across crates.

pub mod formatting;

pub use formatting::{truncate_id, with_0x_prefix, without_0x_prefix};
