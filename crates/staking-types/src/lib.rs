//! Common types for the staking gateway.
//!
//! This crate defines the data types shared by every gateway component:
//! supported chains, the persisted transaction record and its lifecycle
//! states, signer credentials, API request/response shapes, and the
//! configuration validation framework used by pluggable implementations.

/// API types for HTTP endpoints and request/response structures.
pub mod api;
/// Supported chains and their signer families.
pub mod chain;
/// Per-chain signer credential bundles.
pub mod credentials;
/// Block explorer URL derivation.
pub mod explorer;
/// Self-registering implementation trait.
pub mod registry;
/// Zeroizing wrapper for secrets.
pub mod secret_string;
/// Storage key types.
pub mod storage;
/// Transaction record, lifecycle state and patch types.
pub mod transaction;
/// Formatting helpers.
pub mod utils;
/// Configuration validation types for ensuring type-safe configurations.
pub mod validation;

pub use api::*;
pub use chain::{Chain, SignerKind, UnsupportedChain};
pub use credentials::CredentialBundle;
pub use explorer::explorer_url;
pub use registry::ImplementationRegistry;
pub use secret_string::SecretString;
pub use storage::StorageKey;
pub use transaction::*;
pub use utils::{truncate_id, with_0x_prefix, without_0x_prefix};
pub use validation::*;
