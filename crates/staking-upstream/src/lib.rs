//! Client for the Unified Staking API.
//!
//! The upstream API builds unsigned stake/unstake transactions and relays
//! signed ones to the network. This crate owns every detail of its wire
//! format: request bodies, authentication and the several shapes its
//! responses come in. Callers only ever see the normalized
//! [`CreatedTransaction`] and [`BroadcastReceipt`].

use async_trait::async_trait;
use rust_decimal::Decimal;
use staking_config::UpstreamConfig;
use staking_types::{Chain, ImplementationRegistry, UnsignedPayload};
use thiserror::Error;

pub mod implementations {
	pub mod http;
}
pub mod normalize;

/// Errors returned by the upstream API client.
#[derive(Debug, Error)]
pub enum UpstreamError {
	/// No HTTP response was received (refused, reset, timed out).
	#[error("Connection error: {0}")]
	Connection(String),
	/// The upstream answered with a non-success status.
	#[error("Upstream returned HTTP {status}: {body}")]
	Http { status: u16, body: String },
	/// The response lacked a field the gateway depends on.
	#[error("Upstream contract violation: {0}")]
	Contract(String),
	/// The client could not be configured.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Parameters for creating an unsigned stake transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeRequest {
	pub chain: Chain,
	pub network: String,
	pub staker_address: String,
	pub amount: Decimal,
}

/// Parameters for creating an unsigned unstake transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct UnstakeRequest {
	pub chain: Chain,
	pub network: String,
	pub staker_address: String,
	pub amount: Option<Decimal>,
}

/// A signed transaction to relay.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastRequest {
	pub chain: Chain,
	pub network: String,
	pub staker_address: String,
	pub signed_transaction: String,
}

/// Normalized answer to a stake or unstake call.
#[derive(Debug, Clone)]
pub struct CreatedTransaction {
	/// Chain-specific payload, byte-for-byte as the upstream sent it.
	pub unsigned_payload: UnsignedPayload,
	/// Staker address echoed by the upstream, if any.
	pub staker_address: Option<String>,
	/// The complete response body.
	pub raw: serde_json::Value,
}

/// Normalized answer to a broadcast call.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastReceipt {
	pub transaction_hash: Option<String>,
	/// Upstream status, `pending` when the response carries none.
	pub status: String,
	/// The complete response body.
	pub raw: serde_json::Value,
}

/// Interface to the Unified Staking API.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait UpstreamInterface: Send + Sync {
	/// Asks the upstream to build an unsigned stake transaction.
	async fn create_stake(&self, request: &StakeRequest)
		-> Result<CreatedTransaction, UpstreamError>;

	/// Asks the upstream to build an unsigned unstake transaction.
	async fn create_unstake(
		&self,
		request: &UnstakeRequest,
	) -> Result<CreatedTransaction, UpstreamError>;

	/// Submits a signed transaction. Makes exactly one HTTP request; retrying
	/// is the caller's decision.
	async fn broadcast(&self, request: &BroadcastRequest)
		-> Result<BroadcastReceipt, UpstreamError>;
}

/// Type alias for upstream client factory functions.
pub type UpstreamFactory = fn(&UpstreamConfig) -> Result<Box<dyn UpstreamInterface>, UpstreamError>;

/// Registry trait for upstream client implementations.
pub trait UpstreamRegistry: ImplementationRegistry<Factory = UpstreamFactory> {}

/// Get all registered upstream client implementations.
pub fn get_all_implementations() -> Vec<(&'static str, UpstreamFactory)> {
	use implementations::http;

	vec![(http::Registry::NAME, http::Registry::factory())]
}
