//! Core staking engine for the transaction gateway.
//!
//! This crate ties the gateway components together: it builds unsigned
//! stake/unstake transactions through the upstream API, signs them with the
//! chain's signer, relays them with a bounded retry policy and records every
//! step in the transaction lifecycle store.

pub mod builder;
pub mod engine;
pub mod handlers;
pub mod state;

pub use builder::{BuilderError, StakingBuilder, StakingFactories};
pub use engine::StakingEngine;
pub use handlers::{BroadcastOutcome, RetryPolicy};
pub use state::{TransactionStateError, TransactionStore};

use staking_signer::SignerError;
use staking_types::{APIError, FailureReason, UnsupportedChain};
use staking_upstream::UpstreamError;
use thiserror::Error;

/// Every error a staking operation can end in.
///
/// [`StakingError::kind`] gives the stable name clients see.
#[derive(Debug, Error)]
pub enum StakingError {
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("Invalid amount: {0}")]
	InvalidAmount(String),
	#[error("Upstream response missing expected data: {0}")]
	UpstreamContract(String),
	#[error("Unsupported chain: {0}")]
	UnsupportedChain(String),
	#[error("Invalid credentials: {0}")]
	InvalidCredentials(String),
	#[error("Invalid payload: {0}")]
	InvalidPayload(String),
	#[error("Signing failed: {0}")]
	Signing(String),
	#[error("Connection error: {0}")]
	Connection(String),
	#[error("Upstream returned HTTP {status}: {body}")]
	UpstreamHttp { status: u16, body: String },
	#[error("Broadcast failed after {attempts} attempts")]
	BroadcastExhausted {
		attempts: u32,
		last_status: Option<u16>,
		last_body: String,
	},
	#[error("Transaction not found: {0}")]
	NotFound(String),
	#[error("Invalid transition: {0}")]
	InvalidTransition(String),
	#[error("Storage error: {0}")]
	Storage(String),
}

impl StakingError {
	/// Stable error kind exposed to API clients and recorded on failed
	/// transactions.
	pub fn kind(&self) -> &'static str {
		match self {
			StakingError::InvalidRequest(_) => "InvalidRequestError",
			StakingError::InvalidAmount(_) => "InvalidAmountError",
			StakingError::UpstreamContract(_) => "UpstreamContractError",
			StakingError::UnsupportedChain(_) => "UnsupportedChainError",
			StakingError::InvalidCredentials(_) => "InvalidCredentialsError",
			StakingError::InvalidPayload(_) => "InvalidPayloadError",
			StakingError::Signing(_) => "SigningError",
			StakingError::Connection(_) => "ConnectionError",
			StakingError::UpstreamHttp { .. } => "UpstreamHttpError",
			StakingError::BroadcastExhausted { .. } => "BroadcastExhaustedError",
			StakingError::NotFound(_) => "NotFoundError",
			StakingError::InvalidTransition(_) => "InvalidTransitionError",
			StakingError::Storage(_) => "StorageError",
		}
	}

	/// Client input errors: never retried and surfaced to the caller as-is.
	/// An invalid amount is the invalid-request kind specific to amounts.
	pub fn is_invalid_request(&self) -> bool {
		matches!(
			self,
			StakingError::InvalidRequest(_) | StakingError::InvalidAmount(_)
		)
	}

	/// The reason recorded on a record this error moved to `failed`.
	pub fn failure_reason(&self) -> FailureReason {
		FailureReason::new(self.kind(), self.to_string())
	}
}

impl From<SignerError> for StakingError {
	fn from(err: SignerError) -> Self {
		match err {
			SignerError::InvalidRequest(msg) => StakingError::InvalidRequest(msg),
			SignerError::UnsupportedChain(msg) => StakingError::UnsupportedChain(msg),
			SignerError::InvalidCredentials(msg) => StakingError::InvalidCredentials(msg),
			SignerError::InvalidPayload(msg) => StakingError::InvalidPayload(msg),
			SignerError::Connection(msg) => StakingError::Connection(msg),
			SignerError::Signing(msg) => StakingError::Signing(msg),
		}
	}
}

impl From<UpstreamError> for StakingError {
	fn from(err: UpstreamError) -> Self {
		match err {
			UpstreamError::Connection(msg) => StakingError::Connection(msg),
			UpstreamError::Http { status, body } => StakingError::UpstreamHttp { status, body },
			UpstreamError::Contract(msg) => StakingError::UpstreamContract(msg),
			UpstreamError::Configuration(msg) => StakingError::Connection(msg),
		}
	}
}

impl From<TransactionStateError> for StakingError {
	fn from(err: TransactionStateError) -> Self {
		match err {
			TransactionStateError::NotFound(id) => StakingError::NotFound(id),
			TransactionStateError::InvalidTransition { .. }
			| TransactionStateError::AlreadySigned(_) => {
				StakingError::InvalidTransition(err.to_string())
			},
			TransactionStateError::AlreadyExists(_) | TransactionStateError::InvalidRecord(_) => {
				StakingError::InvalidRequest(err.to_string())
			},
			TransactionStateError::Storage(msg) => StakingError::Storage(msg),
		}
	}
}

impl From<UnsupportedChain> for StakingError {
	fn from(err: UnsupportedChain) -> Self {
		StakingError::UnsupportedChain(err.0)
	}
}

impl From<StakingError> for APIError {
	fn from(err: StakingError) -> Self {
		let kind = err.kind().to_string();
		let message = err.to_string();
		match err {
			StakingError::InvalidRequest(_)
			| StakingError::InvalidAmount(_)
			| StakingError::UnsupportedChain(_)
			| StakingError::InvalidPayload(_) => APIError::BadRequest {
				kind,
				message,
				detail: None,
			},
			StakingError::NotFound(_) => APIError::NotFound { kind, message },
			StakingError::InvalidTransition(_) => APIError::Conflict { kind, message },
			StakingError::UpstreamHttp { status, body } => APIError::BadGateway {
				kind,
				message,
				detail: Some(serde_json::json!({ "status": status, "body": body })),
			},
			StakingError::BroadcastExhausted {
				attempts,
				last_status,
				last_body,
			} => APIError::BadGateway {
				kind,
				message,
				detail: Some(serde_json::json!({
					"attempts": attempts,
					"lastStatus": last_status,
					"lastBody": last_body,
				})),
			},
			StakingError::UpstreamContract(_) | StakingError::Connection(_) => {
				APIError::BadGateway {
					kind,
					message,
					detail: None,
				}
			},
			StakingError::InvalidCredentials(_)
			| StakingError::Signing(_)
			| StakingError::Storage(_) => APIError::InternalServerError { kind, message },
		}
	}
}
