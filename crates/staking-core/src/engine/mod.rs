//! Staking engine facade.
//!
//! The StakingEngine owns the lifecycle store and the workflow handlers and
//! exposes one method per client operation. Every call is an independent
//! unit of work; the engine runs no background tasks.

use crate::handlers::{BroadcastHandler, BroadcastOutcome, RequestHandler, RetryPolicy, SigningHandler};
use crate::state::TransactionStore;
use crate::StakingError;
use staking_config::Config;
use staking_signer::SignerDispatcher;
use staking_storage::StorageService;
use staking_types::{
	CreateStakeRequest, CreateUnstakeRequest, SignTransactionRequest, TransactionRecord,
};
use staking_upstream::UpstreamInterface;
use std::sync::Arc;

/// Entry point for stake, unstake, sign and broadcast operations.
#[derive(Clone)]
pub struct StakingEngine {
	config: Config,
	store: Arc<TransactionStore>,
	request_handler: Arc<RequestHandler>,
	signing_handler: Arc<SigningHandler>,
	broadcast_handler: Arc<BroadcastHandler>,
}

impl StakingEngine {
	pub fn new(
		config: Config,
		storage: Arc<StorageService>,
		upstream: Arc<dyn UpstreamInterface>,
		signer: Arc<dyn SignerDispatcher>,
	) -> Self {
		let store = Arc::new(TransactionStore::new(storage));

		let request_handler = Arc::new(RequestHandler::new(
			upstream.clone(),
			store.clone(),
			config.chains.amount_required_for_unstake.clone(),
		));
		let signing_handler = Arc::new(SigningHandler::new(signer, store.clone()));
		let broadcast_handler = Arc::new(BroadcastHandler::new(
			upstream,
			store.clone(),
			RetryPolicy::from_config(&config.broadcast),
		));

		Self {
			config,
			store,
			request_handler,
			signing_handler,
			broadcast_handler,
		}
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub async fn stake(&self, request: &CreateStakeRequest) -> Result<TransactionRecord, StakingError> {
		self.request_handler
			.build_stake_request(
				&request.chain,
				&request.network,
				&request.staker_address,
				request.amount.as_deref(),
				request.transaction_id.as_deref(),
			)
			.await
	}

	pub async fn unstake(
		&self,
		request: &CreateUnstakeRequest,
	) -> Result<TransactionRecord, StakingError> {
		self.request_handler
			.build_unstake_request(
				&request.chain,
				&request.network,
				&request.staker_address,
				request.amount.as_deref(),
				request.transaction_id.as_deref(),
			)
			.await
	}

	pub async fn sign(&self, request: &SignTransactionRequest) -> Result<String, StakingError> {
		self.signing_handler
			.sign(
				&request.transaction_id,
				request.chain.as_deref(),
				request.network.as_deref(),
			)
			.await
	}

	pub async fn broadcast(&self, transaction_id: &str) -> Result<BroadcastOutcome, StakingError> {
		self.broadcast_handler.broadcast(transaction_id).await
	}

	/// Returns the stored record for `transaction_id`.
	pub async fn transaction(&self, transaction_id: &str) -> Result<TransactionRecord, StakingError> {
		Ok(self.store.read(transaction_id).await?)
	}
}
