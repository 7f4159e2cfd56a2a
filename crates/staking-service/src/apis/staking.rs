//! Staking API implementation.
//!
//! Maps client requests onto engine operations and engine results onto the
//! response bodies clients see.

use staking_core::{StakingEngine, StakingError};
use staking_types::{
	truncate_id, BroadcastTransactionRequest, BroadcastTransactionResponse, CreateStakeRequest,
	CreateTransactionResponse, CreateUnstakeRequest, SignTransactionRequest,
	SignTransactionResponse,
};
use tracing::info;

pub async fn create_stake(
	engine: &StakingEngine,
	request: &CreateStakeRequest,
) -> Result<CreateTransactionResponse, StakingError> {
	let record = engine.stake(request).await?;
	info!(
		transaction_id = %truncate_id(&record.transaction_id),
		chain = %record.chain,
		network = %record.network,
		"Created stake transaction"
	);
	Ok(CreateTransactionResponse {
		success: true,
		transaction_id: record.transaction_id,
		chain: record.chain.to_string(),
		network: record.network,
		amount: record.amount,
	})
}

/// Unstake responses never echo an amount; it may be absent on the request.
pub async fn create_unstake(
	engine: &StakingEngine,
	request: &CreateUnstakeRequest,
) -> Result<CreateTransactionResponse, StakingError> {
	let record = engine.unstake(request).await?;
	info!(
		transaction_id = %truncate_id(&record.transaction_id),
		chain = %record.chain,
		network = %record.network,
		"Created unstake transaction"
	);
	Ok(CreateTransactionResponse {
		success: true,
		transaction_id: record.transaction_id,
		chain: record.chain.to_string(),
		network: record.network,
		amount: None,
	})
}

pub async fn sign(
	engine: &StakingEngine,
	request: &SignTransactionRequest,
) -> Result<SignTransactionResponse, StakingError> {
	let signed_transaction = engine.sign(request).await?;
	Ok(SignTransactionResponse {
		success: true,
		transaction_id: request.transaction_id.clone(),
		signed_transaction,
	})
}

pub async fn broadcast(
	engine: &StakingEngine,
	request: &BroadcastTransactionRequest,
) -> Result<BroadcastTransactionResponse, StakingError> {
	let outcome = engine.broadcast(&request.transaction_id).await?;
	Ok(BroadcastTransactionResponse {
		success: true,
		transaction_id: outcome.transaction_id,
		transaction_hash: outcome.transaction_hash,
		status: outcome.status,
		explorer_url: outcome.explorer_url,
	})
}
