//! Signing workflow.
//!
//! Connects the signer dispatcher to the lifecycle store: the record is
//! locked for the whole sign-and-record sequence, so concurrent sign calls
//! for one transaction produce a single signature.

use crate::state::TransactionStore;
use crate::StakingError;
use chrono::Utc;
use staking_signer::{SignerDispatcher, SignerError};
use staking_types::{truncate_id, Chain, TransactionPatch, TransactionState};
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

/// Signs stored transactions.
pub struct SigningHandler {
	signer: Arc<dyn SignerDispatcher>,
	store: Arc<TransactionStore>,
}

impl SigningHandler {
	pub fn new(signer: Arc<dyn SignerDispatcher>, store: Arc<TransactionStore>) -> Self {
		Self { signer, store }
	}

	/// Signs the transaction and records the result.
	///
	/// An already signed transaction returns its stored signature without
	/// touching the signer. `chain`, when given, must match the record;
	/// `network` overrides the record's network.
	#[instrument(skip_all, fields(transaction_id = %truncate_id(transaction_id)))]
	pub async fn sign(
		&self,
		transaction_id: &str,
		chain: Option<&str>,
		network: Option<&str>,
	) -> Result<String, StakingError> {
		if transaction_id.trim().is_empty() {
			return Err(StakingError::InvalidRequest("transactionId is required".into()));
		}

		let guard = self.store.lock(transaction_id).await;
		let record = guard.read().await?;

		if let Some(signed) = &record.signed_payload {
			tracing::info!("Transaction already signed");
			return Ok(signed.clone());
		}

		if let Some(requested) = chain.filter(|c| !c.trim().is_empty()) {
			let requested = Chain::from_str(requested)?;
			if requested != record.chain {
				return Err(StakingError::InvalidRequest(format!(
					"transaction is for {}, not {}",
					record.chain, requested
				)));
			}
		}

		if record.state != TransactionState::Created {
			return Err(StakingError::InvalidTransition(format!(
				"cannot sign a {} transaction",
				record.state
			)));
		}
		let payload = record.unsigned_payload.as_ref().ok_or_else(|| {
			StakingError::InvalidRequest("transaction has no unsigned payload".into())
		})?;

		let network = [network, Some(record.network.as_str())]
			.into_iter()
			.flatten()
			.map(str::trim)
			.find(|n| !n.is_empty())
			.unwrap_or_else(|| record.chain.default_network());

		match self.signer.sign(record.chain, network, payload).await {
			Ok(signed) => {
				guard
					.update(TransactionPatch {
						state: Some(TransactionState::Signed),
						signed_payload: Some(signed.clone()),
						signed_at: Some(Utc::now()),
						..Default::default()
					})
					.await?;
				tracing::info!(
					chain = %record.chain,
					network = %network,
					signed = %truncate_id(&signed),
					"Signed transaction"
				);
				Ok(signed)
			},
			Err(err) => {
				let records_failure = matches!(
					err,
					SignerError::InvalidPayload(_)
						| SignerError::InvalidCredentials(_)
						| SignerError::Signing(_)
				);
				let err = StakingError::from(err);
				tracing::warn!(chain = %record.chain, network = %network, error = %err, "Signing failed");
				if records_failure {
					guard
						.update(TransactionPatch::failed(err.failure_reason()))
						.await?;
				}
				Err(err)
			},
		}
	}
}
