//! Stake and unstake request handling.
//!
//! Validates client input, asks the upstream API for an unsigned transaction
//! and persists it as a new `created` record. All validation happens before
//! the upstream is contacted.

use crate::state::TransactionStore;
use crate::StakingError;
use chrono::Utc;
use rust_decimal::Decimal;
use staking_types::{truncate_id, Chain, Operation, TransactionRecord};
use staking_upstream::{CreatedTransaction, StakeRequest, UnstakeRequest, UpstreamInterface};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::instrument;

/// Validated fields common to stake and unstake.
struct Intent {
	chain: Chain,
	network: String,
	staker_address: String,
	transaction_id: String,
}

/// Builds unsigned transactions through the upstream API.
pub struct RequestHandler {
	upstream: Arc<dyn UpstreamInterface>,
	store: Arc<TransactionStore>,
	amount_required_for_unstake: Vec<Chain>,
	/// Millisecond stamp of the last generated id.
	last_id_millis: AtomicI64,
}

impl RequestHandler {
	pub fn new(
		upstream: Arc<dyn UpstreamInterface>,
		store: Arc<TransactionStore>,
		amount_required_for_unstake: Vec<Chain>,
	) -> Self {
		Self {
			upstream,
			store,
			amount_required_for_unstake,
			last_id_millis: AtomicI64::new(0),
		}
	}

	/// Creates a stake transaction. The amount is mandatory.
	#[instrument(skip_all, fields(chain = %chain, network = %network))]
	pub async fn build_stake_request(
		&self,
		chain: &str,
		network: &str,
		staker_address: &str,
		amount: Option<&str>,
		transaction_id: Option<&str>,
	) -> Result<TransactionRecord, StakingError> {
		let intent = self.validate(chain, network, staker_address, transaction_id).await?;
		let amount = amount
			.ok_or_else(|| StakingError::InvalidAmount("amount is required for stake".into()))?;
		let parsed = parse_amount(amount)?;

		let request = StakeRequest {
			chain: intent.chain,
			network: intent.network.clone(),
			staker_address: intent.staker_address.clone(),
			amount: parsed,
		};
		let created = self
			.upstream
			.create_stake(&request)
			.await
			.map_err(|e| upstream_failure(&intent, e))?;

		self.persist(intent, Operation::Stake, Some(amount.trim().to_string()), created)
			.await
	}

	/// Creates an unstake transaction.
	///
	/// The amount is required only for chains configured to need one, but a
	/// supplied amount is always validated.
	#[instrument(skip_all, fields(chain = %chain, network = %network))]
	pub async fn build_unstake_request(
		&self,
		chain: &str,
		network: &str,
		staker_address: &str,
		amount: Option<&str>,
		transaction_id: Option<&str>,
	) -> Result<TransactionRecord, StakingError> {
		let intent = self.validate(chain, network, staker_address, transaction_id).await?;
		let parsed = match amount {
			Some(raw) => Some(parse_amount(raw)?),
			None if self.amount_required_for_unstake.contains(&intent.chain) => {
				return Err(StakingError::InvalidAmount(format!(
					"amount is required to unstake on {}",
					intent.chain
				)))
			},
			None => None,
		};

		let request = UnstakeRequest {
			chain: intent.chain,
			network: intent.network.clone(),
			staker_address: intent.staker_address.clone(),
			amount: parsed,
		};
		let created = self
			.upstream
			.create_unstake(&request)
			.await
			.map_err(|e| upstream_failure(&intent, e))?;

		let amount = amount.map(|a| a.trim().to_string());
		self.persist(intent, Operation::Unstake, amount, created).await
	}

	async fn validate(
		&self,
		chain: &str,
		network: &str,
		staker_address: &str,
		transaction_id: Option<&str>,
	) -> Result<Intent, StakingError> {
		let chain = required("chain", chain)?;
		let network = required("network", network)?;
		let staker_address = required("stakerAddress", staker_address)?;
		let chain = Chain::from_str(chain)?;

		let transaction_id = match transaction_id {
			Some(id) => {
				validate_transaction_id(id)?;
				if self.store.exists(id).await? {
					return Err(StakingError::InvalidRequest(format!(
						"transaction {} already exists",
						id
					)));
				}
				id.to_string()
			},
			None => self.generate_transaction_id(chain, network).await?,
		};

		Ok(Intent {
			chain,
			network: network.to_string(),
			staker_address: staker_address.to_string(),
			transaction_id,
		})
	}

	/// A `{chain}-{network}-{epochMillis}` id that was never issued by this
	/// handler and is not in the store. Requests landing in the same
	/// millisecond take the next free stamp.
	async fn generate_transaction_id(
		&self,
		chain: Chain,
		network: &str,
	) -> Result<String, StakingError> {
		loop {
			let id = format_transaction_id(chain, network, self.next_id_millis());
			if !self.store.exists(&id).await? {
				return Ok(id);
			}
		}
	}

	fn next_id_millis(&self) -> i64 {
		let now = Utc::now().timestamp_millis();
		let previous = self
			.last_id_millis
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
				Some(now.max(last + 1))
			})
			.unwrap_or_else(|last| last);
		now.max(previous + 1)
	}

	async fn persist(
		&self,
		intent: Intent,
		operation: Operation,
		amount: Option<String>,
		created: CreatedTransaction,
	) -> Result<TransactionRecord, StakingError> {
		let staker = created
			.staker_address
			.unwrap_or(intent.staker_address);
		let record = TransactionRecord::new(
			intent.transaction_id,
			intent.chain,
			intent.network,
			staker,
			operation,
			created.unsigned_payload,
		)
		.with_amount(amount)
		.with_upstream_response(created.raw);

		let record = self.store.create(record).await?;
		tracing::info!(
			transaction_id = %truncate_id(&record.transaction_id),
			operation = operation.as_str(),
			"Created transaction"
		);
		Ok(record)
	}
}

fn upstream_failure(intent: &Intent, err: staking_upstream::UpstreamError) -> StakingError {
	let err = StakingError::from(err);
	if matches!(err, StakingError::UpstreamContract(_)) {
		tracing::error!(
			transaction_id = %truncate_id(&intent.transaction_id),
			error = %err,
			"Upstream response violated contract"
		);
	} else {
		tracing::warn!(
			transaction_id = %truncate_id(&intent.transaction_id),
			error = %err,
			"Upstream request failed"
		);
	}
	err
}

fn required<'a>(field: &str, value: &'a str) -> Result<&'a str, StakingError> {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return Err(StakingError::InvalidRequest(format!("{} is required", field)));
	}
	Ok(trimmed)
}

/// Parses a strictly positive decimal amount.
pub fn parse_amount(raw: &str) -> Result<Decimal, StakingError> {
	let trimmed = raw.trim();
	if trimmed.is_empty() {
		return Err(StakingError::InvalidAmount("amount must not be empty".into()));
	}
	let amount = Decimal::from_str(trimmed)
		.map_err(|_| StakingError::InvalidAmount(format!("'{}' is not a decimal number", raw)))?;
	if amount <= Decimal::ZERO {
		return Err(StakingError::InvalidAmount(format!(
			"amount must be positive, got {}",
			trimmed
		)));
	}
	Ok(amount)
}

/// Client-supplied ids become storage keys, so only a conservative
/// character set is accepted.
pub fn validate_transaction_id(id: &str) -> Result<(), StakingError> {
	let valid = !id.is_empty()
		&& id
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
	if !valid {
		return Err(StakingError::InvalidRequest(format!(
			"transactionId '{}' may only contain letters, digits, '-', '_' and '.'",
			id
		)));
	}
	Ok(())
}

fn format_transaction_id(chain: Chain, network: &str, millis: i64) -> String {
	format!("{}-{}-{}", chain, network, millis)
}
