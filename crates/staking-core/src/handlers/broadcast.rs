//! Broadcast coordination.
//!
//! Relays signed transactions through the upstream API. Upstream timeouts
//! and dropped connections are retried with exponential backoff; every other
//! failure is final. The outcome, successful or not, is written to the
//! transaction record.

use crate::state::TransactionStore;
use crate::StakingError;
use chrono::Utc;
use staking_config::BroadcastConfig;
use staking_types::{explorer_url, truncate_id, TransactionPatch, TransactionRecord, TransactionState};
use staking_upstream::{BroadcastReceipt, BroadcastRequest, UpstreamError, UpstreamInterface};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, Instrument};

/// When and how often a broadcast is retried.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
	/// Retries after the first attempt.
	pub max_retries: u32,
	/// Delay before the first retry; doubles for each retry after it.
	pub initial_delay: Duration,
	/// Case-insensitive marker of an upstream timeout in an HTTP 500 body.
	pub timeout_indicator: String,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self::from_config(&BroadcastConfig::default())
	}
}

impl RetryPolicy {
	pub fn from_config(config: &BroadcastConfig) -> Self {
		Self {
			max_retries: config.max_retries,
			initial_delay: Duration::from_millis(config.initial_delay_ms),
			timeout_indicator: config.timeout_indicator.clone(),
		}
	}

	/// Delay before retry number `retry` (zero-based).
	pub fn delay_for(&self, retry: u32) -> Duration {
		self.initial_delay.saturating_mul(2u32.saturating_pow(retry))
	}

	/// Only upstream timeouts and connection failures are transient.
	pub fn is_retryable(&self, err: &UpstreamError) -> bool {
		match err {
			UpstreamError::Connection(_) => true,
			UpstreamError::Http { status: 500, body } => body
				.to_lowercase()
				.contains(&self.timeout_indicator.to_lowercase()),
			_ => false,
		}
	}
}

/// Hash, status and explorer link of a relayed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct BroadcastOutcome {
	pub transaction_id: String,
	pub transaction_hash: Option<String>,
	pub status: String,
	pub explorer_url: Option<String>,
	pub attempts: u32,
}

impl BroadcastOutcome {
	fn from_record(record: &TransactionRecord) -> Self {
		Self {
			transaction_id: record.transaction_id.clone(),
			transaction_hash: record.transaction_hash.clone(),
			status: record.status.clone().unwrap_or_default(),
			explorer_url: record.explorer_url.clone(),
			attempts: record.broadcast_attempts,
		}
	}
}

/// Relays signed transactions.
pub struct BroadcastHandler {
	upstream: Arc<dyn UpstreamInterface>,
	store: Arc<TransactionStore>,
	policy: RetryPolicy,
}

impl BroadcastHandler {
	pub fn new(
		upstream: Arc<dyn UpstreamInterface>,
		store: Arc<TransactionStore>,
		policy: RetryPolicy,
	) -> Self {
		Self {
			upstream,
			store,
			policy,
		}
	}

	/// Broadcasts a signed transaction.
	///
	/// A transaction that was already broadcast returns its stored outcome
	/// without contacting the upstream. The relay runs on its own task, so a
	/// caller that stops waiting never leaves the record in `Broadcasting`.
	#[instrument(skip_all, fields(transaction_id = %truncate_id(transaction_id)))]
	pub async fn broadcast(&self, transaction_id: &str) -> Result<BroadcastOutcome, StakingError> {
		if transaction_id.trim().is_empty() {
			return Err(StakingError::InvalidRequest("transactionId is required".into()));
		}

		let job = BroadcastJob {
			upstream: self.upstream.clone(),
			store: self.store.clone(),
			policy: self.policy.clone(),
		};
		let id = transaction_id.to_string();
		tokio::spawn(async move { job.run(&id).await }.in_current_span())
			.await
			.map_err(|e| StakingError::Storage(format!("broadcast task failed: {}", e)))?
	}
}

/// One relay of one transaction, owned by the task that performs it.
struct BroadcastJob {
	upstream: Arc<dyn UpstreamInterface>,
	store: Arc<TransactionStore>,
	policy: RetryPolicy,
}

impl BroadcastJob {
	async fn run(&self, transaction_id: &str) -> Result<BroadcastOutcome, StakingError> {
		let guard = self.store.lock(transaction_id).await;
		let record = guard.read().await?;

		match record.state {
			TransactionState::Broadcast => {
				tracing::info!("Transaction already broadcast");
				return Ok(BroadcastOutcome::from_record(&record));
			},
			TransactionState::Signed => {},
			other => {
				return Err(StakingError::InvalidTransition(format!(
					"cannot broadcast a {} transaction",
					other
				)))
			},
		}
		let signed = record.signed_payload.clone().ok_or_else(|| {
			StakingError::InvalidTransition("transaction has no signed payload".into())
		})?;

		guard
			.update(TransactionPatch::state(TransactionState::Broadcasting))
			.await?;

		let request = BroadcastRequest {
			chain: record.chain,
			network: record.network.clone(),
			staker_address: record.staker_address.clone(),
			signed_transaction: signed,
		};
		let (result, attempts) = self.send_with_retry(&request).await;

		match result {
			Ok(receipt) => {
				let explorer = receipt
					.transaction_hash
					.as_deref()
					.and_then(|hash| explorer_url(record.chain, &record.network, hash));
				let updated = guard
					.update(TransactionPatch {
						state: Some(TransactionState::Broadcast),
						broadcast_result: Some(receipt.raw),
						transaction_hash: receipt.transaction_hash,
						status: Some(receipt.status),
						explorer_url: explorer,
						broadcast_attempts: Some(attempts),
						broadcasted_at: Some(Utc::now()),
						..Default::default()
					})
					.await?;
				tracing::info!(
					attempts,
					hash = updated.transaction_hash.as_deref().unwrap_or("-"),
					status = updated.status.as_deref().unwrap_or("-"),
					"Broadcast transaction"
				);
				Ok(BroadcastOutcome::from_record(&updated))
			},
			Err(err) => {
				tracing::error!(attempts, kind = err.kind(), error = %err, "Broadcast failed");
				guard
					.update(TransactionPatch {
						broadcast_result: failure_body(&err),
						status: Some("failed".to_string()),
						broadcast_attempts: Some(attempts),
						broadcasted_at: Some(Utc::now()),
						..TransactionPatch::failed(err.failure_reason())
					})
					.await?;
				Err(err)
			},
		}
	}

	/// Sends the request until it succeeds, fails permanently or the retry
	/// budget is spent. Returns the result and the number of attempts made.
	async fn send_with_retry(
		&self,
		request: &BroadcastRequest,
	) -> (Result<BroadcastReceipt, StakingError>, u32) {
		let mut attempt = 0;
		loop {
			attempt += 1;
			let err = match self.upstream.broadcast(request).await {
				Ok(receipt) => return (Ok(receipt), attempt),
				Err(err) => err,
			};

			if !self.policy.is_retryable(&err) {
				return (Err(err.into()), attempt);
			}
			if attempt > self.policy.max_retries {
				let (last_status, last_body) = match err {
					UpstreamError::Http { status, body } => (Some(status), body),
					other => (None, other.to_string()),
				};
				return (
					Err(StakingError::BroadcastExhausted {
						attempts: attempt,
						last_status,
						last_body,
					}),
					attempt,
				);
			}

			let delay = self.policy.delay_for(attempt - 1);
			tracing::warn!(
				attempt,
				delay_ms = delay.as_millis() as u64,
				error = %err,
				"Broadcast attempt failed, retrying"
			);
			tokio::time::sleep(delay).await;
		}
	}
}

/// The upstream body to keep on a failed record, parsed when it is JSON.
fn failure_body(err: &StakingError) -> Option<serde_json::Value> {
	let body = match err {
		StakingError::UpstreamHttp { body, .. } => body,
		StakingError::BroadcastExhausted { last_body, .. } => last_body,
		_ => return None,
	};
	Some(
		serde_json::from_str(body).unwrap_or_else(|_| serde_json::Value::String(body.clone())),
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use staking_storage::{implementations::memory::MemoryStorage, StorageService};
	use staking_types::{Chain, Operation, UnsignedPayload};
	use staking_upstream::{normalize::parse_receipt, MockUpstreamInterface};
	use std::sync::atomic::{AtomicU32, Ordering};

	const TIMEOUT: &str = r#"{"error":"Upstream Timeout while relaying"}"#;

	async fn signed_store(state: TransactionState) -> Arc<TransactionStore> {
		let store = Arc::new(TransactionStore::new(Arc::new(StorageService::new(
			Box::new(MemoryStorage::new()),
		))));
		store
			.create(TransactionRecord::new(
				"dot-1",
				Chain::Polkadot,
				"westend",
				"5Grw",
				Operation::Stake,
				UnsignedPayload::from_json(r#""0x0400""#).unwrap(),
			))
			.await
			.unwrap();
		if state != TransactionState::Created {
			store
				.update(
					"dot-1",
					TransactionPatch {
						state: Some(TransactionState::Signed),
						signed_payload: Some("0xsigned".into()),
						..Default::default()
					},
				)
				.await
				.unwrap();
		}
		store
	}

	fn receipt(body: &str) -> BroadcastReceipt {
		parse_receipt(body).unwrap()
	}

	fn timeouts_then_success(timeouts: u32, upstream: &mut MockUpstreamInterface) {
		let calls = Arc::new(AtomicU32::new(0));
		upstream
			.expect_broadcast()
			.withf(|req| req.signed_transaction == "0xsigned" && req.network == "westend")
			.returning(move |_| {
				if calls.fetch_add(1, Ordering::SeqCst) < timeouts {
					Err(UpstreamError::Http {
						status: 500,
						body: TIMEOUT.to_string(),
					})
				} else {
					Ok(receipt(r#"{"transactionHash":"0xfeed","status":"success"}"#))
				}
			});
	}

	#[tokio::test(start_paused = true)]
	async fn test_three_timeouts_then_success() {
		let mut upstream = MockUpstreamInterface::new();
		timeouts_then_success(3, &mut upstream);
		let store = signed_store(TransactionState::Signed).await;
		let handler = BroadcastHandler::new(Arc::new(upstream), store.clone(), RetryPolicy::default());

		let started = tokio::time::Instant::now();
		let outcome = handler.broadcast("dot-1").await.unwrap();
		let elapsed = started.elapsed();

		assert_eq!(outcome.attempts, 4);
		assert!(elapsed >= Duration::from_secs(14) && elapsed < Duration::from_secs(15), "{elapsed:?}");
		assert_eq!(outcome.transaction_hash.as_deref(), Some("0xfeed"));
		assert_eq!(
			outcome.explorer_url.as_deref(),
			Some("https://westend.subscan.io/extrinsic/0xfeed")
		);

		let record = store.read("dot-1").await.unwrap();
		assert_eq!(record.state, TransactionState::Broadcast);
		assert_eq!(record.broadcast_attempts, 4);
		assert!(record.broadcasted_at.is_some());
		assert_eq!(record.broadcast_result.unwrap()["status"], "success");
	}

	#[tokio::test(start_paused = true)]
	async fn test_four_timeouts_exhaust_retries() {
		let mut upstream = MockUpstreamInterface::new();
		let calls = Arc::new(AtomicU32::new(0));
		let counter = calls.clone();
		upstream.expect_broadcast().times(4).returning(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
			Err(UpstreamError::Http {
				status: 500,
				body: TIMEOUT.to_string(),
			})
		});
		let store = signed_store(TransactionState::Signed).await;
		let handler = BroadcastHandler::new(Arc::new(upstream), store.clone(), RetryPolicy::default());

		let err = handler.broadcast("dot-1").await.unwrap_err();
		match &err {
			StakingError::BroadcastExhausted {
				attempts,
				last_status,
				last_body,
			} => {
				assert_eq!(*attempts, 4);
				assert_eq!(*last_status, Some(500));
				assert_eq!(last_body, TIMEOUT);
			},
			other => panic!("unexpected error: {other:?}"),
		}
		assert_eq!(calls.load(Ordering::SeqCst), 4);

		let record = store.read("dot-1").await.unwrap();
		assert_eq!(record.state, TransactionState::Failed);
		assert_eq!(record.failure.unwrap().kind, "BroadcastExhaustedError");
		assert_eq!(record.broadcast_attempts, 4);
		assert_eq!(
			record.broadcast_result.unwrap()["error"],
			"Upstream Timeout while relaying"
		);
	}

	#[tokio::test(start_paused = true)]
	async fn test_non_timeout_errors_are_not_retried() {
		let mut upstream = MockUpstreamInterface::new();
		upstream.expect_broadcast().times(1).returning(|_| {
			Err(UpstreamError::Http {
				status: 500,
				body: "insufficient funds".into(),
			})
		});
		let store = signed_store(TransactionState::Signed).await;
		let handler = BroadcastHandler::new(Arc::new(upstream), store.clone(), RetryPolicy::default());

		let err = handler.broadcast("dot-1").await.unwrap_err();
		assert_eq!(err.kind(), "UpstreamHttpError");
		let record = store.read("dot-1").await.unwrap();
		assert_eq!(record.state, TransactionState::Failed);
		assert_eq!(record.broadcast_attempts, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn test_connection_errors_are_retried() {
		let mut upstream = MockUpstreamInterface::new();
		let calls = Arc::new(AtomicU32::new(0));
		upstream.expect_broadcast().times(2).returning(move |_| {
			if calls.fetch_add(1, Ordering::SeqCst) == 0 {
				Err(UpstreamError::Connection("reset".into()))
			} else {
				Ok(receipt(r#"{"result":{"extraData":{"transactionHash":"0xbeef"}}}"#))
			}
		});
		let store = signed_store(TransactionState::Signed).await;
		let handler = BroadcastHandler::new(Arc::new(upstream), store, RetryPolicy::default());

		let outcome = handler.broadcast("dot-1").await.unwrap();
		assert_eq!(outcome.attempts, 2);
		assert_eq!(outcome.status, "pending");
	}

	#[tokio::test]
	async fn test_flat_and_nested_responses_store_same_result() {
		let mut stored = Vec::new();
		for body in [
			r#"{"transactionHash":"0xabc","status":"submitted"}"#,
			r#"{"result":{"status":"submitted","extraData":{"transactionHash":"0xabc"}}}"#,
		] {
			let body = body.to_string();
			let mut upstream = MockUpstreamInterface::new();
			upstream
				.expect_broadcast()
				.times(1)
				.returning(move |_| Ok(receipt(&body)));
			let store = signed_store(TransactionState::Signed).await;
			let handler = BroadcastHandler::new(Arc::new(upstream), store.clone(), RetryPolicy::default());
			handler.broadcast("dot-1").await.unwrap();

			let record = store.read("dot-1").await.unwrap();
			stored.push((record.transaction_hash, record.status));
		}
		assert_eq!(stored[0], stored[1]);
		assert_eq!(stored[0].0.as_deref(), Some("0xabc"));
	}

	#[tokio::test]
	async fn test_already_broadcast_returns_stored_result() {
		let mut upstream = MockUpstreamInterface::new();
		upstream
			.expect_broadcast()
			.times(1)
			.returning(|_| Ok(receipt(r#"{"transactionHash":"0x1","status":"success"}"#)));
		let store = signed_store(TransactionState::Signed).await;
		let handler = BroadcastHandler::new(Arc::new(upstream), store, RetryPolicy::default());

		let first = handler.broadcast("dot-1").await.unwrap();
		let second = handler.broadcast("dot-1").await.unwrap();
		assert_eq!(first, second);
	}

	#[tokio::test(start_paused = true)]
	async fn test_abandoned_caller_does_not_strand_record() {
		let mut upstream = MockUpstreamInterface::new();
		timeouts_then_success(1, &mut upstream);
		let store = signed_store(TransactionState::Signed).await;
		let handler = BroadcastHandler::new(Arc::new(upstream), store.clone(), RetryPolicy::default());

		let abandoned = tokio::time::timeout(Duration::from_secs(1), handler.broadcast("dot-1")).await;
		assert!(abandoned.is_err());

		// The next caller queues behind the detached relay and sees its outcome.
		let outcome = handler.broadcast("dot-1").await.unwrap();
		assert_eq!(outcome.transaction_hash.as_deref(), Some("0xfeed"));
		assert_eq!(outcome.attempts, 2);
		let record = store.read("dot-1").await.unwrap();
		assert_eq!(record.state, TransactionState::Broadcast);
	}

	#[tokio::test(start_paused = true)]
	async fn test_abandoned_caller_during_retries_still_records_failure() {
		let mut upstream = MockUpstreamInterface::new();
		upstream.expect_broadcast().times(4).returning(|_| {
			Err(UpstreamError::Http {
				status: 500,
				body: TIMEOUT.to_string(),
			})
		});
		let store = signed_store(TransactionState::Signed).await;
		let handler = BroadcastHandler::new(Arc::new(upstream), store.clone(), RetryPolicy::default());

		let abandoned = tokio::time::timeout(Duration::from_secs(3), handler.broadcast("dot-1")).await;
		assert!(abandoned.is_err());
		assert_eq!(
			store.read("dot-1").await.unwrap().state,
			TransactionState::Broadcasting
		);

		tokio::time::sleep(Duration::from_secs(30)).await;
		let record = store.read("dot-1").await.unwrap();
		assert_eq!(record.state, TransactionState::Failed);
		assert_eq!(record.broadcast_attempts, 4);
		assert_eq!(
			handler.broadcast("dot-1").await.unwrap_err().kind(),
			"InvalidTransitionError"
		);
	}

	#[tokio::test]
	async fn test_unsigned_transaction_rejected() {
		let mut upstream = MockUpstreamInterface::new();
		upstream.expect_broadcast().times(0);
		let store = signed_store(TransactionState::Created).await;
		let handler = BroadcastHandler::new(Arc::new(upstream), store, RetryPolicy::default());

		let err = handler.broadcast("dot-1").await.unwrap_err();
		assert_eq!(err.kind(), "InvalidTransitionError");
	}

	#[test]
	fn test_retry_policy() {
		let policy = RetryPolicy::default();
		assert_eq!(policy.delay_for(0), Duration::from_secs(2));
		assert_eq!(policy.delay_for(1), Duration::from_secs(4));
		assert_eq!(policy.delay_for(2), Duration::from_secs(8));

		let timeout = |status, body: &str| UpstreamError::Http {
			status,
			body: body.to_string(),
		};
		assert!(policy.is_retryable(&timeout(500, "Request TIMEOUT")));
		assert!(!policy.is_retryable(&timeout(502, "timeout")));
		assert!(!policy.is_retryable(&timeout(500, "nonce too low")));
		assert!(policy.is_retryable(&UpstreamError::Connection("refused".into())));
		assert!(!policy.is_retryable(&UpstreamError::Contract("x".into())));
	}
}
