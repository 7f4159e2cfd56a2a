//! Transaction record types.
//!
//! A [`TransactionRecord`] is the single persisted document describing one
//! stake or unstake intent as it moves from an unsigned upstream payload to a
//! broadcast transaction. Records are stored as camelCase JSON.

use crate::Chain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::fmt;

/// Kind of staking intent that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
	Stake,
	Unstake,
}

impl Operation {
	pub fn as_str(&self) -> &'static str {
		match self {
			Operation::Stake => "stake",
			Operation::Unstake => "unstake",
		}
	}
}

/// Lifecycle state of a transaction.
///
/// States only move forward: `Created -> Signed -> Broadcasting -> Broadcast`,
/// and `Failed` can be entered from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
	Created,
	Signed,
	Broadcasting,
	Broadcast,
	Failed,
}

impl TransactionState {
	/// Returns true if no further transition is possible.
	pub fn is_terminal(&self) -> bool {
		matches!(self, TransactionState::Broadcast | TransactionState::Failed)
	}

	/// Returns true if moving from `self` to `next` is a forward transition.
	pub fn can_transition_to(&self, next: TransactionState) -> bool {
		use TransactionState::*;
		matches!(
			(self, next),
			(Created, Signed)
				| (Created, Failed)
				| (Signed, Broadcasting)
				| (Signed, Failed)
				| (Broadcasting, Broadcast)
				| (Broadcasting, Failed)
		)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			TransactionState::Created => "created",
			TransactionState::Signed => "signed",
			TransactionState::Broadcasting => "broadcasting",
			TransactionState::Broadcast => "broadcast",
			TransactionState::Failed => "failed",
		}
	}
}

impl fmt::Display for TransactionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Opaque unsigned transaction payload returned by the upstream API.
///
/// The payload is held as raw JSON text so that the exact bytes received are
/// the exact bytes handed to the signer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnsignedPayload(Box<RawValue>);

impl UnsignedPayload {
	/// Wraps an already captured raw JSON value.
	pub fn new(raw: Box<RawValue>) -> Self {
		Self(raw)
	}

	/// Parses raw JSON text, rejecting anything that is not valid JSON.
	pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
		RawValue::from_string(json.to_string()).map(Self)
	}

	/// Builds a payload from a JSON value.
	pub fn from_value(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
		serde_json::value::to_raw_value(value).map(Self)
	}

	/// The raw JSON text.
	pub fn get(&self) -> &str {
		self.0.get()
	}

	/// Returns the payload content when it is a JSON string.
	pub fn as_str(&self) -> Option<String> {
		serde_json::from_str::<String>(self.get()).ok()
	}

	/// Parses the payload into a JSON value.
	pub fn to_value(&self) -> Result<serde_json::Value, serde_json::Error> {
		serde_json::from_str(self.get())
	}
}

impl PartialEq for UnsignedPayload {
	fn eq(&self, other: &Self) -> bool {
		self.get() == other.get()
	}
}

/// Reason recorded on a record that moved to [`TransactionState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
	/// Error kind, e.g. `BroadcastExhaustedError`.
	pub kind: String,
	pub message: String,
}

impl FailureReason {
	pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
		Self {
			kind: kind.into(),
			message: message.into(),
		}
	}
}

/// Persisted state of one staking transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
	pub transaction_id: String,
	pub chain: Chain,
	pub network: String,
	pub staker_address: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub amount: Option<String>,
	pub operation: Operation,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub unsigned_payload: Option<UnsignedPayload>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub signed_payload: Option<String>,
	/// Raw body returned by the upstream when the record was created.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub upstream_response: Option<serde_json::Value>,
	/// Raw body of the last broadcast response.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub broadcast_result: Option<serde_json::Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub transaction_hash: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub status: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub explorer_url: Option<String>,
	#[serde(default)]
	pub broadcast_attempts: u32,
	pub state: TransactionState,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub failure: Option<FailureReason>,
	pub created_at: DateTime<Utc>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub signed_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub broadcasted_at: Option<DateTime<Utc>>,
	pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
	/// Creates a record in the `Created` state holding an unsigned payload.
	pub fn new(
		transaction_id: impl Into<String>,
		chain: Chain,
		network: impl Into<String>,
		staker_address: impl Into<String>,
		operation: Operation,
		unsigned_payload: UnsignedPayload,
	) -> Self {
		let now = Utc::now();
		Self {
			transaction_id: transaction_id.into(),
			chain,
			network: network.into(),
			staker_address: staker_address.into(),
			amount: None,
			operation,
			unsigned_payload: Some(unsigned_payload),
			signed_payload: None,
			upstream_response: None,
			broadcast_result: None,
			transaction_hash: None,
			status: None,
			explorer_url: None,
			broadcast_attempts: 0,
			state: TransactionState::Created,
			failure: None,
			created_at: now,
			signed_at: None,
			broadcasted_at: None,
			updated_at: now,
		}
	}

	pub fn with_amount(mut self, amount: Option<String>) -> Self {
		self.amount = amount;
		self
	}

	pub fn with_upstream_response(mut self, response: serde_json::Value) -> Self {
		self.upstream_response = Some(response);
		self
	}
}

/// Shallow update applied to a stored record.
///
/// Only fields set to `Some` are written; everything else keeps its stored
/// value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionPatch {
	pub state: Option<TransactionState>,
	pub signed_payload: Option<String>,
	pub broadcast_result: Option<serde_json::Value>,
	pub transaction_hash: Option<String>,
	pub status: Option<String>,
	pub explorer_url: Option<String>,
	pub broadcast_attempts: Option<u32>,
	pub failure: Option<FailureReason>,
	pub signed_at: Option<DateTime<Utc>>,
	pub broadcasted_at: Option<DateTime<Utc>>,
}

impl TransactionPatch {
	/// Patch that moves a record to `state` and nothing else.
	pub fn state(state: TransactionState) -> Self {
		Self {
			state: Some(state),
			..Default::default()
		}
	}

	/// Patch that marks a record failed with the given reason.
	pub fn failed(reason: FailureReason) -> Self {
		Self {
			state: Some(TransactionState::Failed),
			failure: Some(reason),
			..Default::default()
		}
	}

	/// Writes every field present in the patch onto `record`.
	pub fn apply_to(self, record: &mut TransactionRecord) {
		if let Some(state) = self.state {
			record.state = state;
		}
		if let Some(signed) = self.signed_payload {
			record.signed_payload = Some(signed);
		}
		if let Some(result) = self.broadcast_result {
			record.broadcast_result = Some(result);
		}
		if let Some(hash) = self.transaction_hash {
			record.transaction_hash = Some(hash);
		}
		if let Some(status) = self.status {
			record.status = Some(status);
		}
		if let Some(url) = self.explorer_url {
			record.explorer_url = Some(url);
		}
		if let Some(attempts) = self.broadcast_attempts {
			record.broadcast_attempts = attempts;
		}
		if let Some(failure) = self.failure {
			record.failure = Some(failure);
		}
		if let Some(at) = self.signed_at {
			record.signed_at = Some(at);
		}
		if let Some(at) = self.broadcasted_at {
			record.broadcasted_at = Some(at);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn record() -> TransactionRecord {
		TransactionRecord::new(
			"polkadot-westend-1",
			Chain::Polkadot,
			"westend",
			"5Grw",
			Operation::Stake,
			UnsignedPayload::from_json(r#""0x0400""#).unwrap(),
		)
	}

	#[test]
	fn test_forward_transitions() {
		use TransactionState::*;
		assert!(Created.can_transition_to(Signed));
		assert!(Signed.can_transition_to(Broadcasting));
		assert!(Broadcasting.can_transition_to(Broadcast));
		assert!(Broadcasting.can_transition_to(Failed));
		assert!(Created.can_transition_to(Failed));
	}

	#[test]
	fn test_no_regression_or_exit_from_terminal() {
		use TransactionState::*;
		let all = [Created, Signed, Broadcasting, Broadcast, Failed];
		for next in all {
			assert!(!Broadcast.can_transition_to(next));
			assert!(!Failed.can_transition_to(next));
		}
		assert!(!Signed.can_transition_to(Created));
		assert!(!Broadcasting.can_transition_to(Signed));
		assert!(!Created.can_transition_to(Broadcast));
	}

	#[test]
	fn test_record_serializes_camel_case() {
		let value = serde_json::to_value(record()).unwrap();
		assert_eq!(value["transactionId"], "polkadot-westend-1");
		assert_eq!(value["stakerAddress"], "5Grw");
		assert_eq!(value["unsignedPayload"], "0x0400");
		assert_eq!(value["state"], "created");
		assert!(value.get("signedPayload").is_none());
	}

	#[test]
	fn test_unsigned_payload_keeps_raw_text() {
		let raw = r#"{"messages":[],  "fee":{"gas":"250000"}}"#;
		let payload = UnsignedPayload::from_json(raw).unwrap();
		let mut rec = record();
		rec.unsigned_payload = Some(payload);

		let bytes = serde_json::to_vec(&rec).unwrap();
		let back: TransactionRecord = serde_json::from_slice(&bytes).unwrap();
		assert_eq!(back.unsigned_payload.unwrap().get(), raw);
	}

	#[test]
	fn test_patch_only_touches_present_fields() {
		let mut rec = record();
		let before = rec.clone();
		TransactionPatch {
			signed_payload: Some("0xsigned".into()),
			..Default::default()
		}
		.apply_to(&mut rec);

		assert_eq!(rec.signed_payload.as_deref(), Some("0xsigned"));
		assert_eq!(rec.unsigned_payload, before.unsigned_payload);
		assert_eq!(rec.state, before.state);
		assert_eq!(rec.staker_address, before.staker_address);
	}

	#[test]
	fn test_failed_patch() {
		let mut rec = record();
		TransactionPatch::failed(FailureReason::new("SigningError", "boom")).apply_to(&mut rec);
		assert_eq!(rec.state, TransactionState::Failed);
		assert_eq!(rec.failure, Some(FailureReason::new("SigningError", "boom")));
	}
}
