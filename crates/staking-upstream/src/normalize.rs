//! Response normalization.
//!
//! The upstream has answered in more than one shape over time: broadcast
//! results appear either flat (`{transactionHash, status}`) or nested
//! (`{result: {status, extraData: {transactionHash}}}`). All of that is
//! resolved here, once. Top-level fields take precedence.

use crate::{BroadcastReceipt, CreatedTransaction, UpstreamError};
use serde::Deserialize;
use serde_json::value::RawValue;
use staking_types::UnsignedPayload;

/// Status recorded when a broadcast response does not report one.
pub const DEFAULT_BROADCAST_STATUS: &str = "pending";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedEnvelope {
	#[serde(default)]
	result: Option<CreatedResult>,
	#[serde(default)]
	staker_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedResult {
	#[serde(default)]
	extra_data: Option<ExtraData>,
	#[serde(default)]
	staker_address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtraData {
	#[serde(default)]
	unsigned_transaction: Option<Box<RawValue>>,
}

fn parse_json(body: &str) -> Result<serde_json::Value, UpstreamError> {
	serde_json::from_str(body)
		.map_err(|e| UpstreamError::Contract(format!("response is not JSON: {}", e)))
}

/// Extracts the unsigned payload from a stake/unstake response.
///
/// The payload is captured as raw JSON text straight from `body` so that it
/// reaches the signer exactly as the upstream encoded it.
pub fn parse_created(body: &str) -> Result<CreatedTransaction, UpstreamError> {
	let raw = parse_json(body)?;
	let envelope: CreatedEnvelope = serde_json::from_str(body)
		.map_err(|e| UpstreamError::Contract(format!("unexpected response shape: {}", e)))?;

	let result = envelope.result.ok_or_else(|| {
		UpstreamError::Contract("response has no 'result' object".to_string())
	})?;
	let payload = result
		.extra_data
		.and_then(|extra| extra.unsigned_transaction)
		.ok_or_else(|| {
			UpstreamError::Contract(
				"response has no 'result.extraData.unsignedTransaction'".to_string(),
			)
		})?;

	Ok(CreatedTransaction {
		unsigned_payload: UnsignedPayload::new(payload),
		staker_address: envelope
			.staker_address
			.or(result.staker_address)
			.filter(|addr| !addr.trim().is_empty()),
		raw,
	})
}

fn string_at<'a>(value: &'a serde_json::Value, pointer: &str) -> Option<&'a str> {
	value
		.pointer(pointer)
		.and_then(|v| v.as_str())
		.filter(|s| !s.is_empty())
}

/// Normalizes a broadcast response, flat or nested.
pub fn parse_receipt(body: &str) -> Result<BroadcastReceipt, UpstreamError> {
	let raw = parse_json(body)?;

	let transaction_hash = string_at(&raw, "/transactionHash")
		.or_else(|| string_at(&raw, "/result/extraData/transactionHash"))
		.map(str::to_string);
	let status = string_at(&raw, "/status")
		.or_else(|| string_at(&raw, "/result/status"))
		.unwrap_or(DEFAULT_BROADCAST_STATUS)
		.to_string();

	Ok(BroadcastReceipt {
		transaction_hash,
		status,
		raw,
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_flat_and_nested_receipts_agree() {
		let flat = parse_receipt(r#"{"transactionHash":"0xabc","status":"submitted"}"#).unwrap();
		let nested = parse_receipt(
			r#"{"result":{"status":"submitted","extraData":{"transactionHash":"0xabc"}}}"#,
		)
		.unwrap();

		assert_eq!(flat.transaction_hash, nested.transaction_hash);
		assert_eq!(flat.status, nested.status);
		assert_eq!(flat.transaction_hash.as_deref(), Some("0xabc"));
	}

	#[test]
	fn test_top_level_wins_and_status_defaults() {
		let both = parse_receipt(
			r#"{"transactionHash":"top","status":"ok","result":{"status":"nested","extraData":{"transactionHash":"inner"}}}"#,
		)
		.unwrap();
		assert_eq!(both.transaction_hash.as_deref(), Some("top"));
		assert_eq!(both.status, "ok");

		let bare = parse_receipt(r#"{"result":{}}"#).unwrap();
		assert_eq!(bare.transaction_hash, None);
		assert_eq!(bare.status, DEFAULT_BROADCAST_STATUS);
	}

	#[test]
	fn test_created_preserves_payload_bytes() {
		let body = r#"{"stakerAddress":"5Grw","result":{"extraData":{"unsignedTransaction":{"z": 1,  "a":[2,3]}}}}"#;
		let created = parse_created(body).unwrap();
		assert_eq!(created.unsigned_payload.get(), r#"{"z": 1,  "a":[2,3]}"#);
		assert_eq!(created.staker_address.as_deref(), Some("5Grw"));
		assert_eq!(created.raw["stakerAddress"], "5Grw");
	}

	#[test]
	fn test_created_staker_from_result() {
		let body = r#"{"result":{"stakerAddress":"sei1abc","extraData":{"unsignedTransaction":"0x00"}}}"#;
		let created = parse_created(body).unwrap();
		assert_eq!(created.staker_address.as_deref(), Some("sei1abc"));
		assert_eq!(created.unsigned_payload.as_str().as_deref(), Some("0x00"));
	}

	#[test]
	fn test_created_missing_payload_is_contract_error() {
		for body in [
			r#"{}"#,
			r#"{"result":{}}"#,
			r#"{"result":{"extraData":{}}}"#,
			r#"{"result":{"extraData":{"unsignedTransaction":null}}}"#,
			"<html>bad gateway</html>",
		] {
			assert!(
				matches!(parse_created(body), Err(UpstreamError::Contract(_))),
				"accepted {body}"
			);
		}
	}
}
