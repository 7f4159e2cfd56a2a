//! API types for the gateway's HTTP endpoints.
//!
//! Request and response bodies use camelCase keys. Errors are returned as an
//! [`ErrorResponse`] carrying a stable `kind` string.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Accepts an amount given either as a JSON string or a JSON number.
fn deserialize_amount<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Option::<serde_json::Value>::deserialize(deserializer)?;
	match value {
		None | Some(serde_json::Value::Null) => Ok(None),
		Some(serde_json::Value::String(s)) => Ok(Some(s)),
		Some(serde_json::Value::Number(n)) => Ok(Some(n.to_string())),
		Some(other) => Err(serde::de::Error::custom(format!(
			"amount must be a string or number, got {}",
			other
		))),
	}
}

/// Request to create a stake transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStakeRequest {
	#[serde(default)]
	pub chain: String,
	#[serde(default)]
	pub network: String,
	#[serde(default)]
	pub staker_address: String,
	#[serde(default, deserialize_with = "deserialize_amount")]
	pub amount: Option<String>,
	/// Client-chosen id; generated when absent.
	#[serde(default)]
	pub transaction_id: Option<String>,
}

/// Request to create an unstake transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUnstakeRequest {
	#[serde(default)]
	pub chain: String,
	#[serde(default)]
	pub network: String,
	#[serde(default)]
	pub staker_address: String,
	#[serde(default, deserialize_with = "deserialize_amount")]
	pub amount: Option<String>,
	#[serde(default)]
	pub transaction_id: Option<String>,
}

/// Response for stake and unstake creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionResponse {
	pub success: bool,
	pub transaction_id: String,
	pub chain: String,
	pub network: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub amount: Option<String>,
}

/// Request to sign a stored transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionRequest {
	#[serde(default)]
	pub transaction_id: String,
	#[serde(default)]
	pub chain: Option<String>,
	/// Overrides the record's network when present.
	#[serde(default)]
	pub network: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignTransactionResponse {
	pub success: bool,
	pub transaction_id: String,
	pub signed_transaction: String,
}

/// Request to broadcast a signed transaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTransactionRequest {
	#[serde(default)]
	pub transaction_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastTransactionResponse {
	pub success: bool,
	pub transaction_id: String,
	pub transaction_hash: Option<String>,
	pub status: String,
	pub explorer_url: Option<String>,
}

/// API error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
	/// Always `false`.
	pub success: bool,
	/// Stable error kind, e.g. `InvalidAmountError`.
	pub kind: String,
	pub message: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub detail: Option<serde_json::Value>,
}

/// Structured API error with its HTTP status mapping.
#[derive(Debug)]
pub enum APIError {
	/// Invalid input (400).
	BadRequest {
		kind: String,
		message: String,
		detail: Option<serde_json::Value>,
	},
	/// Unknown transaction (404).
	NotFound { kind: String, message: String },
	/// Lifecycle precondition violated (409).
	Conflict { kind: String, message: String },
	/// Upstream API misbehaved or could not be reached (502).
	BadGateway {
		kind: String,
		message: String,
		detail: Option<serde_json::Value>,
	},
	/// Anything else (500).
	InternalServerError { kind: String, message: String },
}

impl APIError {
	pub fn status_code(&self) -> u16 {
		match self {
			APIError::BadRequest { .. } => 400,
			APIError::NotFound { .. } => 404,
			APIError::Conflict { .. } => 409,
			APIError::BadGateway { .. } => 502,
			APIError::InternalServerError { .. } => 500,
		}
	}

	/// Convert to ErrorResponse for JSON serialization.
	pub fn to_error_response(&self) -> ErrorResponse {
		let (kind, message, detail) = match self {
			APIError::BadRequest {
				kind,
				message,
				detail,
			}
			| APIError::BadGateway {
				kind,
				message,
				detail,
			} => (kind, message, detail.clone()),
			APIError::NotFound { kind, message }
			| APIError::Conflict { kind, message }
			| APIError::InternalServerError { kind, message } => (kind, message, None),
		};
		ErrorResponse {
			success: false,
			kind: kind.clone(),
			message: message.clone(),
			detail,
		}
	}
}

impl fmt::Display for APIError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let response = self.to_error_response();
		write!(f, "{} ({}): {}", response.kind, self.status_code(), response.message)
	}
}

impl std::error::Error for APIError {}

impl axum::response::IntoResponse for APIError {
	fn into_response(self) -> axum::response::Response {
		use axum::{http::StatusCode, response::Json};

		let status =
			StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		(status, Json(self.to_error_response())).into_response()
	}
}
