//! HTTP client for the Unified Staking API.

use crate::normalize::{parse_created, parse_receipt};
use crate::{
	BroadcastReceipt, BroadcastRequest, CreatedTransaction, StakeRequest, UnstakeRequest,
	UpstreamError, UpstreamFactory, UpstreamInterface, UpstreamRegistry,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use staking_config::{AuthScheme, UpstreamConfig};
use staking_types::{Chain, ImplementationRegistry, SecretString};
use std::time::Duration;

pub const STAKE_PATH: &str = "/unified/staking/stake";
pub const UNSTAKE_PATH: &str = "/unified/staking/unstake";
pub const BROADCAST_PATH: &str = "/unified/transaction/broadcast";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StakeBody<'a> {
	chain: Chain,
	network: &'a str,
	staker_address: &'a str,
	#[serde(with = "rust_decimal::serde::float")]
	amount: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UnstakeBody<'a> {
	chain: Chain,
	network: &'a str,
	staker_address: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	extra: Option<UnstakeExtra>,
}

#[derive(Serialize)]
struct UnstakeExtra {
	#[serde(with = "rust_decimal::serde::float")]
	amount: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BroadcastBody<'a> {
	chain: Chain,
	network: &'a str,
	staker_address: &'a str,
	signed_transaction: &'a str,
}

/// reqwest-based upstream client with a shared connection pool.
pub struct HttpUpstream {
	client: reqwest::Client,
	base_url: String,
	api_key: SecretString,
	auth: AuthScheme,
}

impl HttpUpstream {
	pub fn new(config: &UpstreamConfig) -> Result<Self, UpstreamError> {
		let client = reqwest::Client::builder()
			.pool_idle_timeout(Duration::from_secs(90))
			.timeout(Duration::from_secs(config.timeout_seconds))
			.build()
			.map_err(|e| UpstreamError::Configuration(e.to_string()))?;

		Ok(Self {
			client,
			base_url: config.base_url.trim_end_matches('/').to_string(),
			api_key: config.api_key.clone(),
			auth: config.auth,
		})
	}

	/// POSTs a JSON body and returns the response text of a 2xx answer.
	async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<String, UpstreamError> {
		let url = format!("{}{}", self.base_url, path);
		let request = self.client.post(&url).json(body);
		let request = match self.auth {
			AuthScheme::Bearer => request.bearer_auth(self.api_key.expose_secret()),
			AuthScheme::ApiKey => request.header("X-API-Key", self.api_key.expose_secret()),
		};

		let response = request
			.send()
			.await
			.map_err(|e| UpstreamError::Connection(format!("{}: {}", url, e)))?;
		let status = response.status();
		let text = response
			.text()
			.await
			.map_err(|e| UpstreamError::Connection(format!("{}: {}", url, e)))?;

		tracing::debug!(path = %path, status = status.as_u16(), "Upstream responded");

		if !status.is_success() {
			return Err(UpstreamError::Http {
				status: status.as_u16(),
				body: text,
			});
		}
		Ok(text)
	}
}

#[async_trait]
impl UpstreamInterface for HttpUpstream {
	async fn create_stake(
		&self,
		request: &StakeRequest,
	) -> Result<CreatedTransaction, UpstreamError> {
		let body = StakeBody {
			chain: request.chain,
			network: &request.network,
			staker_address: &request.staker_address,
			amount: request.amount,
		};
		let text = self.post(STAKE_PATH, &body).await?;
		parse_created(&text)
	}

	async fn create_unstake(
		&self,
		request: &UnstakeRequest,
	) -> Result<CreatedTransaction, UpstreamError> {
		let body = UnstakeBody {
			chain: request.chain,
			network: &request.network,
			staker_address: &request.staker_address,
			extra: request.amount.map(|amount| UnstakeExtra { amount }),
		};
		let text = self.post(UNSTAKE_PATH, &body).await?;
		parse_created(&text)
	}

	async fn broadcast(
		&self,
		request: &BroadcastRequest,
	) -> Result<BroadcastReceipt, UpstreamError> {
		let body = BroadcastBody {
			chain: request.chain,
			network: &request.network,
			staker_address: &request.staker_address,
			signed_transaction: &request.signed_transaction,
		};
		let text = self.post(BROADCAST_PATH, &body).await?;
		parse_receipt(&text)
	}
}

pub fn create_upstream(
	config: &UpstreamConfig,
) -> Result<Box<dyn UpstreamInterface>, UpstreamError> {
	Ok(Box::new(HttpUpstream::new(config)?))
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "http";
	type Factory = UpstreamFactory;

	fn factory() -> Self::Factory {
		create_upstream
	}
}

impl UpstreamRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{
		http::{HeaderMap, StatusCode},
		routing::post,
		Json, Router,
	};
	use serde_json::{json, Value};
	use std::str::FromStr;

	/// Echoes the request body and auth headers back inside a well-formed
	/// stake response.
	async fn echo(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
		let header = |name: &str| {
			headers
				.get(name)
				.and_then(|v| v.to_str().ok())
				.map(str::to_string)
		};
		Json(json!({
			"received": body,
			"authorization": header("authorization"),
			"apiKey": header("x-api-key"),
			"result": { "extraData": { "unsignedTransaction": "0x0400" } }
		}))
	}

	async fn spawn(app: Router) -> String {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{}", addr)
	}

	fn config(base_url: &str, auth: AuthScheme) -> UpstreamConfig {
		UpstreamConfig {
			base_url: base_url.to_string(),
			api_key: SecretString::from("test-key"),
			auth,
			timeout_seconds: 5,
		}
	}

	fn stake_request() -> StakeRequest {
		StakeRequest {
			chain: Chain::Polkadot,
			network: "westend".into(),
			staker_address: "5GrwvaEF".into(),
			amount: Decimal::from_str("1.5").unwrap(),
		}
	}

	#[tokio::test]
	async fn test_stake_sends_numeric_amount_with_bearer_auth() {
		let base = spawn(Router::new().route(STAKE_PATH, post(echo))).await;
		let upstream = HttpUpstream::new(&config(&base, AuthScheme::Bearer)).unwrap();

		let created = upstream.create_stake(&stake_request()).await.unwrap();
		assert_eq!(created.unsigned_payload.get(), r#""0x0400""#);
		assert_eq!(
			created.raw["received"],
			json!({
				"chain": "polkadot",
				"network": "westend",
				"stakerAddress": "5GrwvaEF",
				"amount": 1.5
			})
		);
		assert_eq!(created.raw["authorization"], "Bearer test-key");
		assert_eq!(created.raw["apiKey"], Value::Null);
	}

	#[tokio::test]
	async fn test_unstake_places_amount_under_extra() {
		let base = spawn(Router::new().route(UNSTAKE_PATH, post(echo))).await;
		let upstream = HttpUpstream::new(&config(&base, AuthScheme::ApiKey)).unwrap();

		let mut request = UnstakeRequest {
			chain: Chain::Sei,
			network: "sei-testnet".into(),
			staker_address: "sei1abc".into(),
			amount: None,
		};
		let without = upstream.create_unstake(&request).await.unwrap();
		assert!(without.raw["received"].get("extra").is_none());
		assert_eq!(without.raw["apiKey"], "test-key");
		assert_eq!(without.raw["authorization"], Value::Null);

		request.amount = Some(Decimal::from(2));
		let with = upstream.create_unstake(&request).await.unwrap();
		assert_eq!(with.raw["received"]["extra"], json!({ "amount": 2.0 }));
	}

	#[tokio::test]
	async fn test_error_status_keeps_body() {
		let app = Router::new().route(
			BROADCAST_PATH,
			post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "Gateway Timeout from node") }),
		);
		let base = spawn(app).await;
		let upstream = HttpUpstream::new(&config(&base, AuthScheme::Bearer)).unwrap();

		let err = upstream
			.broadcast(&BroadcastRequest {
				chain: Chain::Solana,
				network: "testnet".into(),
				staker_address: "9xQe".into(),
				signed_transaction: "AQID".into(),
			})
			.await
			.unwrap_err();
		match err {
			UpstreamError::Http { status, body } => {
				assert_eq!(status, 500);
				assert_eq!(body, "Gateway Timeout from node");
			},
			other => panic!("unexpected error: {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_broadcast_receipt() {
		let app = Router::new().route(
			BROADCAST_PATH,
			post(|| async { Json(json!({ "result": { "status": "success", "extraData": { "transactionHash": "5VfY" } } })) }),
		);
		let base = spawn(app).await;
		let upstream = HttpUpstream::new(&config(&base, AuthScheme::Bearer)).unwrap();

		let receipt = upstream
			.broadcast(&BroadcastRequest {
				chain: Chain::Solana,
				network: "testnet".into(),
				staker_address: "9xQe".into(),
				signed_transaction: "AQID".into(),
			})
			.await
			.unwrap();
		assert_eq!(receipt.transaction_hash.as_deref(), Some("5VfY"));
		assert_eq!(receipt.status, "success");
	}

	#[tokio::test]
	async fn test_unreachable_upstream_is_connection_error() {
		let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		drop(listener);

		let upstream =
			HttpUpstream::new(&config(&format!("http://{}", addr), AuthScheme::Bearer)).unwrap();
		let err = upstream.create_stake(&stake_request()).await.unwrap_err();
		assert!(matches!(err, UpstreamError::Connection(_)));
	}

	#[tokio::test]
	async fn test_missing_payload_is_contract_error() {
		let app = Router::new().route(STAKE_PATH, post(|| async { Json(json!({ "result": {} })) }));
		let base = spawn(app).await;
		let upstream = HttpUpstream::new(&config(&format!("{}/", base), AuthScheme::Bearer)).unwrap();

		let err = upstream.create_stake(&stake_request()).await.unwrap_err();
		assert!(matches!(err, UpstreamError::Contract(_)));
	}
}
