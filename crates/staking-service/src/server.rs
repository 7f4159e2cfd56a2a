//! HTTP server for the staking gateway API.
//!
//! Every route lives under `/api`. Handlers delegate to the staking engine
//! and turn engine errors into the `{success: false, kind, message}` body.

use crate::apis;
use axum::{
	extract::{rejection::JsonRejection, Path, State},
	http::{HeaderName, HeaderValue, Method, StatusCode},
	response::Json,
	routing::{get, post},
	Router,
};
use staking_config::{ApiConfig, CorsConfig};
use staking_core::{StakingEngine, StakingError};
use staking_types::{
	APIError, BroadcastTransactionRequest, BroadcastTransactionResponse, CreateStakeRequest,
	CreateTransactionResponse, CreateUnstakeRequest, SignTransactionRequest,
	SignTransactionResponse, TransactionRecord,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
	cors::{Any, CorsLayer},
	limit::RequestBodyLimitLayer,
	timeout::TimeoutLayer,
	trace::TraceLayer,
};

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	pub engine: Arc<StakingEngine>,
}

/// Starts the HTTP server and serves until ctrl-c.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<StakingEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = router(&api_config, AppState { engine });

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Staking gateway API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(shutdown_signal())
		.await?;

	Ok(())
}

/// Builds the `/api` router with CORS, body size and timeout layers.
///
/// The request timeout is the configured one or, when absent, long enough
/// for a broadcast to spend its whole retry budget.
pub fn router(api_config: &ApiConfig, state: AppState) -> Router {
	let timeout = state.engine.config().api_request_timeout();

	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/staking/stake", post(handle_stake))
				.route("/staking/unstake", post(handle_unstake))
				.route("/staking/sign", post(handle_sign))
				.route("/staking/broadcast", post(handle_broadcast))
				.route("/transactions/{id}", get(handle_get_transaction)),
		)
		.layer(
			ServiceBuilder::new()
				.layer(TraceLayer::new_for_http())
				.layer(RequestBodyLimitLayer::new(api_config.max_request_size))
				.layer(cors_layer(api_config.cors.as_ref()))
				.layer(TimeoutLayer::with_status_code(
					StatusCode::REQUEST_TIMEOUT,
					timeout,
				)),
		)
		.with_state(state)
}

/// Builds the CORS layer; no `[api.cors]` section means permissive.
fn cors_layer(cors: Option<&CorsConfig>) -> CorsLayer {
	let Some(cors) = cors else {
		return CorsLayer::permissive();
	};

	let mut layer = CorsLayer::new();

	if cors.allowed_origins.iter().any(|o| o == "*") {
		layer = layer.allow_origin(Any);
	} else {
		let origins: Vec<HeaderValue> = cors
			.allowed_origins
			.iter()
			.filter_map(|o| match o.parse() {
				Ok(origin) => Some(origin),
				Err(_) => {
					tracing::warn!(origin = %o, "Ignoring invalid CORS origin");
					None
				},
			})
			.collect();
		layer = layer.allow_origin(origins);
	}

	if cors.allowed_headers.iter().any(|h| h == "*") {
		layer = layer.allow_headers(Any);
	} else {
		let headers: Vec<HeaderName> = cors
			.allowed_headers
			.iter()
			.filter_map(|h| h.parse().ok())
			.collect();
		layer = layer.allow_headers(headers);
	}

	let methods: Vec<Method> = cors
		.allowed_methods
		.iter()
		.filter_map(|m| m.to_ascii_uppercase().parse().ok())
		.collect();
	layer.allow_methods(methods)
}

async fn shutdown_signal() {
	if let Err(e) = tokio::signal::ctrl_c().await {
		tracing::error!(error = %e, "Failed to listen for shutdown signal");
		std::future::pending::<()>().await;
	}
	tracing::info!("Shutdown signal received");
}

/// Unwraps a JSON body, reporting malformed input as an invalid request.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, APIError> {
	body.map(|Json(value)| value).map_err(|rejection| APIError::BadRequest {
		kind: "InvalidRequestError".to_string(),
		message: rejection.body_text(),
		detail: None,
	})
}

/// Logs a failed operation and converts it into the API error body.
fn reject(operation: &str, e: StakingError) -> APIError {
	if e.is_invalid_request() {
		tracing::info!(kind = e.kind(), "{} request rejected: {}", operation, e);
	} else {
		tracing::warn!(kind = e.kind(), "{} request failed: {}", operation, e);
	}
	APIError::from(e)
}

/// Handles POST /api/staking/stake requests.
async fn handle_stake(
	State(state): State<AppState>,
	body: Result<Json<CreateStakeRequest>, JsonRejection>,
) -> Result<Json<CreateTransactionResponse>, APIError> {
	let request = json_body(body)?;
	apis::staking::create_stake(&state.engine, &request)
		.await
		.map(Json)
		.map_err(|e| reject("Stake", e))
}

/// Handles POST /api/staking/unstake requests.
async fn handle_unstake(
	State(state): State<AppState>,
	body: Result<Json<CreateUnstakeRequest>, JsonRejection>,
) -> Result<Json<CreateTransactionResponse>, APIError> {
	let request = json_body(body)?;
	apis::staking::create_unstake(&state.engine, &request)
		.await
		.map(Json)
		.map_err(|e| reject("Unstake", e))
}

/// Handles POST /api/staking/sign requests.
async fn handle_sign(
	State(state): State<AppState>,
	body: Result<Json<SignTransactionRequest>, JsonRejection>,
) -> Result<Json<SignTransactionResponse>, APIError> {
	let request = json_body(body)?;
	apis::staking::sign(&state.engine, &request)
		.await
		.map(Json)
		.map_err(|e| reject("Sign", e))
}

/// Handles POST /api/staking/broadcast requests.
async fn handle_broadcast(
	State(state): State<AppState>,
	body: Result<Json<BroadcastTransactionRequest>, JsonRejection>,
) -> Result<Json<BroadcastTransactionResponse>, APIError> {
	let request = json_body(body)?;
	apis::staking::broadcast(&state.engine, &request)
		.await
		.map(Json)
		.map_err(|e| reject("Broadcast", e))
}

/// Handles GET /api/transactions/{id} requests.
async fn handle_get_transaction(
	Path(id): Path<String>,
	State(state): State<AppState>,
) -> Result<Json<TransactionRecord>, APIError> {
	apis::transactions::get_transaction(&state.engine, &id)
		.await
		.map(Json)
		.map_err(APIError::from)
}
