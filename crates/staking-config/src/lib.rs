//! Configuration for the staking gateway.
//!
//! Configuration is read from TOML. String values may reference environment
//! variables as `${VAR}` or `${VAR:-default}`; they are substituted before the
//! document is parsed, which is how API keys, mnemonics and keyring passwords
//! are kept out of the files themselves.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files:
//! - Use `include = ["signers.toml", "storage.toml"]` to include other files
//! - Each top-level section must be unique across all files

#[cfg(feature = "testing")]
pub mod builders;
mod loader;

pub use loader::ConfigLoader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use staking_types::{Chain, SecretString};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	pub gateway: GatewayConfig,
	pub upstream: UpstreamConfig,
	#[serde(default)]
	pub broadcast: BroadcastConfig,
	pub storage: StorageConfig,
	#[serde(default)]
	pub chains: ChainsConfig,
	/// Signer credential tables keyed by chain, then network.
	#[serde(default)]
	pub signers: HashMap<Chain, HashMap<String, toml::Value>>,
	pub api: Option<ApiConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
	pub id: String,
}

/// How the API key is presented to the upstream staking API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthScheme {
	/// `Authorization: Bearer <key>`
	#[default]
	Bearer,
	/// `X-API-Key: <key>`
	ApiKey,
}

/// Unified staking API connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
	pub base_url: String,
	pub api_key: SecretString,
	#[serde(default)]
	pub auth: AuthScheme,
	#[serde(default = "default_upstream_timeout")]
	pub timeout_seconds: u64,
}

fn default_upstream_timeout() -> u64 {
	30
}

/// Retry policy for the broadcast step.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BroadcastConfig {
	/// Retries after the first attempt.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	/// Delay before the first retry; doubled for every further retry.
	#[serde(default = "default_initial_delay_ms")]
	pub initial_delay_ms: u64,
	/// Substring of an HTTP 500 body that marks an upstream timeout.
	#[serde(default = "default_timeout_indicator")]
	pub timeout_indicator: String,
}

fn default_max_retries() -> u32 {
	3
}

fn default_initial_delay_ms() -> u64 {
	2000
}

fn default_timeout_indicator() -> String {
	"timeout".to_string()
}

impl Default for BroadcastConfig {
	fn default() -> Self {
		Self {
			max_retries: default_max_retries(),
			initial_delay_ms: default_initial_delay_ms(),
			timeout_indicator: default_timeout_indicator(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	pub primary: String,
	pub implementations: HashMap<String, toml::Value>,
}

/// Per-chain request rules.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainsConfig {
	/// Chains whose unstake requests must carry an amount.
	#[serde(default = "default_amount_required_for_unstake")]
	pub amount_required_for_unstake: Vec<Chain>,
}

fn default_amount_required_for_unstake() -> Vec<Chain> {
	vec![Chain::Polkadot, Chain::Solana, Chain::Celestia]
}

impl Default for ChainsConfig {
	fn default() -> Self {
		Self {
			amount_required_for_unstake: default_amount_required_for_unstake(),
		}
	}
}

/// HTTP API server settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApiConfig {
	#[serde(default)]
	pub enabled: bool,
	#[serde(default = "default_api_host")]
	pub host: String,
	#[serde(default = "default_api_port")]
	pub port: u16,
	/// Request timeout. Derived from the broadcast budget when absent.
	#[serde(default)]
	pub timeout_seconds: Option<u64>,
	#[serde(default = "default_max_request_size")]
	pub max_request_size: usize,
	pub cors: Option<CorsConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CorsConfig {
	pub allowed_origins: Vec<String>,
	pub allowed_headers: Vec<String>,
	pub allowed_methods: Vec<String>,
}

fn default_api_host() -> String {
	"127.0.0.1".to_string()
}

fn default_api_port() -> u16 {
	3000
}

/// Headroom on top of the broadcast budget for the derived API timeout.
const API_TIMEOUT_MARGIN: Duration = Duration::from_secs(5);

fn default_max_request_size() -> usize {
	1024 * 1024
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable
/// `VAR_NAME`, or with `default_value` for `${VAR_NAME:-default_value}`.
/// Input is limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut result = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(var_name.as_str()), cap.get(2)) {
			(Ok(v), _) => v,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					var_name.as_str()
				)))
			},
		};
		result.push_str(&input[last..full_match.start()]);
		result.push_str(&value);
		last = full_match.end();
	}
	result.push_str(&input[last..]);

	Ok(result)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Signer table for a chain/network pair, if configured.
	pub fn signer_config(&self, chain: Chain, network: &str) -> Option<&toml::Value> {
		self.signers.get(&chain).and_then(|nets| nets.get(network))
	}

	/// Whether unstake requests for `chain` must carry an amount.
	pub fn requires_unstake_amount(&self, chain: Chain) -> bool {
		self.chains.amount_required_for_unstake.contains(&chain)
	}

	/// Longest a broadcast can run: every attempt hitting the upstream
	/// timeout, plus every backoff delay.
	pub fn broadcast_budget(&self) -> Duration {
		let attempts = u64::from(self.broadcast.max_retries) + 1;
		let requests = Duration::from_secs(self.upstream.timeout_seconds.saturating_mul(attempts));
		let delays_ms: u64 = (0..self.broadcast.max_retries)
			.map(|retry| self.broadcast.initial_delay_ms.saturating_mul(1u64 << retry))
			.sum();
		requests + Duration::from_millis(delays_ms)
	}

	/// Request timeout for the HTTP API.
	pub fn api_request_timeout(&self) -> Duration {
		match self.api.as_ref().and_then(|api| api.timeout_seconds) {
			Some(secs) => Duration::from_secs(secs),
			None => self.broadcast_budget() + API_TIMEOUT_MARGIN,
		}
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.gateway.id.trim().is_empty() {
			return Err(ConfigError::Validation("Gateway ID cannot be empty".into()));
		}

		let base_url = self.upstream.base_url.trim();
		if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
			return Err(ConfigError::Validation(format!(
				"Upstream base_url must be an http(s) URL, got '{}'",
				base_url
			)));
		}
		if self.upstream.api_key.is_empty() {
			return Err(ConfigError::Validation(
				"Upstream api_key cannot be empty".into(),
			));
		}
		if self.upstream.timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"Upstream timeout_seconds must be greater than 0".into(),
			));
		}

		if self.broadcast.max_retries > 10 {
			return Err(ConfigError::Validation(
				"Broadcast max_retries cannot exceed 10".into(),
			));
		}
		if self.broadcast.initial_delay_ms == 0 || self.broadcast.initial_delay_ms > 60_000 {
			return Err(ConfigError::Validation(
				"Broadcast initial_delay_ms must be between 1 and 60000".into(),
			));
		}
		if self.broadcast.timeout_indicator.trim().is_empty() {
			return Err(ConfigError::Validation(
				"Broadcast timeout_indicator cannot be empty".into(),
			));
		}

		if self.storage.primary.is_empty() {
			return Err(ConfigError::Validation(
				"Storage primary implementation cannot be empty".into(),
			));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(ConfigError::Validation(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}

		if let Some(secs) = self.api.as_ref().and_then(|api| api.timeout_seconds) {
			let budget = self.broadcast_budget();
			if Duration::from_secs(secs) < budget {
				return Err(ConfigError::Validation(format!(
					"API timeout_seconds ({}) is shorter than the broadcast budget ({}s)",
					secs,
					budget.as_secs_f64().ceil()
				)));
			}
		}

		for (chain, networks) in &self.signers {
			for (network, table) in networks {
				if network.trim().is_empty() {
					return Err(ConfigError::Validation(format!(
						"Signer network name for {} cannot be empty",
						chain
					)));
				}
				if !table.is_table() {
					return Err(ConfigError::Validation(format!(
						"Signer config for {}.{} must be a table",
						chain, network
					)));
				}
			}
		}

		Ok(())
	}
}

/// Parses a TOML string, resolving environment variables and validating the
/// result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}
