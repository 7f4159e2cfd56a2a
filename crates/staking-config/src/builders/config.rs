//! Configuration builder for tests.
//!
//! Produces a [`Config`] with memory storage, fast broadcast retries and no
//! signers unless added explicitly.

use crate::{
	AuthScheme, BroadcastConfig, ChainsConfig, Config, GatewayConfig, StorageConfig,
	UpstreamConfig,
};
use staking_types::{Chain, SecretString};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	gateway_id: String,
	base_url: String,
	api_key: String,
	auth: AuthScheme,
	broadcast: BroadcastConfig,
	chains: ChainsConfig,
	signers: HashMap<Chain, HashMap<String, toml::Value>>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	pub fn new() -> Self {
		Self {
			gateway_id: "test-gateway".to_string(),
			base_url: "http://127.0.0.1:9".to_string(),
			api_key: "test-key".to_string(),
			auth: AuthScheme::Bearer,
			broadcast: BroadcastConfig::default(),
			chains: ChainsConfig::default(),
			signers: HashMap::new(),
		}
	}

	pub fn base_url(mut self, url: impl Into<String>) -> Self {
		self.base_url = url.into();
		self
	}

	pub fn auth(mut self, auth: AuthScheme) -> Self {
		self.auth = auth;
		self
	}

	pub fn broadcast(mut self, max_retries: u32, initial_delay_ms: u64) -> Self {
		self.broadcast.max_retries = max_retries;
		self.broadcast.initial_delay_ms = initial_delay_ms;
		self
	}

	pub fn amount_required_for_unstake(mut self, chains: Vec<Chain>) -> Self {
		self.chains.amount_required_for_unstake = chains;
		self
	}

	/// Adds a signer table for a chain/network pair.
	pub fn signer(mut self, chain: Chain, network: &str, table: toml::Value) -> Self {
		self.signers
			.entry(chain)
			.or_default()
			.insert(network.to_string(), table);
		self
	}

	pub fn build(self) -> Config {
		let mut storage_implementations = HashMap::new();
		storage_implementations.insert(
			"memory".to_string(),
			toml::Value::Table(toml::map::Map::new()),
		);

		Config {
			gateway: GatewayConfig {
				id: self.gateway_id,
			},
			upstream: UpstreamConfig {
				base_url: self.base_url,
				api_key: SecretString::new(self.api_key),
				auth: self.auth,
				timeout_seconds: 5,
			},
			broadcast: self.broadcast,
			storage: StorageConfig {
				primary: "memory".to_string(),
				implementations: storage_implementations,
			},
			chains: self.chains,
			signers: self.signers,
			api: None,
		}
	}
}
