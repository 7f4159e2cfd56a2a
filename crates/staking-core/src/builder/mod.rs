//! Builder for constructing staking engines.
//!
//! Composes a StakingEngine from the configured storage backend, the upstream
//! client and the signer families, using factory functions so binaries and
//! tests can swap implementations.

use crate::engine::StakingEngine;
use staking_config::Config;
use staking_signer::{ConfigCredentialResolver, SignerFactory, SignerService};
use staking_storage::{StorageFactory, StorageService};
use staking_types::SignerKind;
use staking_upstream::UpstreamFactory;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Factory functions for every pluggable component.
pub struct StakingFactories {
	pub storage_factories: HashMap<String, StorageFactory>,
	pub upstream_factory: UpstreamFactory,
	pub signer_factories: HashMap<SignerKind, SignerFactory>,
}

impl StakingFactories {
	/// Every implementation compiled into the workspace.
	pub fn registered() -> Self {
		let storage_factories = staking_storage::get_all_implementations()
			.into_iter()
			.map(|(name, factory)| (name.to_string(), factory))
			.collect();
		let signer_factories = staking_signer::get_all_implementations()
			.into_iter()
			.map(|imp| (imp.kind, imp.factory))
			.collect();

		Self {
			storage_factories,
			upstream_factory: staking_upstream::implementations::http::create_upstream,
			signer_factories,
		}
	}
}

/// Builder for constructing a StakingEngine with pluggable implementations.
pub struct StakingBuilder {
	config: Config,
}

impl StakingBuilder {
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	pub fn build(self, factories: StakingFactories) -> Result<StakingEngine, BuilderError> {
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			let Some(factory) = factories.storage_factories.get(name) else {
				tracing::warn!(component = "storage", implementation = %name, "Unknown implementation, skipping");
				continue;
			};
			match factory(config) {
				Ok(implementation) => {
					let is_primary = &self.config.storage.primary == name;
					tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
					storage_impls.insert(name.clone(), implementation);
				},
				Err(e) => {
					tracing::error!(
						component = "storage",
						implementation = %name,
						error = %e,
						"Failed to create storage implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create storage implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has invalid configuration",
				primary_storage
			))
		})?;
		let storage = Arc::new(StorageService::new(storage_backend));

		let upstream = (factories.upstream_factory)(&self.config.upstream).map_err(|e| {
			tracing::error!(component = "upstream", error = %e, "Failed to create upstream client");
			BuilderError::Config(format!("Failed to create upstream client: {}", e))
		})?;
		tracing::info!(component = "upstream", base_url = %self.config.upstream.base_url, "Loaded");

		let resolver = ConfigCredentialResolver::new(self.config.signers.clone());
		resolver.validate_all().map_err(|e| {
			tracing::error!(component = "signer", error = %e, "Invalid signer configuration");
			BuilderError::Config(format!("Invalid signer configuration: {}", e))
		})?;
		for (chain, networks) in &self.config.signers {
			for network in networks.keys() {
				tracing::info!(component = "signer", chain = %chain, network = %network, signer = %chain.signer_kind(), "Loaded");
			}
		}
		let signer = SignerService::with_factories(factories.signer_factories, Arc::new(resolver));

		Ok(StakingEngine::new(
			self.config,
			storage,
			Arc::from(upstream),
			Arc::new(signer),
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use staking_config::builders::ConfigBuilder;
	use staking_types::Chain;

	#[test]
	fn test_builds_with_registered_factories() {
		let config = ConfigBuilder::new().build();
		assert!(StakingBuilder::new(config)
			.build(StakingFactories::registered())
			.is_ok());
	}

	#[test]
	fn test_missing_primary_storage() {
		let mut config = ConfigBuilder::new().build();
		config.storage.primary = "redis".into();
		let err = StakingBuilder::new(config)
			.build(StakingFactories::registered())
			.err()
			.unwrap();
		assert!(err.to_string().contains("redis"));
	}

	#[test]
	fn test_malformed_signer_table_fails_startup() {
		let config = ConfigBuilder::new()
			.signer(
				Chain::Celestia,
				"celestia-mocha-testnet",
				toml::from_str("mnemonic = \"\"").unwrap(),
			)
			.build();
		let err = StakingBuilder::new(config)
			.build(StakingFactories::registered())
			.err()
			.unwrap();
		assert!(matches!(err, BuilderError::Config(_)));
	}
}
