//! Credential resolution.
//!
//! The resolver is the only signer component that touches configuration or
//! the process environment. It is asked for credentials on every signing call
//! and keeps no parsed secrets between calls.

use crate::{get_all_implementations, CredentialParser, SignerError};
use async_trait::async_trait;
use staking_types::{Chain, CredentialBundle, SignerKind};
use std::collections::HashMap;

/// Supplies the credential bundle for a chain/network pair.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait CredentialResolver: Send + Sync {
	async fn resolve(&self, chain: Chain, network: &str) -> Result<CredentialBundle, SignerError>;
}

/// Resolves credentials from `[signers.<chain>.<network>]` tables.
///
/// For Solana, a missing table falls back to the `PRIVATE_KEYS_SOLANA_<NETWORK>`
/// environment variable, read at call time.
pub struct ConfigCredentialResolver {
	tables: HashMap<Chain, HashMap<String, toml::Value>>,
	parsers: HashMap<SignerKind, CredentialParser>,
}

impl ConfigCredentialResolver {
	pub fn new(tables: HashMap<Chain, HashMap<String, toml::Value>>) -> Self {
		let parsers = get_all_implementations()
			.into_iter()
			.map(|imp| (imp.kind, imp.parse_credentials))
			.collect();
		Self { tables, parsers }
	}

	/// Validates every configured table up front so a broken signer section
	/// is reported at startup rather than on the first signing request.
	pub fn validate_all(&self) -> Result<(), SignerError> {
		for (chain, networks) in &self.tables {
			for (network, table) in networks {
				self.parse(*chain, network, table)?;
			}
		}
		Ok(())
	}

	fn parse(
		&self,
		chain: Chain,
		network: &str,
		table: &toml::Value,
	) -> Result<CredentialBundle, SignerError> {
		let parser = self.parsers.get(&chain.signer_kind()).ok_or_else(|| {
			SignerError::UnsupportedChain(format!("{} (no {} signer registered)", chain, chain.signer_kind()))
		})?;
		parser(chain, network, table)
	}
}

/// Environment variable holding a Solana secret key for `network`.
pub fn solana_key_env_var(network: &str) -> String {
	format!(
		"PRIVATE_KEYS_SOLANA_{}",
		network.to_ascii_uppercase().replace('-', "_")
	)
}

#[async_trait]
impl CredentialResolver for ConfigCredentialResolver {
	async fn resolve(&self, chain: Chain, network: &str) -> Result<CredentialBundle, SignerError> {
		if let Some(table) = self.tables.get(&chain).and_then(|nets| nets.get(network)) {
			return self.parse(chain, network, table);
		}

		if chain == Chain::Solana {
			if let Ok(secret_key) = std::env::var(solana_key_env_var(network)) {
				let mut table = toml::map::Map::new();
				table.insert("secret_key".into(), toml::Value::String(secret_key));
				return self.parse(chain, network, &toml::Value::Table(table));
			}
		}

		Err(SignerError::UnsupportedChain(format!(
			"{}/{} (no signer configured)",
			chain, network
		)))
	}
}
