//! Supported chains and the signer family each one uses.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a chain name is not one of the supported chains.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported chain: {0}")]
pub struct UnsupportedChain(pub String);

/// Family of signing scheme a chain belongs to.
///
/// Signer implementations are registered per family, so adding a chain
/// that shares an existing scheme only needs a new [`Chain`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignerKind {
	/// Substrate extrinsic signing from an encrypted sr25519 keyring.
	Substrate,
	/// Cosmos-SDK direct signing from a BIP-39 mnemonic.
	Cosmos,
	/// Ed25519 keypair signing of a serialized Solana message.
	Solana,
}

impl SignerKind {
	/// Name used for the signer implementation in configuration and logs.
	pub fn as_str(&self) -> &'static str {
		match self {
			SignerKind::Substrate => "substrate",
			SignerKind::Cosmos => "cosmos",
			SignerKind::Solana => "solana",
		}
	}
}

impl fmt::Display for SignerKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A blockchain the gateway can stake on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chain {
	Polkadot,
	Celestia,
	Sei,
	Cosmos,
	Solana,
}

impl Chain {
	/// Returns an iterator over every supported chain.
	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Polkadot,
			Self::Celestia,
			Self::Sei,
			Self::Cosmos,
			Self::Solana,
		]
		.into_iter()
	}

	/// Canonical lowercase name, as used in records and upstream requests.
	pub fn as_str(&self) -> &'static str {
		match self {
			Chain::Polkadot => "polkadot",
			Chain::Celestia => "celestia",
			Chain::Sei => "sei",
			Chain::Cosmos => "cosmos",
			Chain::Solana => "solana",
		}
	}

	/// Signer family used to sign transactions for this chain.
	pub fn signer_kind(&self) -> SignerKind {
		match self {
			Chain::Polkadot => SignerKind::Substrate,
			Chain::Celestia | Chain::Sei | Chain::Cosmos => SignerKind::Cosmos,
			Chain::Solana => SignerKind::Solana,
		}
	}

	/// Network used when a request does not name one.
	pub fn default_network(&self) -> &'static str {
		self.networks()[0]
	}

	/// Networks known for this chain, mainnet first.
	pub fn networks(&self) -> &'static [&'static str] {
		match self {
			Chain::Polkadot => &["mainnet", "westend"],
			Chain::Celestia => &["celestia-mainnet-beta", "celestia-mocha-testnet"],
			Chain::Sei => &["sei-mainnet", "sei-testnet"],
			Chain::Cosmos => &["cosmoshub-4", "theta-testnet-001"],
			Chain::Solana => &["mainnet-beta", "testnet"],
		}
	}

	/// Bech32 address prefix for Cosmos-SDK chains.
	pub fn bech32_prefix(&self) -> Option<&'static str> {
		match self {
			Chain::Celestia => Some("celestia"),
			Chain::Sei => Some("sei"),
			Chain::Cosmos => Some("cosmos"),
			Chain::Polkadot | Chain::Solana => None,
		}
	}

	/// Public RPC endpoint used when signer configuration omits one.
	pub fn default_rpc_endpoint(&self, network: &str) -> Option<&'static str> {
		match (self, network) {
			(Chain::Polkadot, "mainnet") => Some("wss://rpc.polkadot.io"),
			(Chain::Polkadot, "westend") => Some("wss://westend-rpc.polkadot.io"),
			(Chain::Celestia, "celestia-mainnet-beta") => Some("https://celestia-rpc.polkachu.com"),
			(Chain::Celestia, "celestia-mocha-testnet") => Some("https://rpc-mocha.pops.one"),
			(Chain::Sei, "sei-mainnet") => Some("https://rpc.sei-apis.com"),
			(Chain::Sei, "sei-testnet") => Some("https://rpc.atlantic-2.sei-apis.com"),
			(Chain::Solana, "mainnet-beta") => Some("https://api.mainnet-beta.solana.com"),
			(Chain::Solana, "testnet") => Some("https://api.testnet.solana.com"),
			_ => None,
		}
	}
}

impl fmt::Display for Chain {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Chain {
	type Err = UnsupportedChain;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let normalized = s.trim().to_ascii_lowercase();
		Chain::all()
			.find(|chain| chain.as_str() == normalized)
			.ok_or_else(|| UnsupportedChain(s.to_string()))
	}
}

impl Serialize for Chain {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for Chain {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_parse_is_case_insensitive() {
		assert_eq!("Polkadot".parse::<Chain>().unwrap(), Chain::Polkadot);
		assert_eq!("SEI".parse::<Chain>().unwrap(), Chain::Sei);
		assert_eq!(" solana ".parse::<Chain>().unwrap(), Chain::Solana);
	}

	#[test]
	fn test_parse_unknown_chain() {
		let err = "ethereum".parse::<Chain>().unwrap_err();
		assert_eq!(err, UnsupportedChain("ethereum".to_string()));
	}

	#[test]
	fn test_signer_families() {
		assert_eq!(Chain::Polkadot.signer_kind(), SignerKind::Substrate);
		assert_eq!(Chain::Celestia.signer_kind(), SignerKind::Cosmos);
		assert_eq!(Chain::Sei.signer_kind(), SignerKind::Cosmos);
		assert_eq!(Chain::Cosmos.signer_kind(), SignerKind::Cosmos);
		assert_eq!(Chain::Solana.signer_kind(), SignerKind::Solana);
	}

	#[test]
	fn test_defaults() {
		assert_eq!(Chain::Polkadot.default_network(), "mainnet");
		assert_eq!(Chain::Celestia.default_network(), "celestia-mainnet-beta");
		assert_eq!(Chain::Solana.default_network(), "mainnet-beta");
		assert_eq!(
			Chain::Sei.default_rpc_endpoint("sei-testnet"),
			Some("https://rpc.atlantic-2.sei-apis.com")
		);
		assert_eq!(Chain::Cosmos.default_rpc_endpoint("cosmoshub-4"), None);
	}

	#[test]
	fn test_serde_uses_lowercase_names() {
		let json = serde_json::to_string(&Chain::Celestia).unwrap();
		assert_eq!(json, "\"celestia\"");
		let chain: Chain = serde_json::from_str("\"Celestia\"").unwrap();
		assert_eq!(chain, Chain::Celestia);
	}
}
