//! Block explorer links for broadcast transactions.

use crate::Chain;

/// Explorer URL template: the hash goes between `prefix` and `suffix`.
struct ExplorerTemplate {
	chain: Chain,
	network: &'static str,
	prefix: &'static str,
	suffix: &'static str,
}

const EXPLORERS: &[ExplorerTemplate] = &[
	ExplorerTemplate {
		chain: Chain::Polkadot,
		network: "mainnet",
		prefix: "https://polkadot.subscan.io/extrinsic/",
		suffix: "",
	},
	ExplorerTemplate {
		chain: Chain::Polkadot,
		network: "westend",
		prefix: "https://westend.subscan.io/extrinsic/",
		suffix: "",
	},
	ExplorerTemplate {
		chain: Chain::Solana,
		network: "mainnet-beta",
		prefix: "https://explorer.solana.com/tx/",
		suffix: "",
	},
	ExplorerTemplate {
		chain: Chain::Solana,
		network: "testnet",
		prefix: "https://explorer.solana.com/tx/",
		suffix: "?cluster=testnet",
	},
	ExplorerTemplate {
		chain: Chain::Celestia,
		network: "celestia-mainnet-beta",
		prefix: "https://explorer.celestia.org/mainnet/tx/",
		suffix: "",
	},
	ExplorerTemplate {
		chain: Chain::Celestia,
		network: "celestia-mocha-testnet",
		prefix: "https://testnet.celenium.io/tx/",
		suffix: "",
	},
	ExplorerTemplate {
		chain: Chain::Cosmos,
		network: "cosmoshub-4",
		prefix: "https://www.mintscan.io/cosmos/tx/",
		suffix: "",
	},
	ExplorerTemplate {
		chain: Chain::Sei,
		network: "sei-mainnet",
		prefix: "https://seitrace.com/tx/",
		suffix: "?chain=pacific-1",
	},
	ExplorerTemplate {
		chain: Chain::Sei,
		network: "sei-testnet",
		prefix: "https://seitrace.com/tx/",
		suffix: "?chain=atlantic-2",
	},
];

/// Returns the explorer link for a transaction hash, if one is known for the
/// chain/network pair. Unknown pairs and empty hashes yield `None`.
pub fn explorer_url(chain: Chain, network: &str, tx_hash: &str) -> Option<String> {
	if tx_hash.is_empty() {
		return None;
	}
	EXPLORERS
		.iter()
		.find(|t| t.chain == chain && t.network == network)
		.map(|t| format!("{}{}{}", t.prefix, tx_hash, t.suffix))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_known_explorers() {
		assert_eq!(
			explorer_url(Chain::Polkadot, "westend", "0xabc").as_deref(),
			Some("https://westend.subscan.io/extrinsic/0xabc")
		);
		assert_eq!(
			explorer_url(Chain::Solana, "testnet", "5sig").as_deref(),
			Some("https://explorer.solana.com/tx/5sig?cluster=testnet")
		);
		assert_eq!(
			explorer_url(Chain::Celestia, "celestia-mocha-testnet", "ABCD").as_deref(),
			Some("https://testnet.celenium.io/tx/ABCD")
		);
	}

	#[test]
	fn test_unknown_pair_or_empty_hash() {
		assert_eq!(explorer_url(Chain::Cosmos, "theta-testnet-001", "ABCD"), None);
		assert_eq!(explorer_url(Chain::Polkadot, "kusama", "0xabc"), None);
		assert_eq!(explorer_url(Chain::Polkadot, "mainnet", ""), None);
	}
}
