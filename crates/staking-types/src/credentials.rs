//! Signer credential bundles.
//!
//! A bundle carries everything one signer needs for one chain/network pair.
//! Bundles are resolved for every signing call and dropped when it returns,
//! which zeroizes the secret fields.

use crate::{SecretString, SignerKind};
use std::path::PathBuf;

/// Credentials for one signer family.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialBundle {
	/// Encrypted polkadot-js keyring export plus its password.
	Substrate {
		rpc_endpoint: String,
		keyring_file: PathBuf,
		keyring_password: SecretString,
	},
	/// BIP-39 mnemonic and the bech32 address it must derive to.
	Cosmos {
		rpc_endpoint: String,
		mnemonic: SecretString,
		signer_address: String,
	},
	/// Ed25519 secret key, base58 or a JSON byte array.
	Solana {
		rpc_endpoint: String,
		secret_key: SecretString,
	},
}

impl CredentialBundle {
	/// Signer family these credentials are meant for.
	pub fn kind(&self) -> SignerKind {
		match self {
			CredentialBundle::Substrate { .. } => SignerKind::Substrate,
			CredentialBundle::Cosmos { .. } => SignerKind::Cosmos,
			CredentialBundle::Solana { .. } => SignerKind::Solana,
		}
	}

	pub fn rpc_endpoint(&self) -> &str {
		match self {
			CredentialBundle::Substrate { rpc_endpoint, .. }
			| CredentialBundle::Cosmos { rpc_endpoint, .. }
			| CredentialBundle::Solana { rpc_endpoint, .. } => rpc_endpoint,
		}
	}
}
