//! Chain signing for the staking gateway.
//!
//! Every supported chain belongs to a signer family ([`SignerKind`]). Each
//! family has one [`ChainSigner`] implementation that turns an unsigned
//! upstream payload into the chain's signed wire encoding. The
//! [`SignerService`] dispatches by family through a registry table, resolving
//! credentials for every call and constructing a fresh signer that is
//! dropped, together with its secrets, when the call returns.

use async_trait::async_trait;
use staking_types::{
	Chain, ConfigSchema, CredentialBundle, ImplementationRegistry, SignerKind, UnsignedPayload,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod cosmos;
	pub mod solana;
	pub mod substrate;
}
pub mod resolver;

pub use resolver::{ConfigCredentialResolver, CredentialResolver};

/// Errors that can occur while signing.
#[derive(Debug, Error)]
pub enum SignerError {
	/// A required signing input is missing or blank.
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	/// Chain unknown, or no signer configured for the chain/network.
	#[error("Unsupported chain: {0}")]
	UnsupportedChain(String),
	/// Credentials could not be decoded, decrypted or derived.
	#[error("Invalid credentials: {0}")]
	InvalidCredentials(String),
	/// The unsigned payload is malformed for the chain.
	#[error("Invalid payload: {0}")]
	InvalidPayload(String),
	/// The chain RPC endpoint could not be reached.
	#[error("Connection error: {0}")]
	Connection(String),
	/// Signing failed after the inputs were validated.
	#[error("Signing failed: {0}")]
	Signing(String),
}

/// A signer for one chain family, bound to one credential bundle.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ChainSigner: Send + Sync {
	/// Signs the payload and returns the signed transaction in the chain's
	/// wire encoding (hex for Substrate and Cosmos, base64 for Solana).
	async fn sign(&self, payload: &UnsignedPayload) -> Result<String, SignerError>;
}

/// Creates a signer for `chain` from a credential bundle.
pub type SignerFactory = fn(Chain, CredentialBundle) -> Result<Box<dyn ChainSigner>, SignerError>;

/// Parses and validates a `[signers.<chain>.<network>]` table.
pub type CredentialParser =
	fn(Chain, &str, &toml::Value) -> Result<CredentialBundle, SignerError>;

/// Registry trait for signer families.
pub trait SignerRegistry: ImplementationRegistry<Factory = SignerFactory> {
	const KIND: SignerKind;

	fn credential_parser() -> CredentialParser;
}

/// Everything the gateway needs to know about one signer family.
#[derive(Clone, Copy)]
pub struct SignerImplementation {
	pub name: &'static str,
	pub kind: SignerKind,
	pub factory: SignerFactory,
	pub parse_credentials: CredentialParser,
}

impl SignerImplementation {
	fn of<R: SignerRegistry>() -> Self {
		Self {
			name: R::NAME,
			kind: R::KIND,
			factory: R::factory(),
			parse_credentials: R::credential_parser(),
		}
	}
}

/// Get all registered signer families.
pub fn get_all_implementations() -> Vec<SignerImplementation> {
	use implementations::{cosmos, solana, substrate};

	vec![
		SignerImplementation::of::<substrate::Registry>(),
		SignerImplementation::of::<cosmos::Registry>(),
		SignerImplementation::of::<solana::Registry>(),
	]
}

/// Signs unsigned payloads for any supported chain.
///
/// This is the seam the transaction workflow depends on.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait SignerDispatcher: Send + Sync {
	/// Resolves credentials for `chain`/`network` and signs the payload.
	async fn sign(
		&self,
		chain: Chain,
		network: &str,
		payload: &UnsignedPayload,
	) -> Result<String, SignerError>;
}

/// Validates a signer table against a family's schema.
pub(crate) fn validate_table(
	schema: &dyn ConfigSchema,
	chain: Chain,
	network: &str,
	table: &toml::Value,
) -> Result<(), SignerError> {
	schema.validate(table).map_err(|e| {
		SignerError::InvalidCredentials(format!("signers.{}.{}: {}", chain, network, e))
	})
}

/// Reads a string field from an already validated table.
pub(crate) fn table_str(table: &toml::Value, field: &str) -> Result<String, SignerError> {
	table
		.get(field)
		.and_then(|v| v.as_str())
		.map(str::to_string)
		.ok_or_else(|| SignerError::InvalidCredentials(format!("missing field '{}'", field)))
}

/// Configured RPC endpoint, falling back to the chain's public endpoint.
pub(crate) fn rpc_endpoint(
	chain: Chain,
	network: &str,
	table: &toml::Value,
) -> Result<String, SignerError> {
	table
		.get("rpc_endpoint")
		.and_then(|v| v.as_str())
		.map(str::to_string)
		.or_else(|| chain.default_rpc_endpoint(network).map(str::to_string))
		.ok_or_else(|| {
			SignerError::InvalidCredentials(format!(
				"signers.{}.{}: rpc_endpoint is required for this network",
				chain, network
			))
		})
}

/// Registry-driven dispatcher over the signer families.
pub struct SignerService {
	factories: HashMap<SignerKind, SignerFactory>,
	resolver: Arc<dyn CredentialResolver>,
}

impl SignerService {
	/// Creates a dispatcher over the given signer families.
	pub fn with_factories(
		factories: HashMap<SignerKind, SignerFactory>,
		resolver: Arc<dyn CredentialResolver>,
	) -> Self {
		Self {
			factories,
			resolver,
		}
	}

	/// Signs with explicitly supplied credentials.
	///
	/// The credentials must belong to the chain's signer family. A signer is
	/// built for this call only.
	pub async fn sign_with(
		&self,
		chain: Chain,
		network: &str,
		payload: &UnsignedPayload,
		credentials: CredentialBundle,
	) -> Result<String, SignerError> {
		if network.trim().is_empty() {
			return Err(SignerError::InvalidRequest(format!(
				"network is required to sign for {}",
				chain
			)));
		}

		let kind = chain.signer_kind();
		if credentials.kind() != kind {
			return Err(SignerError::InvalidCredentials(format!(
				"{} credentials cannot sign for {} ({} signer)",
				credentials.kind(),
				chain,
				kind
			)));
		}

		let factory = self.factories.get(&kind).ok_or_else(|| {
			SignerError::UnsupportedChain(format!("{} (no {} signer registered)", chain, kind))
		})?;

		tracing::debug!(chain = %chain, network = %network, signer = %kind, "Dispatching to signer");
		let signer = factory(chain, credentials)?;
		signer.sign(payload).await
	}
}

#[async_trait]
impl SignerDispatcher for SignerService {
	async fn sign(
		&self,
		chain: Chain,
		network: &str,
		payload: &UnsignedPayload,
	) -> Result<String, SignerError> {
		let credentials = self.resolver.resolve(chain, network).await?;
		self.sign_with(chain, network, payload, credentials).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use resolver::MockCredentialResolver;
	use staking_types::SecretString;

	fn payload() -> UnsignedPayload {
		UnsignedPayload::from_json(r#""0x0400""#).unwrap()
	}

	fn solana_bundle() -> CredentialBundle {
		CredentialBundle::Solana {
			rpc_endpoint: "https://api.testnet.solana.com".into(),
			secret_key: SecretString::from("key"),
		}
	}

	fn fixed_signer(_chain: Chain, _creds: CredentialBundle) -> Result<Box<dyn ChainSigner>, SignerError> {
		let mut signer = MockChainSigner::new();
		signer
			.expect_sign()
			.returning(|_| Ok("signed-by-mock".to_string()));
		Ok(Box::new(signer))
	}

	fn service(resolver: MockCredentialResolver) -> SignerService {
		let mut factories: HashMap<SignerKind, SignerFactory> = HashMap::new();
		factories.insert(SignerKind::Solana, fixed_signer);
		SignerService::with_factories(factories, Arc::new(resolver))
	}

	#[tokio::test]
	async fn test_dispatches_by_family_with_resolved_credentials() {
		let mut resolver = MockCredentialResolver::new();
		resolver
			.expect_resolve()
			.withf(|chain, network| *chain == Chain::Solana && network == "testnet")
			.times(1)
			.returning(|_, _| Ok(solana_bundle()));

		let chain: Chain = "SOLANA".parse().unwrap();
		let signed = SignerDispatcher::sign(&service(resolver), chain, "testnet", &payload())
			.await
			.unwrap();
		assert_eq!(signed, "signed-by-mock");
	}

	#[tokio::test]
	async fn test_unregistered_family_is_unsupported() {
		let mut resolver = MockCredentialResolver::new();
		resolver
			.expect_resolve()
			.times(1)
			.returning(|_, _| {
				Ok(CredentialBundle::Cosmos {
					rpc_endpoint: "https://rpc.example".into(),
					mnemonic: SecretString::from("words"),
					signer_address: "celestia1signer".into(),
				})
			});

		let err = SignerDispatcher::sign(
			&service(resolver),
			Chain::Celestia,
			"celestia-mocha-testnet",
			&payload(),
		)
		.await
		.unwrap_err();
		assert!(matches!(err, SignerError::UnsupportedChain(_)));
	}

	#[tokio::test]
	async fn test_mismatched_credentials_rejected() {
		let resolver = MockCredentialResolver::new();
		let err = service(resolver)
			.sign_with(Chain::Polkadot, "westend", &payload(), solana_bundle())
			.await
			.unwrap_err();
		assert!(matches!(err, SignerError::InvalidCredentials(_)));
	}

	#[tokio::test]
	async fn test_blank_network_is_invalid_request() {
		for network in ["", " "] {
			let err = service(MockCredentialResolver::new())
				.sign_with(Chain::Solana, network, &payload(), solana_bundle())
				.await
				.unwrap_err();
			assert!(matches!(err, SignerError::InvalidRequest(_)), "{network:?}");
		}
	}

	#[test]
	fn test_every_family_registered() {
		let kinds: Vec<SignerKind> = get_all_implementations().iter().map(|i| i.kind).collect();
		for chain in Chain::all() {
			assert!(kinds.contains(&chain.signer_kind()));
		}
	}
}
