//! Substrate extrinsic signer, used for Polkadot.
//!
//! The upstream payload is SCALE-encoded call data as a hex string. The
//! signer decrypts a polkadot-js keyring export, connects to the node for the
//! live signing context (nonce, runtime version, genesis hash) and returns
//! the signed extrinsic as `0x`-prefixed hex.

use crate::{
	rpc_endpoint, table_str, validate_table, ChainSigner, CredentialParser, SignerError,
	SignerFactory, SignerRegistry,
};
use async_trait::async_trait;
use staking_types::{
	without_0x_prefix, Chain, ConfigSchema, CredentialBundle, Field, FieldType,
	ImplementationRegistry, Schema, SecretString, SignerKind, UnsignedPayload, ValidationError,
};
use std::path::{Path, PathBuf};
use subxt::ext::subxt_core;
use subxt::{OnlineClient, PolkadotConfig};
use subxt_signer::sr25519::Keypair;

/// Call data the upstream API has already encoded.
struct RawCall(Vec<u8>);

impl subxt::tx::Payload for RawCall {
	fn encode_call_data_to(
		&self,
		_metadata: &subxt_core::Metadata,
		out: &mut Vec<u8>,
	) -> Result<(), subxt_core::Error> {
		out.extend_from_slice(&self.0);
		Ok(())
	}
}

pub struct SubstrateSigner {
	chain: Chain,
	rpc_endpoint: String,
	keyring_file: PathBuf,
	keyring_password: SecretString,
}

impl SubstrateSigner {
	pub fn new(
		chain: Chain,
		rpc_endpoint: String,
		keyring_file: PathBuf,
		keyring_password: SecretString,
	) -> Self {
		Self {
			chain,
			rpc_endpoint,
			keyring_file,
			keyring_password,
		}
	}

	async fn connect(&self) -> Result<OnlineClient<PolkadotConfig>, SignerError> {
		let url = self.rpc_endpoint.as_str();
		let client = if url.starts_with("wss://") || url.starts_with("https://") {
			OnlineClient::<PolkadotConfig>::from_url(url).await
		} else {
			OnlineClient::<PolkadotConfig>::from_insecure_url(url).await
		};
		client.map_err(|e| SignerError::Connection(format!("{}: {}", url, e)))
	}
}

/// Extracts the call bytes from a payload holding a hex string.
pub fn decode_call_data(payload: &UnsignedPayload) -> Result<Vec<u8>, SignerError> {
	let hex_str = payload.as_str().ok_or_else(|| {
		SignerError::InvalidPayload("expected a hex string of call data".to_string())
	})?;
	let bytes = hex::decode(without_0x_prefix(hex_str.trim()))
		.map_err(|e| SignerError::InvalidPayload(format!("call data is not valid hex: {}", e)))?;
	if bytes.is_empty() {
		return Err(SignerError::InvalidPayload("call data is empty".to_string()));
	}
	Ok(bytes)
}

/// Reads and decrypts a polkadot-js sr25519 keyring export.
pub async fn load_keyring(path: &Path, password: &SecretString) -> Result<Keypair, SignerError> {
	let json = tokio::fs::read_to_string(path).await.map_err(|e| {
		SignerError::InvalidCredentials(format!("cannot read keyring {}: {}", path.display(), e))
	})?;
	password
		.with_exposed(|pw| subxt_signer::polkadot_js_compat::decrypt_json(&json, pw))
		.map_err(|e| SignerError::InvalidCredentials(format!("cannot decrypt keyring: {}", e)))
}

#[async_trait]
impl ChainSigner for SubstrateSigner {
	async fn sign(&self, payload: &UnsignedPayload) -> Result<String, SignerError> {
		let call = RawCall(decode_call_data(payload)?);
		let keypair = load_keyring(&self.keyring_file, &self.keyring_password).await?;

		let api = self.connect().await?;
		tracing::debug!(chain = %self.chain, endpoint = %self.rpc_endpoint, "Connected to substrate node");

		let result = api
			.tx()
			.create_signed(&call, &keypair, Default::default())
			.await
			.map(|signed| format!("0x{}", hex::encode(signed.encoded())))
			.map_err(|e| SignerError::Signing(e.to_string()));

		// Closes the RPC session on both the success and error paths.
		drop(api);
		result
	}
}

/// Configuration schema for Substrate signer tables.
pub struct SubstrateSignerSchema;

impl ConfigSchema for SubstrateSignerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![
				Field::non_empty_string("keyring_file"),
				Field::non_empty_string("keyring_password"),
			],
			vec![Field::new("rpc_endpoint", FieldType::String)],
		)
		.validate(config)
	}
}

/// Parses a `[signers.polkadot.<network>]` table.
///
/// Configuration parameters:
/// - `keyring_file`: path to the encrypted keyring JSON export
/// - `keyring_password`: password for the export
/// - `rpc_endpoint`: ws(s) URL (default: the network's public endpoint)
pub fn parse_credentials(
	chain: Chain,
	network: &str,
	table: &toml::Value,
) -> Result<CredentialBundle, SignerError> {
	validate_table(&SubstrateSignerSchema, chain, network, table)?;
	Ok(CredentialBundle::Substrate {
		rpc_endpoint: rpc_endpoint(chain, network, table)?,
		keyring_file: PathBuf::from(table_str(table, "keyring_file")?),
		keyring_password: SecretString::new(table_str(table, "keyring_password")?),
	})
}

pub fn create_signer(
	chain: Chain,
	credentials: CredentialBundle,
) -> Result<Box<dyn ChainSigner>, SignerError> {
	match credentials {
		CredentialBundle::Substrate {
			rpc_endpoint,
			keyring_file,
			keyring_password,
		} => Ok(Box::new(SubstrateSigner::new(
			chain,
			rpc_endpoint,
			keyring_file,
			keyring_password,
		))),
		other => Err(SignerError::InvalidCredentials(format!(
			"substrate signer cannot use {} credentials",
			other.kind()
		))),
	}
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "substrate";
	type Factory = SignerFactory;

	fn factory() -> Self::Factory {
		create_signer
	}
}

impl SignerRegistry for Registry {
	const KIND: SignerKind = SignerKind::Substrate;

	fn credential_parser() -> CredentialParser {
		parse_credentials
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_decode_call_data() {
		let payload = UnsignedPayload::from_json(r#""0x0700e40b5402""#).unwrap();
		assert_eq!(
			decode_call_data(&payload).unwrap(),
			vec![0x07, 0x00, 0xe4, 0x0b, 0x54, 0x02]
		);

		let no_prefix = UnsignedPayload::from_json(r#""0700""#).unwrap();
		assert_eq!(decode_call_data(&no_prefix).unwrap(), vec![0x07, 0x00]);
	}

	#[test]
	fn test_decode_rejects_malformed_payloads() {
		for raw in [r#""0xzz""#, r#""0x""#, r#"{"call":"0x00"}"#, "42"] {
			let payload = UnsignedPayload::from_json(raw).unwrap();
			assert!(
				matches!(decode_call_data(&payload), Err(SignerError::InvalidPayload(_))),
				"accepted {raw}"
			);
		}
	}

	#[tokio::test]
	async fn test_invalid_payload_fails_before_keyring_or_network() {
		let signer = SubstrateSigner::new(
			Chain::Polkadot,
			"ws://127.0.0.1:1".into(),
			PathBuf::from("/nonexistent/keyring.json"),
			SecretString::from("pw"),
		);
		let payload = UnsignedPayload::from_json(r#""not hex""#).unwrap();
		let err = signer.sign(&payload).await.unwrap_err();
		assert!(matches!(err, SignerError::InvalidPayload(_)));
	}

	#[tokio::test]
	async fn test_unreadable_or_garbage_keyring_is_invalid_credentials() {
		let missing =
			load_keyring(Path::new("/nonexistent/keyring.json"), &SecretString::from("pw")).await;
		assert!(matches!(missing, Err(SignerError::InvalidCredentials(_))));

		let temp_dir = TempDir::new().unwrap();
		let path = temp_dir.path().join("keyring.json");
		std::fs::write(&path, r#"{"encoded":"AAAA","encoding":{"content":["pkcs8","sr25519"],"type":["scrypt","xsalsa20-poly1305"],"version":"3"},"address":"5Grw"}"#).unwrap();
		let garbage = load_keyring(&path, &SecretString::from("pw")).await;
		assert!(matches!(garbage, Err(SignerError::InvalidCredentials(_))));
	}

	#[test]
	fn test_parse_credentials() {
		let table: toml::Value = toml::from_str(
			"keyring_file = \"/secrets/westend.json\"\nkeyring_password = \"pw\"",
		)
		.unwrap();
		let bundle = parse_credentials(Chain::Polkadot, "westend", &table).unwrap();
		assert_eq!(bundle.rpc_endpoint(), "wss://westend-rpc.polkadot.io");

		let blank: toml::Value =
			toml::from_str("keyring_file = \"/secrets/westend.json\"\nkeyring_password = \"\"")
				.unwrap();
		assert!(matches!(
			parse_credentials(Chain::Polkadot, "westend", &blank),
			Err(SignerError::InvalidCredentials(_))
		));
	}
}
