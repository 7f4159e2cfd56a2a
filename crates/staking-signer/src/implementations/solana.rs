//! Solana transaction signer.
//!
//! The upstream payload is a serialized transaction whose signature slots are
//! zero-filled, encoded as base64 (or hex). The signer fills the slot that
//! belongs to the configured key and returns the transaction as base64.
//! Signing is purely local and needs no RPC connection.

use crate::{
	rpc_endpoint, table_str, validate_table, ChainSigner, CredentialParser, SignerError,
	SignerFactory, SignerRegistry,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signer, SigningKey};
use staking_types::{
	Chain, ConfigSchema, CredentialBundle, Field, FieldType, ImplementationRegistry, Schema,
	SecretString, SignerKind, UnsignedPayload, ValidationError,
};
use zeroize::Zeroizing;

const SIGNATURE_LEN: usize = 64;
const PUBKEY_LEN: usize = 32;
const VERSION_PREFIX_MASK: u8 = 0x80;

/// A wire-format transaction with the offsets needed to sign it in place.
#[derive(Debug)]
pub struct WireTransaction {
	bytes: Vec<u8>,
	signatures_offset: usize,
	message_offset: usize,
	required_signers: Vec<[u8; PUBKEY_LEN]>,
}

impl WireTransaction {
	/// Parses a serialized legacy or v0 transaction.
	pub fn parse(bytes: Vec<u8>) -> Result<Self, SignerError> {
		let mut cursor = 0;
		let signature_count = read_compact_u16(&bytes, &mut cursor)?;
		let signatures_offset = cursor;
		cursor = signatures_offset + signature_count * SIGNATURE_LEN;
		let message_offset = cursor;
		if bytes.len() <= message_offset {
			return Err(malformed("truncated before message"));
		}

		if bytes[cursor] & VERSION_PREFIX_MASK != 0 {
			let version = bytes[cursor] & !VERSION_PREFIX_MASK;
			if version != 0 {
				return Err(SignerError::InvalidPayload(format!(
					"unsupported message version {}",
					version
				)));
			}
			cursor += 1;
		}

		let header = bytes
			.get(cursor..cursor + 3)
			.ok_or_else(|| malformed("truncated message header"))?;
		let num_required = header[0] as usize;
		cursor += 3;

		if num_required != signature_count {
			return Err(SignerError::InvalidPayload(format!(
				"header requires {} signatures but {} slots are present",
				num_required, signature_count
			)));
		}

		let key_count = read_compact_u16(&bytes, &mut cursor)?;
		if key_count < num_required {
			return Err(malformed("fewer account keys than required signers"));
		}
		let required_signers = (0..num_required)
			.map(|i| {
				let start = cursor + i * PUBKEY_LEN;
				bytes
					.get(start..start + PUBKEY_LEN)
					.and_then(|key| <[u8; PUBKEY_LEN]>::try_from(key).ok())
					.ok_or_else(|| malformed("truncated account keys"))
			})
			.collect::<Result<Vec<_>, _>>()?;
		if bytes.len() < cursor + key_count * PUBKEY_LEN {
			return Err(malformed("truncated account keys"));
		}

		Ok(Self {
			bytes,
			signatures_offset,
			message_offset,
			required_signers,
		})
	}

	/// The bytes covered by signatures, including any version prefix.
	pub fn message(&self) -> &[u8] {
		&self.bytes[self.message_offset..]
	}

	/// Signs the message and writes the signature into the key's slot.
	pub fn sign_with(&mut self, key: &SigningKey) -> Result<(), SignerError> {
		let pubkey = key.verifying_key().to_bytes();
		let index = self
			.required_signers
			.iter()
			.position(|signer| *signer == pubkey)
			.ok_or_else(|| {
				SignerError::Signing(format!(
					"{} is not a required signer of this transaction",
					bs58::encode(pubkey).into_string()
				))
			})?;

		let signature = key.sign(self.message()).to_bytes();
		let start = self.signatures_offset + index * SIGNATURE_LEN;
		self.bytes[start..start + SIGNATURE_LEN].copy_from_slice(&signature);
		Ok(())
	}

	pub fn into_bytes(self) -> Vec<u8> {
		self.bytes
	}
}

fn malformed(what: &str) -> SignerError {
	SignerError::InvalidPayload(format!("malformed transaction: {}", what))
}

/// Reads Solana's compact-u16 length prefix.
fn read_compact_u16(bytes: &[u8], cursor: &mut usize) -> Result<usize, SignerError> {
	let mut value = 0usize;
	for shift in [0, 7, 14] {
		let byte = *bytes
			.get(*cursor)
			.ok_or_else(|| malformed("truncated length prefix"))?;
		*cursor += 1;
		value |= ((byte & 0x7f) as usize) << shift;
		if byte & 0x80 == 0 {
			return Ok(value);
		}
	}
	Err(malformed("length prefix overflows u16"))
}

/// Decodes the payload string as hex or base64, whichever yields a
/// well-formed transaction. Hex is tried first because every hex string is
/// also valid base64.
pub fn decode_transaction(payload: &UnsignedPayload) -> Result<WireTransaction, SignerError> {
	let encoded = payload.as_str().ok_or_else(|| {
		SignerError::InvalidPayload("expected an encoded transaction string".to_string())
	})?;
	let encoded = encoded.trim();
	if encoded.is_empty() {
		return Err(SignerError::InvalidPayload("transaction is empty".to_string()));
	}

	let mut last_error = None;
	if encoded.chars().all(|c| c.is_ascii_hexdigit()) {
		if let Ok(bytes) = hex::decode(encoded) {
			match WireTransaction::parse(bytes) {
				Ok(tx) => return Ok(tx),
				Err(e) => last_error = Some(e),
			}
		}
	}
	match STANDARD.decode(encoded) {
		Ok(bytes) => WireTransaction::parse(bytes),
		Err(e) => Err(last_error.unwrap_or_else(|| {
			SignerError::InvalidPayload(format!("transaction is neither hex nor base64: {}", e))
		})),
	}
}

/// Decodes a secret key given as a JSON byte array or base58 string.
///
/// Both 64-byte keypairs and 32-byte seeds are accepted.
pub fn parse_secret_key(secret: &SecretString) -> Result<SigningKey, SignerError> {
	let bytes = secret.with_exposed(|raw| {
		let raw = raw.trim();
		if raw.starts_with('[') {
			serde_json::from_str::<Vec<u8>>(raw).map(Zeroizing::new).map_err(|e| {
				SignerError::InvalidCredentials(format!("secret key is not a byte array: {}", e))
			})
		} else {
			bs58::decode(raw).into_vec().map(Zeroizing::new).map_err(|e| {
				SignerError::InvalidCredentials(format!("secret key is not base58: {}", e))
			})
		}
	})?;

	match bytes.len() {
		64 => {
			let mut keypair = Zeroizing::new([0u8; 64]);
			keypair.copy_from_slice(&bytes);
			SigningKey::from_keypair_bytes(&keypair).map_err(|e| {
				SignerError::InvalidCredentials(format!("inconsistent keypair bytes: {}", e))
			})
		},
		32 => {
			let mut seed = Zeroizing::new([0u8; 32]);
			seed.copy_from_slice(&bytes);
			Ok(SigningKey::from_bytes(&seed))
		},
		n => Err(SignerError::InvalidCredentials(format!(
			"secret key must be 32 or 64 bytes, got {}",
			n
		))),
	}
}

pub struct SolanaSigner {
	secret_key: SecretString,
}

impl SolanaSigner {
	pub fn new(secret_key: SecretString) -> Self {
		Self { secret_key }
	}
}

#[async_trait]
impl ChainSigner for SolanaSigner {
	async fn sign(&self, payload: &UnsignedPayload) -> Result<String, SignerError> {
		let mut tx = decode_transaction(payload)?;
		let key = parse_secret_key(&self.secret_key)?;
		tx.sign_with(&key)?;
		Ok(STANDARD.encode(tx.into_bytes()))
	}
}

/// Configuration schema for Solana signer tables.
pub struct SolanaSignerSchema;

impl ConfigSchema for SolanaSignerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::non_empty_string("secret_key")],
			vec![Field::new("rpc_endpoint", FieldType::String)],
		)
		.validate(config)
	}
}

/// Parses a `[signers.solana.<network>]` table.
///
/// The key itself is decoded when signing, so a table only needs a
/// non-empty `secret_key` to load.
pub fn parse_credentials(
	chain: Chain,
	network: &str,
	table: &toml::Value,
) -> Result<CredentialBundle, SignerError> {
	validate_table(&SolanaSignerSchema, chain, network, table)?;
	Ok(CredentialBundle::Solana {
		rpc_endpoint: rpc_endpoint(chain, network, table)?,
		secret_key: SecretString::new(table_str(table, "secret_key")?),
	})
}

pub fn create_signer(
	_chain: Chain,
	credentials: CredentialBundle,
) -> Result<Box<dyn ChainSigner>, SignerError> {
	match credentials {
		CredentialBundle::Solana { secret_key, .. } => Ok(Box::new(SolanaSigner::new(secret_key))),
		other => Err(SignerError::InvalidCredentials(format!(
			"solana signer cannot use {} credentials",
			other.kind()
		))),
	}
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "solana";
	type Factory = SignerFactory;

	fn factory() -> Self::Factory {
		create_signer
	}
}

impl SignerRegistry for Registry {
	const KIND: SignerKind = SignerKind::Solana;

	fn credential_parser() -> CredentialParser {
		parse_credentials
	}
}
