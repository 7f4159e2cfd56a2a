//! Cosmos-SDK direct signer, used for Celestia, Sei and Cosmos Hub.
//!
//! The upstream payload is a CosmJS-style sign request:
//!
//! ```json
//! {
//!   "messages": [{ "typeUrl": "/cosmos.staking.v1beta1.MsgDelegate", "value": { ... } }],
//!   "fee": { "amount": [{ "denom": "utia", "amount": "2000" }], "gas": "250000" },
//!   "memo": ""
//! }
//! ```
//!
//! possibly wrapped in a JSON string. Fee and gas are minor-unit decimal
//! strings and are passed through unconverted. The signed `TxRaw` is returned
//! as lowercase hex.

use crate::{
	rpc_endpoint, table_str, validate_table, ChainSigner, CredentialParser, SignerError,
	SignerFactory, SignerRegistry,
};
use async_trait::async_trait;
use bip32::{DerivationPath, Language, Mnemonic, XPrv};
use cosmrs::{
	crypto::secp256k1::SigningKey,
	distribution::MsgWithdrawDelegatorReward,
	proto::cosmos::auth::v1beta1::{BaseAccount, QueryAccountRequest, QueryAccountResponse},
	rpc::{Client, HttpClient},
	staking::{MsgBeginRedelegate, MsgDelegate, MsgUndelegate},
	tendermint::chain::Id as ChainId,
	tx::{Body, Fee, Msg, SignDoc, SignerInfo},
	AccountId, Any, Coin, Denom,
};
use prost::Message;
use serde::Deserialize;
use staking_types::{
	Chain, ConfigSchema, CredentialBundle, Field, FieldType, ImplementationRegistry, Schema,
	SecretString, SignerKind, UnsignedPayload, ValidationError,
};
use std::str::FromStr;

/// HD path shared by Cosmos-SDK chains using coin type 118.
pub const COSMOS_HD_PATH: &str = "m/44'/118'/0'/0/0";

const ACCOUNT_QUERY_PATH: &str = "/cosmos.auth.v1beta1.Query/Account";

pub const MSG_DELEGATE: &str = "/cosmos.staking.v1beta1.MsgDelegate";
pub const MSG_UNDELEGATE: &str = "/cosmos.staking.v1beta1.MsgUndelegate";
pub const MSG_BEGIN_REDELEGATE: &str = "/cosmos.staking.v1beta1.MsgBeginRedelegate";
pub const MSG_WITHDRAW_REWARD: &str =
	"/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
	messages: Vec<EncodedMessage>,
	fee: EncodedFee,
	#[serde(default)]
	memo: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EncodedMessage {
	type_url: String,
	value: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct EncodedFee {
	amount: Vec<EncodedCoin>,
	gas: NumericString,
}

#[derive(Debug, Deserialize)]
struct EncodedCoin {
	denom: String,
	amount: NumericString,
}

/// A decimal quantity sent either as a string or a number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumericString {
	Text(String),
	Number(u64),
}

impl NumericString {
	fn parse<T: FromStr>(&self, what: &str) -> Result<T, SignerError> {
		let text = match self {
			NumericString::Text(s) => s.trim().to_string(),
			NumericString::Number(n) => n.to_string(),
		};
		text.parse()
			.map_err(|_| SignerError::InvalidPayload(format!("{} '{}' is not an integer", what, text)))
	}
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegationValue {
	delegator_address: String,
	validator_address: String,
	amount: EncodedCoin,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RedelegationValue {
	delegator_address: String,
	validator_src_address: String,
	validator_dst_address: String,
	amount: EncodedCoin,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WithdrawRewardValue {
	delegator_address: String,
	validator_address: String,
}

/// Messages, fee and memo validated and converted to their protobuf form.
#[derive(Debug)]
pub struct PreparedTx {
	pub messages: Vec<Any>,
	pub fee: Fee,
	pub memo: String,
}

fn invalid<E: std::fmt::Display>(context: &str) -> impl Fn(E) -> SignerError + '_ {
	move |e| SignerError::InvalidPayload(format!("{}: {}", context, e))
}

fn account_id(address: &str) -> Result<AccountId, SignerError> {
	AccountId::from_str(address).map_err(invalid("invalid bech32 address"))
}

fn coin(encoded: &EncodedCoin) -> Result<Coin, SignerError> {
	Ok(Coin {
		denom: Denom::from_str(&encoded.denom).map_err(invalid("invalid denom"))?,
		amount: encoded.amount.parse("coin amount")?,
	})
}

fn message_value<T: for<'de> Deserialize<'de>>(msg: &EncodedMessage) -> Result<T, SignerError> {
	serde_json::from_value(msg.value.clone()).map_err(invalid(&msg.type_url))
}

fn to_any(msg: &EncodedMessage) -> Result<Any, SignerError> {
	let any = match msg.type_url.as_str() {
		MSG_DELEGATE => {
			let v: DelegationValue = message_value(msg)?;
			MsgDelegate {
				delegator_address: account_id(&v.delegator_address)?,
				validator_address: account_id(&v.validator_address)?,
				amount: coin(&v.amount)?,
			}
			.to_any()
		},
		MSG_UNDELEGATE => {
			let v: DelegationValue = message_value(msg)?;
			MsgUndelegate {
				delegator_address: account_id(&v.delegator_address)?,
				validator_address: account_id(&v.validator_address)?,
				amount: coin(&v.amount)?,
			}
			.to_any()
		},
		MSG_BEGIN_REDELEGATE => {
			let v: RedelegationValue = message_value(msg)?;
			MsgBeginRedelegate {
				delegator_address: account_id(&v.delegator_address)?,
				validator_src_address: account_id(&v.validator_src_address)?,
				validator_dst_address: account_id(&v.validator_dst_address)?,
				amount: coin(&v.amount)?,
			}
			.to_any()
		},
		MSG_WITHDRAW_REWARD => {
			let v: WithdrawRewardValue = message_value(msg)?;
			MsgWithdrawDelegatorReward {
				delegator_address: account_id(&v.delegator_address)?,
				validator_address: account_id(&v.validator_address)?,
			}
			.to_any()
		},
		other => {
			return Err(SignerError::InvalidPayload(format!(
				"unsupported message type '{}'",
				other
			)))
		},
	};
	any.map_err(invalid("cannot encode message"))
}

/// Validates an unsigned payload and converts it for signing.
///
/// Pure: performs no I/O, so malformed payloads are rejected before the
/// signer ever connects to a node.
pub fn prepare_tx(payload: &UnsignedPayload) -> Result<PreparedTx, SignerError> {
	let mut value = payload.to_value().map_err(invalid("payload is not JSON"))?;
	if let serde_json::Value::String(inner) = &value {
		value = serde_json::from_str(inner).map_err(invalid("payload string is not JSON"))?;
	}

	let request: SignRequest =
		serde_json::from_value(value).map_err(invalid("malformed sign request"))?;
	if request.messages.is_empty() {
		return Err(SignerError::InvalidPayload("messages must not be empty".into()));
	}
	if request.fee.amount.is_empty() {
		return Err(SignerError::InvalidPayload("fee.amount must not be empty".into()));
	}

	let messages = request
		.messages
		.iter()
		.map(to_any)
		.collect::<Result<Vec<_>, _>>()?;
	let fee = Fee {
		amount: request
			.fee
			.amount
			.iter()
			.map(coin)
			.collect::<Result<Vec<_>, _>>()?,
		gas_limit: request.fee.gas.parse("fee.gas")?,
		payer: None,
		granter: None,
	};

	Ok(PreparedTx {
		messages,
		fee,
		memo: request.memo.unwrap_or_default(),
	})
}

/// Derives the secp256k1 key for `m/44'/118'/0'/0/0` from a mnemonic.
pub fn derive_signing_key(mnemonic: &SecretString) -> Result<SigningKey, SignerError> {
	let mnemonic = mnemonic
		.with_exposed(|phrase| Mnemonic::new(phrase.trim(), Language::English))
		.map_err(|e| SignerError::InvalidCredentials(format!("invalid mnemonic: {}", e)))?;
	let seed = mnemonic.to_seed("");
	let path = DerivationPath::from_str(COSMOS_HD_PATH)
		.map_err(|e| SignerError::InvalidCredentials(e.to_string()))?;
	let xprv = XPrv::derive_from_path(seed.as_bytes(), &path)
		.map_err(|e| SignerError::InvalidCredentials(format!("key derivation failed: {}", e)))?;
	SigningKey::from_slice(&xprv.private_key().to_bytes())
		.map_err(|e| SignerError::InvalidCredentials(format!("invalid derived key: {}", e)))
}

pub struct CosmosSigner {
	chain: Chain,
	rpc_endpoint: String,
	mnemonic: SecretString,
	signer_address: String,
}

impl CosmosSigner {
	pub fn new(
		chain: Chain,
		rpc_endpoint: String,
		mnemonic: SecretString,
		signer_address: String,
	) -> Self {
		Self {
			chain,
			rpc_endpoint,
			mnemonic,
			signer_address,
		}
	}

	/// Derives the key and checks it controls the configured address.
	fn signing_key(&self) -> Result<SigningKey, SignerError> {
		let prefix = self.chain.bech32_prefix().ok_or_else(|| {
			SignerError::UnsupportedChain(format!("{} has no bech32 prefix", self.chain))
		})?;
		let key = derive_signing_key(&self.mnemonic)?;
		let derived = key
			.public_key()
			.account_id(prefix)
			.map_err(|e| SignerError::InvalidCredentials(e.to_string()))?;
		if derived.as_ref() != self.signer_address {
			return Err(SignerError::InvalidCredentials(format!(
				"mnemonic derives {} but signer_address is {}",
				derived, self.signer_address
			)));
		}
		Ok(key)
	}

	/// Reads the chain id and the signer's account number and sequence.
	async fn signing_context(&self, address: &str) -> Result<(ChainId, u64, u64), SignerError> {
		let client = HttpClient::new(self.rpc_endpoint.as_str())
			.map_err(|e| SignerError::Connection(format!("{}: {}", self.rpc_endpoint, e)))?;

		let status = client
			.status()
			.await
			.map_err(|e| SignerError::Connection(format!("{}: {}", self.rpc_endpoint, e)))?;
		let chain_id = status.node_info.network;

		let request = QueryAccountRequest {
			address: address.to_string(),
		};
		let response = client
			.abci_query(
				Some(ACCOUNT_QUERY_PATH.to_string()),
				request.encode_to_vec(),
				None,
				false,
			)
			.await
			.map_err(|e| SignerError::Connection(format!("{}: {}", self.rpc_endpoint, e)))?;
		if response.code.is_err() {
			return Err(SignerError::Signing(format!(
				"account lookup for {} failed: {}",
				address, response.log
			)));
		}

		let account = QueryAccountResponse::decode(response.value.as_slice())
			.map_err(|e| SignerError::Signing(format!("cannot decode account response: {}", e)))?
			.account
			.ok_or_else(|| SignerError::Signing(format!("account {} not found", address)))?;
		let base = BaseAccount::decode(account.value.as_slice())
			.map_err(|e| SignerError::Signing(format!("cannot decode account: {}", e)))?;

		Ok((chain_id, base.account_number, base.sequence))
	}
}

#[async_trait]
impl ChainSigner for CosmosSigner {
	async fn sign(&self, payload: &UnsignedPayload) -> Result<String, SignerError> {
		let key = self.signing_key()?;
		let prepared = prepare_tx(payload)?;

		let (chain_id, account_number, sequence) =
			self.signing_context(&self.signer_address).await?;
		tracing::debug!(
			chain = %self.chain,
			chain_id = %chain_id,
			account_number,
			sequence,
			"Fetched signing context"
		);

		let body = Body::new(prepared.messages, prepared.memo, 0u32);
		let auth_info =
			SignerInfo::single_direct(Some(key.public_key()), sequence).auth_info(prepared.fee);
		let sign_doc = SignDoc::new(&body, &auth_info, &chain_id, account_number)
			.map_err(|e| SignerError::Signing(e.to_string()))?;
		let raw = sign_doc
			.sign(&key)
			.map_err(|e| SignerError::Signing(e.to_string()))?;
		let bytes = raw
			.to_bytes()
			.map_err(|e| SignerError::Signing(e.to_string()))?;

		Ok(hex::encode(bytes))
	}
}

/// Configuration schema for Cosmos signer tables.
pub struct CosmosSignerSchema;

impl ConfigSchema for CosmosSignerSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![
				Field::non_empty_string("mnemonic"),
				Field::non_empty_string("signer_address"),
			],
			vec![Field::new("rpc_endpoint", FieldType::String)],
		)
		.validate(config)
	}
}

/// Parses a `[signers.<celestia|sei|cosmos>.<network>]` table.
///
/// Configuration parameters:
/// - `mnemonic`: BIP-39 phrase
/// - `signer_address`: bech32 address the mnemonic must derive to
/// - `rpc_endpoint`: Tendermint RPC URL (default: the network's public endpoint)
pub fn parse_credentials(
	chain: Chain,
	network: &str,
	table: &toml::Value,
) -> Result<CredentialBundle, SignerError> {
	validate_table(&CosmosSignerSchema, chain, network, table)?;
	Ok(CredentialBundle::Cosmos {
		rpc_endpoint: rpc_endpoint(chain, network, table)?,
		mnemonic: SecretString::new(table_str(table, "mnemonic")?),
		signer_address: table_str(table, "signer_address")?,
	})
}

pub fn create_signer(
	chain: Chain,
	credentials: CredentialBundle,
) -> Result<Box<dyn ChainSigner>, SignerError> {
	match credentials {
		CredentialBundle::Cosmos {
			rpc_endpoint,
			mnemonic,
			signer_address,
		} => Ok(Box::new(CosmosSigner::new(
			chain,
			rpc_endpoint,
			mnemonic,
			signer_address,
		))),
		other => Err(SignerError::InvalidCredentials(format!(
			"cosmos signer cannot use {} credentials",
			other.kind()
		))),
	}
}

pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "cosmos";
	type Factory = SignerFactory;

	fn factory() -> Self::Factory {
		create_signer
	}
}

impl SignerRegistry for Registry {
	const KIND: SignerKind = SignerKind::Cosmos;

	fn credential_parser() -> CredentialParser {
		parse_credentials
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

	fn delegate_payload() -> serde_json::Value {
		let delegator = AccountId::new("celestia", &[7u8; 20]).unwrap();
		let validator = AccountId::new("celestiavaloper", &[9u8; 20]).unwrap();
		json!({
			"messages": [{
				"typeUrl": MSG_DELEGATE,
				"value": {
					"delegatorAddress": delegator.to_string(),
					"validatorAddress": validator.to_string(),
					"amount": { "denom": "utia", "amount": "1000000" }
				}
			}],
			"fee": { "amount": [{ "denom": "utia", "amount": "2000" }], "gas": "250000" },
			"memo": "staking"
		})
	}

	fn signer_for(address: &str) -> CosmosSigner {
		CosmosSigner::new(
			Chain::Celestia,
			"http://127.0.0.1:1".into(),
			SecretString::from(TEST_MNEMONIC),
			address.into(),
		)
	}

	#[test]
	fn test_prepare_object_and_string_payloads() {
		let object = UnsignedPayload::from_value(&delegate_payload()).unwrap();
		let prepared = prepare_tx(&object).unwrap();
		assert_eq!(prepared.messages.len(), 1);
		assert_eq!(prepared.messages[0].type_url, MSG_DELEGATE);
		assert_eq!(prepared.fee.gas_limit, 250_000);
		assert_eq!(prepared.fee.amount[0].amount, 2000);
		assert_eq!(prepared.memo, "staking");

		let wrapped = serde_json::Value::String(delegate_payload().to_string());
		let string = UnsignedPayload::from_value(&wrapped).unwrap();
		assert_eq!(prepare_tx(&string).unwrap().messages.len(), 1);
	}

	#[test]
	fn test_prepare_rejects_malformed_payloads() {
		let mut no_messages = delegate_payload();
		no_messages["messages"] = json!([]);

		let mut no_gas = delegate_payload();
		no_gas["fee"].as_object_mut().unwrap().remove("gas");

		let mut bad_type = delegate_payload();
		bad_type["messages"][0]["typeUrl"] = json!("/cosmos.bank.v1beta1.MsgSend");

		let mut bad_amount = delegate_payload();
		bad_amount["fee"]["amount"][0]["amount"] = json!("2.5");

		for value in [no_messages, no_gas, bad_type, bad_amount, json!("not json"), json!(7)] {
			let payload = UnsignedPayload::from_value(&value).unwrap();
			assert!(
				matches!(prepare_tx(&payload), Err(SignerError::InvalidPayload(_))),
				"accepted {value}"
			);
		}
	}

	#[test]
	fn test_derived_address_must_match() {
		let key = derive_signing_key(&SecretString::from(TEST_MNEMONIC)).unwrap();
		let address = key.public_key().account_id("celestia").unwrap().to_string();

		assert!(signer_for(&address).signing_key().is_ok());
		assert!(matches!(
			signer_for("celestia1qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqq").signing_key(),
			Err(SignerError::InvalidCredentials(_))
		));
	}

	#[test]
	fn test_invalid_mnemonic() {
		assert!(matches!(
			derive_signing_key(&SecretString::from("not a real mnemonic")),
			Err(SignerError::InvalidCredentials(_))
		));
	}

	#[tokio::test]
	async fn test_invalid_payload_fails_before_network() {
		let key = derive_signing_key(&SecretString::from(TEST_MNEMONIC)).unwrap();
		let address = key.public_key().account_id("celestia").unwrap().to_string();
		let payload = UnsignedPayload::from_value(&json!({ "messages": [] })).unwrap();

		// The endpoint is unreachable, so anything but InvalidPayload means
		// the signer tried to connect first.
		let err = signer_for(&address).sign(&payload).await.unwrap_err();
		assert!(matches!(err, SignerError::InvalidPayload(_)));
	}

	#[tokio::test]
	async fn test_unreachable_node_is_connection_error() {
		let key = derive_signing_key(&SecretString::from(TEST_MNEMONIC)).unwrap();
		let address = key.public_key().account_id("celestia").unwrap().to_string();
		let payload = UnsignedPayload::from_value(&delegate_payload()).unwrap();

		let err = signer_for(&address).sign(&payload).await.unwrap_err();
		assert!(matches!(err, SignerError::Connection(_)));
	}
}
