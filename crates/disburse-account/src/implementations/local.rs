//! Private-key signer for owner-side tooling and tests.

use crate::signature::encode;
use crate::{AccountError, SignerInterface};
use alloy::primitives::{Address, Bytes, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use disburse_types::{private_key, ConfigSchema, Field, FieldType, Schema, ValidationError};

/// Which Safe signature flavour a [`LocalWallet`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SigningMode {
	/// Sign the transaction hash directly (`v` 27/28).
	#[default]
	TypedData,
	/// Sign the EIP-191 prefixed hash (`v` 31/32).
	EthSign,
}

impl std::str::FromStr for SigningMode {
	type Err = AccountError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"typed_data" | "eip712" => Ok(SigningMode::TypedData),
			"eth_sign" => Ok(SigningMode::EthSign),
			other => Err(AccountError::SigningFailed(format!(
				"unknown signing mode '{}'",
				other
			))),
		}
	}
}

pub struct LocalWallet {
	signer: PrivateKeySigner,
	mode: SigningMode,
}

impl LocalWallet {
	/// Parses a hex private key, with or without `0x`.
	pub fn new(private_key_hex: &str) -> Result<Self, AccountError> {
		let signer = private_key_hex
			.parse::<PrivateKeySigner>()
			.map_err(|e| AccountError::InvalidKey(e.to_string()))?;
		Ok(Self::from_signer(signer))
	}

	pub fn from_signer(signer: PrivateKeySigner) -> Self {
		Self {
			signer,
			mode: SigningMode::default(),
		}
	}

	pub fn with_mode(mut self, mode: SigningMode) -> Self {
		self.mode = mode;
		self
	}
}

pub struct LocalWalletSchema;

impl ConfigSchema for LocalWalletSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(
			vec![Field::new("private_key", FieldType::String).with_validator(private_key)],
			vec![
				Field::new("mode", FieldType::String).with_validator(|value| {
					value
						.as_str()
						.unwrap_or_default()
						.parse::<SigningMode>()
						.map(|_| ())
						.map_err(|e| e.to_string())
				}),
			],
		)
		.validate(config)
	}
}

#[async_trait]
impl SignerInterface for LocalWallet {
	fn address(&self) -> Address {
		self.signer.address()
	}

	async fn sign_hash(&self, hash: B256) -> Result<Bytes, AccountError> {
		let signed = match self.mode {
			SigningMode::TypedData => self.signer.sign_hash(&hash).await.map(|s| encode(&s, 27)),
			SigningMode::EthSign => self
				.signer
				.sign_message(hash.as_slice())
				.await
				.map(|s| encode(&s, 31)),
		};
		signed.map_err(|e| AccountError::SigningFailed(e.to_string()))
	}
}

/// Configuration parameters:
/// - `private_key`: hex-encoded owner key
/// - `mode`: `"typed_data"` (default) or `"eth_sign"`
pub fn create_signer(config: &toml::Value) -> Result<Box<dyn SignerInterface>, AccountError> {
	LocalWalletSchema
		.validate(config)
		.map_err(|e| AccountError::InvalidKey(e.to_string()))?;

	let key = config
		.get("private_key")
		.and_then(|v| v.as_str())
		.unwrap_or_default();
	let mode = match config.get("mode").and_then(|v| v.as_str()) {
		Some(mode) => mode.parse()?,
		None => SigningMode::default(),
	};

	Ok(Box::new(LocalWallet::new(key)?.with_mode(mode)))
}
