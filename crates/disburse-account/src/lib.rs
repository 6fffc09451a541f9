//! Signing boundary for Safe owners.
//!
//! The multisig core never holds owner keys. It only consumes signatures and
//! checks them with [`signature::recover_signer`]. [`SignerInterface`] is the
//! adapter an owner-side tool (or a test) uses to produce them.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use disburse_types::SafeError;
use thiserror::Error;

pub mod signature;

pub mod implementations {
	pub mod local;
}

#[derive(Debug, Error)]
pub enum AccountError {
	#[error("Signing failed: {0}")]
	SigningFailed(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Invalid signature: {0}")]
	InvalidSignature(String),
	#[error("Unsupported signature type (v = {0})")]
	UnsupportedSignature(u8),
}

impl From<AccountError> for SafeError {
	fn from(err: AccountError) -> Self {
		match err {
			AccountError::InvalidSignature(_) | AccountError::UnsupportedSignature(_) => {
				SafeError::invalid("signature", err.to_string())
			}
			AccountError::InvalidKey(_) => SafeError::invalid("private_key", err.to_string()),
			AccountError::SigningFailed(msg) => SafeError::Config(msg),
		}
	}
}

/// Produces Safe-format (65-byte `r || s || v`) signatures over a Safe
/// transaction hash.
#[async_trait]
pub trait SignerInterface: Send + Sync {
	fn address(&self) -> Address;

	async fn sign_hash(&self, hash: B256) -> Result<Bytes, AccountError>;
}
