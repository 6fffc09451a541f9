//! Error taxonomy surfaced by the multisig core.
//!
//! Component crates keep their own error enums and convert into [`SafeError`]
//! at the core boundary so that callers see one stable set of failure kinds.

use alloy::primitives::{Address, B256, U256};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SafeError {
	/// A caller-supplied value failed validation.
	#[error("Invalid {field}: {reason}")]
	InvalidInput { field: String, reason: String },
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Transaction {0} has already been proposed")]
	AlreadyProposed(B256),
	#[error("Signer {0} has already signed this transaction")]
	DuplicateSigner(Address),
	#[error("{0} is not a current owner of the Safe")]
	NotAnOwner(Address),
	#[error("Insufficient signatures: have {have}, need {need}")]
	InsufficientSignatures { have: usize, need: u64 },
	/// The locally computed hash disagrees with the contract. Never retried.
	#[error("Transaction hash mismatch: local {local}, contract {contract}")]
	HashMismatch { local: B256, contract: B256 },
	#[error("Chain unavailable: {0}")]
	ChainUnavailable(String),
	#[error("Timed out: {0}")]
	Timeout(String),
	#[error("Execution reverted: {reason}")]
	ExecutionReverted { reason: String },
	#[error("Transaction already executed")]
	AlreadyExecuted { chain_tx_hash: Option<B256> },
	#[error("Stale nonce: transaction uses {proposed}, Safe is at {current}")]
	StaleNonce { proposed: U256, current: U256 },
	#[error("Nonce ahead: transaction uses {proposed}, Safe is at {current}")]
	NonceAhead { proposed: U256, current: U256 },
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Configuration error: {0}")]
	Config(String),
}

impl SafeError {
	pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
		SafeError::InvalidInput {
			field: field.into(),
			reason: reason.into(),
		}
	}

	/// Stable machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			SafeError::InvalidInput { .. } => "INVALID_INPUT",
			SafeError::NotFound(_) => "NOT_FOUND",
			SafeError::AlreadyProposed(_) => "ALREADY_PROPOSED",
			SafeError::DuplicateSigner(_) => "DUPLICATE_SIGNER",
			SafeError::NotAnOwner(_) => "NOT_AN_OWNER",
			SafeError::InsufficientSignatures { .. } => "INSUFFICIENT_SIGNATURES",
			SafeError::HashMismatch { .. } => "HASH_MISMATCH",
			SafeError::ChainUnavailable(_) => "CHAIN_UNAVAILABLE",
			SafeError::Timeout(_) => "TIMEOUT",
			SafeError::ExecutionReverted { .. } => "EXECUTION_REVERTED",
			SafeError::AlreadyExecuted { .. } => "ALREADY_EXECUTED",
			SafeError::StaleNonce { .. } => "STALE_NONCE",
			SafeError::NonceAhead { .. } => "NONCE_AHEAD",
			SafeError::Storage(_) => "STORAGE",
			SafeError::Config(_) => "CONFIG",
		}
	}

	/// Whether the same call may succeed if repeated later.
	pub fn is_retryable(&self) -> bool {
		matches!(self, SafeError::ChainUnavailable(_) | SafeError::Timeout(_))
	}

	/// Fatal errors halt the flow and must surface to an operator.
	pub fn is_fatal(&self) -> bool {
		matches!(self, SafeError::HashMismatch { .. })
	}
}
