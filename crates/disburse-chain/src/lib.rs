//! Chain access for the multisig core.
//!
//! Reads (nonce, owners, threshold, contract-side hash, execution logs) are
//! bounded by a timeout and retried on transient failures. Submission of
//! `execTransaction` is bounded by a timeout but never retried.

use alloy::primitives::{Address, Bytes, B256};
use async_trait::async_trait;
use disburse_types::{ExecutionRecord, SafeError, SafeState, SafeTransactionRequest};
use thiserror::Error;

pub mod implementations {
	pub mod evm;
}

#[derive(Debug, Error)]
pub enum ChainError {
	#[error("RPC unavailable: {0}")]
	Unavailable(String),
	#[error("Timed out: {0}")]
	Timeout(String),
	#[error("Reverted: {0}")]
	Reverted(String),
	#[error("Invalid configuration: {0}")]
	InvalidConfig(String),
}

impl From<ChainError> for SafeError {
	fn from(err: ChainError) -> Self {
		match err {
			ChainError::Unavailable(msg) => SafeError::ChainUnavailable(msg),
			ChainError::Timeout(msg) => SafeError::Timeout(msg),
			ChainError::Reverted(reason) => SafeError::ExecutionReverted { reason },
			ChainError::InvalidConfig(msg) => SafeError::Config(msg),
		}
	}
}

/// A mined `execTransaction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmittedExecution {
	pub chain_tx_hash: B256,
	pub block_number: Option<u64>,
	/// False when the Safe emitted `ExecutionFailure`: the nonce was consumed
	/// but the inner call did not succeed.
	pub inner_success: bool,
}

#[async_trait]
pub trait ChainInterface: Send + Sync {
	fn chain_id(&self) -> u64;

	/// Account that pays for and sends `execTransaction`.
	fn executor(&self) -> Address;

	async fn safe_state(&self, safe: Address) -> Result<SafeState, ChainError>;

	/// The Safe contract's own `getTransactionHash` for `request`.
	async fn transaction_hash(
		&self,
		safe: Address,
		request: &SafeTransactionRequest,
	) -> Result<B256, ChainError>;

	/// Simulates, submits and waits for `execTransaction`.
	async fn execute(
		&self,
		safe: Address,
		request: &SafeTransactionRequest,
		signatures: Bytes,
	) -> Result<SubmittedExecution, ChainError>;

	/// Looks for an execution event for `hash` emitted by `safe`.
	async fn find_execution(
		&self,
		safe: Address,
		hash: B256,
	) -> Result<Option<ExecutionRecord>, ChainError>;
}
