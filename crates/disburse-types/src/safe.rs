//! Safe transaction model.
//!
//! A [`SafeTransactionRequest`] is the canonical payload that owners sign. Once
//! it has been hashed, every field (including the nonce) is frozen; the
//! [`PendingTransaction`] record carries it through signature collection and
//! execution.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of call the Safe performs for its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum Operation {
	#[default]
	Call = 0,
	DelegateCall = 1,
}

impl Operation {
	/// Numeric value used in the hash and in `execTransaction`.
	pub fn as_u8(&self) -> u8 {
		*self as u8
	}
}

impl From<Operation> for u8 {
	fn from(op: Operation) -> Self {
		op.as_u8()
	}
}

impl TryFrom<u8> for Operation {
	type Error = String;

	fn try_from(value: u8) -> Result<Self, Self::Error> {
		match value {
			0 => Ok(Operation::Call),
			1 => Ok(Operation::DelegateCall),
			other => Err(format!("invalid operation {}, expected 0 or 1", other)),
		}
	}
}

/// The payload a Safe executes, exactly as it is hashed and signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SafeTransactionRequest {
	/// Call target.
	pub to: Address,
	/// Native value sent with the call, in wei.
	pub value: U256,
	/// Calldata.
	pub data: Bytes,
	/// Call or delegatecall.
	pub operation: Operation,
	/// Gas for the inner call, zero for all remaining gas.
	pub safe_tx_gas: U256,
	pub base_gas: U256,
	/// Refund gas price, zero for no refund.
	pub gas_price: U256,
	/// Refund token, zero address for native.
	pub gas_token: Address,
	pub refund_receiver: Address,
	/// Safe nonce this transaction consumes.
	pub nonce: U256,
}

impl SafeTransactionRequest {
	/// Creates a request with zeroed gas parameters and no refund.
	pub fn new(to: Address, value: U256, data: Bytes, operation: Operation, nonce: U256) -> Self {
		Self {
			to,
			value,
			data,
			operation,
			safe_tx_gas: U256::ZERO,
			base_gas: U256::ZERO,
			gas_price: U256::ZERO,
			gas_token: Address::ZERO,
			refund_receiver: Address::ZERO,
			nonce,
		}
	}
}

/// On-chain Safe configuration, read fresh before every mutating decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeState {
	/// Next nonce the Safe will accept.
	pub nonce: U256,
	/// Signatures required to execute.
	pub threshold: u64,
	/// Owners in contract order.
	pub owners: Vec<Address>,
}

impl SafeState {
	/// Whether `address` is currently an owner.
	pub fn is_owner(&self, address: &Address) -> bool {
		self.owners.contains(address)
	}
}

/// A 65-byte `r || s || v` signature attributed to a Safe owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SafeSignature {
	/// Owner the signature recovers to.
	pub signer: Address,
	pub signature: Bytes,
	/// Unix seconds when the signature was accepted.
	pub added_at: i64,
}

/// Lifecycle of a proposed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
	Pending,
	Executed,
	Failed,
	Stale,
}

impl TransactionStatus {
	/// Whether the transaction can no longer change.
	pub fn is_terminal(&self) -> bool {
		!matches!(self, TransactionStatus::Pending)
	}
}

impl fmt::Display for TransactionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			TransactionStatus::Pending => "pending",
			TransactionStatus::Executed => "executed",
			TransactionStatus::Failed => "failed",
			TransactionStatus::Stale => "stale",
		};
		f.write_str(s)
	}
}

/// A proposed Safe transaction and the signatures gathered for it so far.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
	/// EIP-712 hash, the record's identity.
	pub transaction_hash: B256,
	pub safe_address: Address,
	pub chain_id: u64,
	/// Payload the hash was computed from.
	pub request: SafeTransactionRequest,
	/// Unique per signer, in the order they were collected.
	pub signatures: Vec<SafeSignature>,
	pub status: TransactionStatus,
	/// Owner that proposed the transaction.
	pub proposer: Address,
	/// Unix seconds.
	pub created_at: i64,
	/// Unix seconds of the last mutation.
	pub updated_at: i64,
	/// Chain transaction that executed this Safe transaction.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub executed_tx_hash: Option<B256>,
	/// Why the transaction reached `Failed` or `Stale`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub failure_reason: Option<String>,
}

impl PendingTransaction {
	/// Whether `signer` has already signed.
	pub fn has_signer(&self, signer: &Address) -> bool {
		self.signatures.iter().any(|s| &s.signer == signer)
	}

	/// Signer addresses in ascending order, the order they are packed in.
	pub fn signers(&self) -> Vec<Address> {
		let mut signers: Vec<Address> = self.signatures.iter().map(|s| s.signer).collect();
		signers.sort();
		signers
	}
}

/// Returned after a signature has been accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureProgress {
	pub signature_count: usize,
	pub threshold: u64,
	/// True once the stored signatures meet the threshold.
	pub ready_to_execute: bool,
}

/// Snapshot of a transaction's signing progress against the live Safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusView {
	pub transaction_hash: B256,
	pub safe_address: Address,
	pub status: TransactionStatus,
	pub signature_count: usize,
	pub threshold: u64,
	pub signers: Vec<Address>,
	/// True when enough current owners have signed.
	pub ready_to_execute: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub executed_tx_hash: Option<B256>,
}

/// Outcome of a successful `execTransaction` submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReceipt {
	/// Hash of the submitted chain transaction.
	pub chain_tx_hash: B256,
	/// Inclusion block, when the receipt reports one.
	pub block_number: Option<u64>,
	/// Owner signatures packed into the call.
	pub signatures_used: usize,
}

/// Where an `execTransaction` for a given Safe hash landed, if anywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionRecord {
	Succeeded { chain_tx_hash: B256 },
	Failed { chain_tx_hash: B256 },
}

#[cfg(test)]
mod tests {
	use super::*;
	use alloy::primitives::address;

	#[test]
	fn operation_rejects_unknown_values() {
		assert_eq!(Operation::try_from(1u8), Ok(Operation::DelegateCall));
		assert!(Operation::try_from(2u8).is_err());
		let parsed: Result<Operation, _> = serde_json::from_str("2");
		assert!(parsed.is_err());
	}

	#[test]
	fn request_json_is_camel_case_and_strict() {
		let request = SafeTransactionRequest::new(
			address!("0x1111111111111111111111111111111111111111"),
			U256::ZERO,
			Bytes::from(vec![0xa9, 0x05, 0x9c, 0xbb]),
			Operation::Call,
			U256::from(5),
		);
		let json = serde_json::to_value(&request).unwrap();
		assert!(json.get("safeTxGas").is_some());
		assert!(json.get("refundReceiver").is_some());
		assert_eq!(json["operation"], 0);

		let back: SafeTransactionRequest = serde_json::from_value(json.clone()).unwrap();
		assert_eq!(back, request);

		let mut extra = json;
		extra["unexpected"] = serde_json::json!(true);
		assert!(serde_json::from_value::<SafeTransactionRequest>(extra).is_err());
	}

	#[test]
	fn only_pending_is_non_terminal() {
		assert!(!TransactionStatus::Pending.is_terminal());
		assert!(TransactionStatus::Executed.is_terminal());
		assert!(TransactionStatus::Failed.is_terminal());
		assert!(TransactionStatus::Stale.is_terminal());
	}
}
