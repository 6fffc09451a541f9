//! MultiSend packed encoding.
//!
//! Each entry is `operation (1) || to (20) || value (32) || dataLength (32) ||
//! data`, concatenated without padding, then passed as the single `bytes`
//! argument of `multiSend`.

use alloy::primitives::{Address, Bytes, U256};
use alloy::sol_types::SolCall;
use disburse_types::contracts::IMultiSendCallOnly;
use disburse_types::Operation;

/// One call inside a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchCall {
	pub operation: Operation,
	pub to: Address,
	pub value: U256,
	pub data: Bytes,
}

pub fn encode_call(call: &BatchCall, out: &mut Vec<u8>) {
	out.push(call.operation.as_u8());
	out.extend_from_slice(call.to.as_slice());
	out.extend_from_slice(&call.value.to_be_bytes::<32>());
	out.extend_from_slice(&U256::from(call.data.len()).to_be_bytes::<32>());
	out.extend_from_slice(&call.data);
}

pub fn encode_batch(calls: &[BatchCall]) -> Bytes {
	let capacity = calls.iter().map(|c| 85 + c.data.len()).sum();
	let mut packed = Vec::with_capacity(capacity);
	for call in calls {
		encode_call(call, &mut packed);
	}
	Bytes::from(packed)
}

/// Calldata for `multiSend(bytes)`.
pub fn multi_send_calldata(calls: &[BatchCall]) -> Bytes {
	IMultiSendCallOnly::multiSendCall {
		transactions: encode_batch(calls),
	}
	.abi_encode()
	.into()
}
