//! EIP-712 hashing for Safe transactions.
//!
//! The Safe signs over
//! `keccak256(0x1901 || domainSeparator || structHash)` where the domain is
//! `{chainId, verifyingContract}` only (no name or version). Every numeric
//! field is encoded as a 32-byte big-endian word and addresses are left
//! padded, which is exactly what `abi.encode` produces for static tuples.

use crate::contracts::{DOMAIN_SEPARATOR_TYPEHASH, SAFE_TX_TYPEHASH};
use crate::safe::SafeTransactionRequest;
use alloy::primitives::{keccak256, Address, B256, U256};
use alloy::sol_types::SolValue;
use serde_json::{json, Value};

/// `keccak256(abi.encode(DOMAIN_TYPEHASH, chainId, safe))`
pub fn domain_separator(chain_id: u64, safe: Address) -> B256 {
	keccak256((DOMAIN_SEPARATOR_TYPEHASH, U256::from(chain_id), safe).abi_encode())
}

/// `keccak256(abi.encode(SAFE_TX_TYPEHASH, to, value, keccak256(data), ...))`
pub fn struct_hash(request: &SafeTransactionRequest) -> B256 {
	let encoded = (
		SAFE_TX_TYPEHASH,
		request.to,
		request.value,
		keccak256(&request.data),
		U256::from(request.operation.as_u8()),
		request.safe_tx_gas,
		request.base_gas,
		request.gas_price,
		request.gas_token,
		request.refund_receiver,
		request.nonce,
	)
		.abi_encode();
	keccak256(encoded)
}

/// Final signing hash for `request` executed by `safe` on `chain_id`.
///
/// Pure and deterministic: identical inputs always yield the identical hash.
pub fn compute_hash(safe: Address, chain_id: u64, request: &SafeTransactionRequest) -> B256 {
	let mut buf = [0u8; 66];
	buf[0] = 0x19;
	buf[1] = 0x01;
	buf[2..34].copy_from_slice(domain_separator(chain_id, safe).as_slice());
	buf[34..].copy_from_slice(struct_hash(request).as_slice());
	keccak256(buf)
}

/// The `eth_signTypedData_v4` document an external wallet signs to produce
/// an owner signature for `request`.
pub fn typed_data(safe: Address, chain_id: u64, request: &SafeTransactionRequest) -> Value {
	json!({
		"types": {
			"EIP712Domain": [
				{ "name": "chainId", "type": "uint256" },
				{ "name": "verifyingContract", "type": "address" },
			],
			"SafeTx": [
				{ "name": "to", "type": "address" },
				{ "name": "value", "type": "uint256" },
				{ "name": "data", "type": "bytes" },
				{ "name": "operation", "type": "uint8" },
				{ "name": "safeTxGas", "type": "uint256" },
				{ "name": "baseGas", "type": "uint256" },
				{ "name": "gasPrice", "type": "uint256" },
				{ "name": "gasToken", "type": "address" },
				{ "name": "refundReceiver", "type": "address" },
				{ "name": "nonce", "type": "uint256" },
			],
		},
		"primaryType": "SafeTx",
		"domain": {
			"chainId": chain_id,
			"verifyingContract": safe.to_checksum(None),
		},
		"message": {
			"to": request.to.to_checksum(None),
			"value": request.value.to_string(),
			"data": request.data.to_string(),
			"operation": request.operation.as_u8(),
			"safeTxGas": request.safe_tx_gas.to_string(),
			"baseGas": request.base_gas.to_string(),
			"gasPrice": request.gas_price.to_string(),
			"gasToken": request.gas_token.to_checksum(None),
			"refundReceiver": request.refund_receiver.to_checksum(None),
			"nonce": request.nonce.to_string(),
		},
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::safe::Operation;
	use alloy::primitives::{address, Bytes};
	use alloy::sol;
	use alloy::sol_types::{eip712_domain, SolStruct};

	sol! {
		struct SafeTx {
			address to;
			uint256 value;
			bytes data;
			uint8 operation;
			uint256 safeTxGas;
			uint256 baseGas;
			uint256 gasPrice;
			address gasToken;
			address refundReceiver;
			uint256 nonce;
		}
	}

	const SAFE: Address = address!("0x5afe5afe5afe5afe5afe5afe5afe5afe5afe5afe");

	fn sample_request() -> SafeTransactionRequest {
		SafeTransactionRequest {
			to: address!("0x1234567890123456789012345678901234567890"),
			value: U256::from(1000),
			data: Bytes::from(vec![0x01, 0x02, 0x03]),
			operation: Operation::Call,
			safe_tx_gas: U256::from(100_000),
			base_gas: U256::from(21_000),
			gas_price: U256::ZERO,
			gas_token: Address::ZERO,
			refund_receiver: Address::ZERO,
			nonce: U256::from(5),
		}
	}

	#[test]
	fn hash_is_deterministic() {
		let request = sample_request();
		let first = compute_hash(SAFE, 999, &request);
		let second = compute_hash(SAFE, 999, &request.clone());
		assert_eq!(first, second);
	}

	#[test]
	fn hash_matches_generic_eip712_encoder() {
		let request = sample_request();
		let sol_tx = SafeTx {
			to: request.to,
			value: request.value,
			data: request.data.clone(),
			operation: request.operation.as_u8(),
			safeTxGas: request.safe_tx_gas,
			baseGas: request.base_gas,
			gasPrice: request.gas_price,
			gasToken: request.gas_token,
			refundReceiver: request.refund_receiver,
			nonce: request.nonce,
		};
		let domain = eip712_domain! {
			chain_id: 999,
			verifying_contract: SAFE,
		};

		assert_eq!(domain.separator(), domain_separator(999, SAFE));
		assert_eq!(sol_tx.eip712_hash_struct(), struct_hash(&request));
		assert_eq!(sol_tx.eip712_signing_hash(&domain), compute_hash(SAFE, 999, &request));
	}

	#[test]
	fn operation_is_a_padded_word() {
		let request = SafeTransactionRequest {
			operation: Operation::DelegateCall,
			..sample_request()
		};
		let mut words: Vec<u8> = Vec::with_capacity(11 * 32);
		words.extend_from_slice(SAFE_TX_TYPEHASH.as_slice());
		words.extend_from_slice(request.to.into_word().as_slice());
		words.extend_from_slice(&request.value.to_be_bytes::<32>());
		words.extend_from_slice(keccak256(&request.data).as_slice());
		words.extend_from_slice(&U256::from(1u8).to_be_bytes::<32>());
		words.extend_from_slice(&request.safe_tx_gas.to_be_bytes::<32>());
		words.extend_from_slice(&request.base_gas.to_be_bytes::<32>());
		words.extend_from_slice(&request.gas_price.to_be_bytes::<32>());
		words.extend_from_slice(request.gas_token.into_word().as_slice());
		words.extend_from_slice(request.refund_receiver.into_word().as_slice());
		words.extend_from_slice(&request.nonce.to_be_bytes::<32>());

		assert_eq!(words.len(), 352);
		assert_eq!(struct_hash(&request), keccak256(&words));
	}

	#[test]
	fn every_field_changes_the_hash() {
		let base = sample_request();
		let base_hash = compute_hash(SAFE, 999, &base);
		let other = address!("0x00000000000000000000000000000000000000ff");

		let variants: Vec<SafeTransactionRequest> = vec![
			SafeTransactionRequest { to: other, ..base.clone() },
			SafeTransactionRequest { value: U256::from(1001), ..base.clone() },
			SafeTransactionRequest { data: Bytes::from(vec![0x01, 0x02, 0x04]), ..base.clone() },
			SafeTransactionRequest { operation: Operation::DelegateCall, ..base.clone() },
			SafeTransactionRequest { safe_tx_gas: U256::from(1), ..base.clone() },
			SafeTransactionRequest { base_gas: U256::from(1), ..base.clone() },
			SafeTransactionRequest { gas_price: U256::from(1), ..base.clone() },
			SafeTransactionRequest { gas_token: other, ..base.clone() },
			SafeTransactionRequest { refund_receiver: other, ..base.clone() },
			SafeTransactionRequest { nonce: U256::from(6), ..base.clone() },
		];

		for variant in &variants {
			assert_ne!(compute_hash(SAFE, 999, variant), base_hash, "{:?}", variant);
		}
		assert_ne!(compute_hash(SAFE, 1, &base), base_hash);
		assert_ne!(compute_hash(other, 999, &base), base_hash);
	}

	#[test]
	fn typed_data_carries_domain_and_message() {
		let request = sample_request();
		let doc = typed_data(SAFE, 999, &request);
		assert_eq!(doc["primaryType"], "SafeTx");
		assert_eq!(doc["domain"]["chainId"], 999);
		assert_eq!(doc["message"]["nonce"], "5");
		assert_eq!(doc["message"]["value"], "1000");
		assert_eq!(doc["message"]["data"], "0x010203");
		assert_eq!(doc["types"]["SafeTx"].as_array().unwrap().len(), 10);
	}
}
