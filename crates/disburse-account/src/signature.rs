//! Safe signature encoding and owner recovery.
//!
//! Accepted `v` values:
//! - 27 / 28: ECDSA over the Safe transaction hash (typed-data signing)
//! - 31 / 32: ECDSA over the EIP-191 prefixed hash (`eth_sign`)
//!
//! Contract signatures (`v = 0`) and approved hashes (`v = 1`) need on-chain
//! state to verify and are not accepted.

use crate::AccountError;
use alloy::primitives::{eip191_hash_message, Address, Bytes, Signature, B256};

pub const SIGNATURE_LENGTH: usize = 65;

/// Encodes an ECDSA signature as `r || s || v` with `v = offset + parity`.
pub fn encode(signature: &Signature, v_offset: u8) -> Bytes {
	let mut out = Vec::with_capacity(SIGNATURE_LENGTH);
	out.extend_from_slice(&signature.r().to_be_bytes::<32>());
	out.extend_from_slice(&signature.s().to_be_bytes::<32>());
	out.push(v_offset + signature.v() as u8);
	Bytes::from(out)
}

/// Recovers the address that produced `signature` over `hash`.
pub fn recover_signer(hash: B256, signature: &[u8]) -> Result<Address, AccountError> {
	if signature.len() != SIGNATURE_LENGTH {
		return Err(AccountError::InvalidSignature(format!(
			"expected {} bytes, got {}",
			SIGNATURE_LENGTH,
			signature.len()
		)));
	}

	let v = signature[64];
	let (prehash, parity) = match v {
		27 | 28 => (hash, v == 28),
		31 | 32 => (eip191_hash_message(hash), v == 32),
		0 | 1 => return Err(AccountError::UnsupportedSignature(v)),
		other => {
			return Err(AccountError::InvalidSignature(format!(
				"invalid v value {}",
				other
			)))
		}
	};

	Signature::from_bytes_and_parity(&signature[..64], parity)
		.recover_address_from_prehash(&prehash)
		.map_err(|e| AccountError::InvalidSignature(e.to_string()))
}
