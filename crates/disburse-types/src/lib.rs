//! Shared types for the disburse workspace.
//!
//! Everything that more than one crate needs to agree on lives here: the Safe
//! transaction model, the EIP-712 hashing rules, the error taxonomy surfaced to
//! callers, distribution bookkeeping records and configuration schema helpers.

pub mod amount;
pub mod contracts;
pub mod distribution;
pub mod eip712;
pub mod errors;
pub mod events;
pub mod safe;
pub mod validation;

pub use amount::*;
pub use distribution::*;
pub use errors::*;
pub use events::*;
pub use safe::*;
pub use validation::*;

pub use alloy::primitives::{Address, Bytes, B256, U256};

/// Current unix timestamp in seconds.
pub fn now() -> i64 {
	chrono::Utc::now().timestamp()
}

/// Shortens a 32-byte hash for log output.
pub fn truncate_hash(hash: &B256) -> String {
	let hash_str = hash.to_string();
	format!("{}..", &hash_str[..10])
}
