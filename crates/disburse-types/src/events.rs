use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// Transitions published on the event bus after they have been persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafeEvent {
	Proposed {
		hash: B256,
		safe: Address,
		proposer: Address,
	},
	SignatureAdded {
		hash: B256,
		signer: Address,
		signature_count: usize,
		threshold: u64,
	},
	Executed {
		hash: B256,
		safe: Address,
		chain_tx_hash: B256,
	},
	ExecutionFailed {
		hash: B256,
		safe: Address,
		reason: String,
	},
	Superseded {
		hash: B256,
		proposed_nonce: U256,
		current_nonce: U256,
	},
}

impl SafeEvent {
	pub fn hash(&self) -> B256 {
		match self {
			SafeEvent::Proposed { hash, .. }
			| SafeEvent::SignatureAdded { hash, .. }
			| SafeEvent::Executed { hash, .. }
			| SafeEvent::ExecutionFailed { hash, .. }
			| SafeEvent::Superseded { hash, .. } => *hash,
		}
	}
}
