//! State shared by the collector and the executor, and the transitions both
//! of them can trigger.

use crate::audit::AuditTrail;
use crate::event_bus::EventBus;
use crate::store::{TransactionLocks, TransactionStore};
use disburse_chain::ChainInterface;
use disburse_types::{
	truncate_hash, Address, AuditAction, AuditEntry, ExecutionRecord, PendingTransaction,
	SafeError, SafeEvent, SafeTransactionRequest, TransactionStatus, B256, U256,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info, warn};

/// How a pending transaction left the `pending` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conclusion {
	Executed {
		chain_tx_hash: B256,
	},
	/// Mined, nonce consumed, inner call failed.
	Failed {
		chain_tx_hash: Option<B256>,
		reason: String,
	},
	/// Another transaction consumed the nonce.
	Superseded {
		current_nonce: U256,
	},
}

/// Shared handles used by the collector and the executor.
#[derive(Clone)]
pub struct CoreContext {
	/// Pending transaction records.
	pub store: TransactionStore,
	/// Chain access for Safe state and submission.
	pub chain: Arc<dyn ChainInterface>,
	/// Per-hash locks serialising mutations of one transaction.
	pub locks: TransactionLocks,
	/// Audit trail for lifecycle actions.
	pub audit: AuditTrail,
	/// Bus for lifecycle events.
	pub events: EventBus,
}

/// Compares the local hash with the Safe's `getTransactionHash`.
pub async fn verify_contract_hash(
	chain: &dyn ChainInterface,
	safe: Address,
	request: &SafeTransactionRequest,
	local: B256,
) -> Result<(), SafeError> {
	let contract = chain.transaction_hash(safe, request).await?;
	if contract != local {
		error!(
			%safe,
			%local,
			%contract,
			"Safe transaction hash mismatch, refusing to continue"
		);
		return Err(SafeError::HashMismatch { local, contract });
	}
	Ok(())
}

/// Error reported to a caller that tries to act on a closed transaction.
pub fn closed_error(tx: &PendingTransaction, current_nonce: U256) -> SafeError {
	match tx.status {
		TransactionStatus::Executed | TransactionStatus::Failed => SafeError::AlreadyExecuted {
			chain_tx_hash: tx.executed_tx_hash,
		},
		TransactionStatus::Stale | TransactionStatus::Pending => SafeError::StaleNonce {
			proposed: tx.request.nonce,
			current: current_nonce,
		},
	}
}

/// Rejects requests whose nonce no longer (or not yet) matches the Safe.
pub fn check_nonce(proposed: U256, current: U256) -> Result<(), SafeError> {
	if proposed < current {
		Err(SafeError::StaleNonce { proposed, current })
	} else if proposed > current {
		Err(SafeError::NonceAhead { proposed, current })
	} else {
		Ok(())
	}
}

impl CoreContext {
	/// Checks `local` against the hash the Safe contract computes for `request`.
	pub async fn verify_hash(
		&self,
		safe: Address,
		request: &SafeTransactionRequest,
		local: B256,
	) -> Result<(), SafeError> {
		verify_contract_hash(self.chain.as_ref(), safe, request, local).await
	}

	/// Settles a pending transaction whose nonce the Safe has moved past.
	///
	/// The nonce may have been consumed by this very transaction (executed
	/// elsewhere) or by a different one. Execution logs tell the two apart.
	pub async fn settle_superseded(
		&self,
		tx: &PendingTransaction,
		current_nonce: U256,
	) -> Result<PendingTransaction, SafeError> {
		let record = self
			.chain
			.find_execution(tx.safe_address, tx.transaction_hash)
			.await?;
		let conclusion = match record {
			Some(ExecutionRecord::Succeeded { chain_tx_hash }) => {
				Conclusion::Executed { chain_tx_hash }
			}
			Some(ExecutionRecord::Failed { chain_tx_hash }) => Conclusion::Failed {
				chain_tx_hash: Some(chain_tx_hash),
				reason: "inner call failed (ExecutionFailure)".to_string(),
			},
			None => Conclusion::Superseded { current_nonce },
		};
		self.conclude(tx, conclusion).await
	}

	/// Moves `tx` to its terminal status, then audits and publishes the
	/// transition. A record that is already terminal is returned unchanged.
	pub async fn conclude(
		&self,
		tx: &PendingTransaction,
		conclusion: Conclusion,
	) -> Result<PendingTransaction, SafeError> {
		let hash = tx.transaction_hash;
		let (status, chain_tx_hash, reason) = match &conclusion {
			Conclusion::Executed { chain_tx_hash } => {
				(TransactionStatus::Executed, Some(*chain_tx_hash), None)
			}
			Conclusion::Failed {
				chain_tx_hash,
				reason,
			} => (TransactionStatus::Failed, *chain_tx_hash, Some(reason.clone())),
			Conclusion::Superseded { current_nonce } => (
				TransactionStatus::Stale,
				None,
				Some(format!("nonce superseded, Safe is at {}", current_nonce)),
			),
		};

		let mut changed = false;
		let updated = self
			.store
			.update(hash, |record| {
				changed = false;
				if record.status.is_terminal() {
					return Ok(());
				}
				record.status = status;
				record.executed_tx_hash = chain_tx_hash;
				record.failure_reason = reason.clone();
				changed = true;
				Ok(())
			})
			.await?;

		if !changed {
			warn!(
				hash = %truncate_hash(&hash),
				status = %updated.status,
				"Transaction was already closed"
			);
			return Ok(updated);
		}

		info!(hash = %truncate_hash(&hash), %status, "Safe transaction closed");
		let safe = updated.safe_address;
		let (action, event) = match conclusion {
			Conclusion::Executed { chain_tx_hash } => (
				AuditAction::Executed,
				SafeEvent::Executed {
					hash,
					safe,
					chain_tx_hash,
				},
			),
			Conclusion::Failed { reason, .. } => (
				AuditAction::Failed,
				SafeEvent::ExecutionFailed { hash, safe, reason },
			),
			Conclusion::Superseded { current_nonce } => (
				AuditAction::Stale,
				SafeEvent::Superseded {
					hash,
					proposed_nonce: updated.request.nonce,
					current_nonce,
				},
			),
		};
		self.audit
			.record(AuditEntry::new(action).with_transaction(hash).with_details(json!({
				"status": updated.status,
				"chainTxHash": updated.executed_tx_hash,
				"reason": updated.failure_reason,
			})))
			.await;
		self.events.publish(event);
		Ok(updated)
	}
}
