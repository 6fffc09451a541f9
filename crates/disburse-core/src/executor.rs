//! Signature packing and `execTransaction` submission.
//!
//! The Safe contract verifies signatures in order and requires strictly
//! increasing owner addresses, so the stored signatures are filtered to the
//! current owners and sorted ascending by signer before being concatenated.

use crate::context::{check_nonce, closed_error, Conclusion, CoreContext};
use disburse_account::signature::SIGNATURE_LENGTH;
use disburse_chain::ChainError;
use disburse_types::{
	truncate_hash, Address, Bytes, ExecutionReceipt, SafeError, SafeSignature, TransactionStatus,
	B256,
};
use tracing::{error, info, instrument, warn};

/// Concatenates the signatures of current owners in ascending signer order.
/// Returns the packed bytes and how many signatures went in.
pub fn pack_signatures(signatures: &[SafeSignature], owners: &[Address]) -> (Bytes, usize) {
	let mut valid: Vec<&SafeSignature> = signatures
		.iter()
		.filter(|s| owners.contains(&s.signer))
		.collect();
	valid.sort_by_key(|s| s.signer);

	let mut packed = Vec::with_capacity(valid.len() * SIGNATURE_LENGTH);
	for sig in &valid {
		packed.extend_from_slice(&sig.signature);
	}
	(Bytes::from(packed), valid.len())
}

/// Submits fully signed transactions through `execTransaction`.
pub struct Executor {
	ctx: CoreContext,
}

impl Executor {
	/// Creates an executor over the shared context.
	pub fn new(ctx: CoreContext) -> Self {
		Self { ctx }
	}

	/// Executes a transaction that has gathered enough owner signatures.
	///
	/// All checks run before anything is sent. The submission itself is never
	/// retried: a revert leaves the record pending so that it can be looked
	/// at and executed again deliberately.
	#[instrument(skip(self), fields(hash = %truncate_hash(&hash)))]
	pub async fn execute(&self, hash: B256) -> Result<ExecutionReceipt, SafeError> {
		let _guard = self.ctx.locks.acquire(hash).await;
		let tx = self.ctx.store.get(hash).await?;
		if matches!(
			tx.status,
			TransactionStatus::Executed | TransactionStatus::Failed
		) {
			return Err(SafeError::AlreadyExecuted {
				chain_tx_hash: tx.executed_tx_hash,
			});
		}

		let state = self.ctx.chain.safe_state(tx.safe_address).await?;
		if tx.status == TransactionStatus::Stale {
			return Err(closed_error(&tx, state.nonce));
		}
		if tx.request.nonce < state.nonce {
			let settled = self.ctx.settle_superseded(&tx, state.nonce).await?;
			return Err(closed_error(&settled, state.nonce));
		}
		check_nonce(tx.request.nonce, state.nonce)?;

		let need = state.threshold;
		if (tx.signatures.len() as u64) < need {
			return Err(SafeError::InsufficientSignatures {
				have: tx.signatures.len(),
				need,
			});
		}
		let (packed, used) = pack_signatures(&tx.signatures, &state.owners);
		if (used as u64) < need {
			warn!(
				stored = tx.signatures.len(),
				valid = used,
				"Signers are no longer owners of the Safe"
			);
			return Err(SafeError::InsufficientSignatures { have: used, need });
		}

		self.ctx.verify_hash(tx.safe_address, &tx.request, hash).await?;

		info!(
			signatures = used,
			executor = %self.ctx.chain.executor(),
			"Submitting execTransaction"
		);
		let submitted = match self
			.ctx
			.chain
			.execute(tx.safe_address, &tx.request, packed)
			.await
		{
			Ok(submitted) => submitted,
			Err(ChainError::Reverted(reason)) => {
				// A competing executor may have consumed the nonce after our read.
				let state = self.ctx.chain.safe_state(tx.safe_address).await?;
				if tx.request.nonce < state.nonce {
					info!(%reason, "Nonce moved during submission, settling");
					let settled = self.ctx.settle_superseded(&tx, state.nonce).await?;
					return Err(closed_error(&settled, state.nonce));
				}
				warn!(%reason, "execTransaction reverted");
				return Err(SafeError::ExecutionReverted { reason });
			}
			Err(e) => {
				let err = SafeError::from(e);
				warn!(error = %err, "execTransaction did not go through");
				return Err(err);
			}
		};

		if !submitted.inner_success {
			let reason = "Safe emitted ExecutionFailure, the inner call reverted".to_string();
			let conclusion = Conclusion::Failed {
				chain_tx_hash: Some(submitted.chain_tx_hash),
				reason: reason.clone(),
			};
			if let Err(e) = self.ctx.conclude(&tx, conclusion).await {
				error!(error = %e, "Failed to record execution failure");
			}
			return Err(SafeError::ExecutionReverted { reason });
		}

		let conclusion = Conclusion::Executed {
			chain_tx_hash: submitted.chain_tx_hash,
		};
		if let Err(e) = self.ctx.conclude(&tx, conclusion).await {
			// The nonce moved on chain; the next read settles the record.
			error!(
				error = %e,
				chain_tx_hash = %submitted.chain_tx_hash,
				"Executed on chain but failed to record it"
			);
		}
		Ok(ExecutionReceipt {
			chain_tx_hash: submitted.chain_tx_hash,
			block_number: submitted.block_number,
			signatures_used: used,
		})
	}
}
