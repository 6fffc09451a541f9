//! Signature collection.
//!
//! A transaction is proposed with the proposer's own signature and then
//! gathers one signature per owner until it can be executed. Owners,
//! threshold and nonce are read from the chain on every call; nothing about
//! the Safe is cached between signers.

use crate::context::{check_nonce, closed_error, CoreContext};
use disburse_account::signature::recover_signer;
use disburse_types::eip712::compute_hash;
use disburse_types::{
	now, truncate_hash, Address, AuditAction, AuditEntry, Bytes, PendingTransaction, SafeError,
	SafeEvent, SafeSignature, SafeState, SafeTransactionRequest, SignatureProgress,
	TransactionStatus, TransactionStatusView, B256, U256,
};
use serde_json::json;
use tracing::{debug, info, instrument};

/// Checks that `signer` is an owner and actually produced `signature`.
pub fn verify_signature(
	hash: B256,
	signer: Address,
	signature: &[u8],
	state: &SafeState,
) -> Result<(), SafeError> {
	if !state.is_owner(&signer) {
		return Err(SafeError::NotAnOwner(signer));
	}
	let recovered = recover_signer(hash, signature)?;
	if recovered != signer {
		return Err(SafeError::invalid(
			"signature",
			format!("signature recovers to {}, not {}", recovered, signer),
		));
	}
	Ok(())
}

fn ensure_open(tx: &PendingTransaction, current_nonce: U256) -> Result<(), SafeError> {
	match tx.status {
		TransactionStatus::Pending => Ok(()),
		_ => Err(closed_error(tx, current_nonce)),
	}
}

fn owner_signatures(tx: &PendingTransaction, state: &SafeState) -> usize {
	tx.signatures
		.iter()
		.filter(|s| state.is_owner(&s.signer))
		.count()
}

/// Accepts proposals and owner signatures for Safe transactions.
pub struct SignatureCollector {
	/// Shared service context.
	ctx: CoreContext,
}

impl SignatureCollector {
	/// Creates a collector over the shared context.
	pub fn new(ctx: CoreContext) -> Self {
		Self { ctx }
	}

	/// Creates a pending transaction carrying the proposer's signature.
	#[instrument(skip(self, request, signature), fields(safe = %safe, proposer = %proposer))]
	pub async fn propose(
		&self,
		safe: Address,
		request: SafeTransactionRequest,
		proposer: Address,
		signature: Bytes,
	) -> Result<PendingTransaction, SafeError> {
		let chain_id = self.ctx.chain.chain_id();
		let hash = compute_hash(safe, chain_id, &request);
		let _guard = self.ctx.locks.acquire(hash).await;

		if self.ctx.store.exists(hash).await? {
			return Err(SafeError::AlreadyProposed(hash));
		}
		self.ctx.verify_hash(safe, &request, hash).await?;

		let state = self.ctx.chain.safe_state(safe).await?;
		check_nonce(request.nonce, state.nonce)?;
		verify_signature(hash, proposer, &signature, &state)?;

		let created_at = now();
		let tx = PendingTransaction {
			transaction_hash: hash,
			safe_address: safe,
			chain_id,
			request,
			signatures: vec![SafeSignature {
				signer: proposer,
				signature,
				added_at: created_at,
			}],
			status: TransactionStatus::Pending,
			proposer,
			created_at,
			updated_at: created_at,
			executed_tx_hash: None,
			failure_reason: None,
		};
		self.ctx.store.insert(&tx).await?;

		info!(
			hash = %truncate_hash(&hash),
			nonce = %tx.request.nonce,
			threshold = state.threshold,
			"Proposed Safe transaction"
		);
		self.ctx
			.audit
			.record(
				AuditEntry::new(AuditAction::Proposed)
					.with_actor(proposer)
					.with_transaction(hash)
					.with_details(json!({
						"safe": safe,
						"nonce": tx.request.nonce,
						"threshold": state.threshold,
					})),
			)
			.await;
		self.ctx.events.publish(SafeEvent::Proposed {
			hash,
			safe,
			proposer,
		});
		Ok(tx)
	}

	/// Adds an owner's signature to a pending transaction.
	#[instrument(skip(self, signature), fields(hash = %truncate_hash(&hash), signer = %signer))]
	pub async fn add_signature(
		&self,
		hash: B256,
		signer: Address,
		signature: Bytes,
	) -> Result<SignatureProgress, SafeError> {
		let _guard = self.ctx.locks.acquire(hash).await;
		let tx = self.ctx.store.get(hash).await?;
		let state = self.ctx.chain.safe_state(tx.safe_address).await?;

		ensure_open(&tx, state.nonce)?;
		if tx.has_signer(&signer) {
			return Err(SafeError::DuplicateSigner(signer));
		}
		if tx.request.nonce < state.nonce {
			let settled = self.ctx.settle_superseded(&tx, state.nonce).await?;
			return Err(closed_error(&settled, state.nonce));
		}
		verify_signature(hash, signer, &signature, &state)?;

		let added_at = now();
		let updated = self
			.ctx
			.store
			.update(hash, |record| {
				ensure_open(record, state.nonce)?;
				if record.has_signer(&signer) {
					return Err(SafeError::DuplicateSigner(signer));
				}
				record.signatures.push(SafeSignature {
					signer,
					signature: signature.clone(),
					added_at,
				});
				Ok(())
			})
			.await?;

		let progress = SignatureProgress {
			signature_count: updated.signatures.len(),
			threshold: state.threshold,
			ready_to_execute: owner_signatures(&updated, &state) as u64 >= state.threshold,
		};
		info!(
			count = progress.signature_count,
			threshold = progress.threshold,
			ready = progress.ready_to_execute,
			"Added signature"
		);
		self.ctx
			.audit
			.record(
				AuditEntry::new(AuditAction::Approved)
					.with_actor(signer)
					.with_transaction(hash)
					.with_details(json!({
						"signatureCount": progress.signature_count,
						"threshold": progress.threshold,
					})),
			)
			.await;
		self.ctx.events.publish(SafeEvent::SignatureAdded {
			hash,
			signer,
			signature_count: progress.signature_count,
			threshold: progress.threshold,
		});
		Ok(progress)
	}

	/// Returns the stored transaction for `hash`.
	pub async fn get(&self, hash: B256) -> Result<PendingTransaction, SafeError> {
		self.ctx.store.get(hash).await
	}

	/// Returns every stored transaction proposed for `safe`.
	pub async fn list_by_safe(&self, safe: Address) -> Result<Vec<PendingTransaction>, SafeError> {
		self.ctx.store.list_by_safe(safe).await
	}

	/// Signing progress measured against the Safe's current owners.
	pub async fn status(&self, hash: B256) -> Result<TransactionStatusView, SafeError> {
		let tx = self.ctx.store.get(hash).await?;
		let state = self.ctx.chain.safe_state(tx.safe_address).await?;
		let ready_to_execute = tx.status == TransactionStatus::Pending
			&& tx.request.nonce == state.nonce
			&& owner_signatures(&tx, &state) as u64 >= state.threshold;
		debug!(hash = %truncate_hash(&hash), status = %tx.status, "Read transaction status");

		Ok(TransactionStatusView {
			transaction_hash: tx.transaction_hash,
			safe_address: tx.safe_address,
			status: tx.status,
			signature_count: tx.signatures.len(),
			threshold: state.threshold,
			signers: tx.signers(),
			ready_to_execute,
			executed_tx_hash: tx.executed_tx_hash,
		})
	}

	/// Re-reads the Safe nonce and closes the transaction if it has been
	/// superseded or executed elsewhere.
	pub async fn refresh(&self, hash: B256) -> Result<PendingTransaction, SafeError> {
		let _guard = self.ctx.locks.acquire(hash).await;
		let tx = self.ctx.store.get(hash).await?;
		if tx.status.is_terminal() {
			return Ok(tx);
		}
		let state = self.ctx.chain.safe_state(tx.safe_address).await?;
		if tx.request.nonce < state.nonce {
			return self.ctx.settle_superseded(&tx, state.nonce).await;
		}
		Ok(tx)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::audit::AuditTrail;
	use crate::event_bus::EventBus;
	use crate::store::{TransactionLocks, TransactionStore};
	use crate::test_support::{
		eth_sign, owner, request, sign, storage, FailingStorage, MockChain, CHAIN_ID, SAFE,
	};
	use disburse_storage::StorageService;
	use std::sync::Arc;

	fn collector(chain: Arc<MockChain>) -> SignatureCollector {
		let storage = storage();
		SignatureCollector::new(CoreContext {
			store: TransactionStore::new(storage.clone()),
			chain,
			locks: TransactionLocks::default(),
			audit: AuditTrail::new(storage),
			events: EventBus::default(),
		})
	}

	#[tokio::test]
	async fn propose_then_collect_until_ready() {
		let (a, b, c) = (owner(1), owner(2), owner(3));
		let chain = MockChain::new(&[&a, &b, &c], 2, 5);
		let collector = collector(chain);
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);

		let tx = collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap();
		assert_eq!(tx.transaction_hash, hash);
		assert_eq!(tx.signers(), vec![a.address()]);

		let status = collector.status(hash).await.unwrap();
		assert_eq!(status.signature_count, 1);
		assert!(!status.ready_to_execute);

		let progress = collector
			.add_signature(hash, b.address(), eth_sign(&b, hash))
			.await
			.unwrap();
		assert_eq!(
			progress,
			SignatureProgress {
				signature_count: 2,
				threshold: 2,
				ready_to_execute: true
			}
		);
		assert!(collector.status(hash).await.unwrap().ready_to_execute);
	}

	#[tokio::test]
	async fn status_lists_signers_in_ascending_order() {
		let (a, b) = (owner(1), owner(2));
		let (low, high) = if a.address() < b.address() {
			(a, b)
		} else {
			(b, a)
		};
		let collector = collector(MockChain::new(&[&low, &high], 2, 5));
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);

		collector
			.propose(SAFE, req, high.address(), sign(&high, hash))
			.await
			.unwrap();
		collector
			.add_signature(hash, low.address(), sign(&low, hash))
			.await
			.unwrap();

		let status = collector.status(hash).await.unwrap();
		assert_eq!(status.signers, vec![low.address(), high.address()]);
		let stored = collector.get(hash).await.unwrap();
		assert_eq!(stored.signatures[0].signer, high.address());
	}

	#[tokio::test]
	async fn second_proposal_of_same_payload_is_rejected() {
		let a = owner(1);
		let collector = collector(MockChain::new(&[&a], 1, 5));
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		collector
			.propose(SAFE, req.clone(), a.address(), sign(&a, hash))
			.await
			.unwrap();
		let err = collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap_err();
		assert_eq!(err, SafeError::AlreadyProposed(hash));
	}

	#[tokio::test]
	async fn duplicate_signer_leaves_one_entry() {
		let (a, b) = (owner(1), owner(2));
		let collector = collector(MockChain::new(&[&a, &b], 2, 5));
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap();

		let err = collector
			.add_signature(hash, a.address(), sign(&a, hash))
			.await
			.unwrap_err();
		assert_eq!(err, SafeError::DuplicateSigner(a.address()));
		assert_eq!(collector.get(hash).await.unwrap().signatures.len(), 1);
	}

	#[tokio::test]
	async fn rejects_non_owners_and_forged_signatures() {
		let (a, b, outsider) = (owner(1), owner(2), owner(9));
		let collector = collector(MockChain::new(&[&a, &b], 2, 5));
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);

		let err = collector
			.propose(SAFE, req.clone(), outsider.address(), sign(&outsider, hash))
			.await
			.unwrap_err();
		assert_eq!(err, SafeError::NotAnOwner(outsider.address()));

		collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap();

		// signed by a, claimed by b
		let err = collector
			.add_signature(hash, b.address(), sign(&a, B256::repeat_byte(3)))
			.await
			.unwrap_err();
		assert!(matches!(err, SafeError::InvalidInput { ref field, .. } if field == "signature"));

		let mut contract_sig = sign(&b, hash).to_vec();
		contract_sig[64] = 0;
		let err = collector
			.add_signature(hash, b.address(), contract_sig.into())
			.await
			.unwrap_err();
		assert!(matches!(err, SafeError::InvalidInput { .. }));
		assert_eq!(collector.get(hash).await.unwrap().signatures.len(), 1);
	}

	#[tokio::test]
	async fn unknown_hash_is_not_found() {
		let a = owner(1);
		let collector = collector(MockChain::new(&[&a], 1, 5));
		let hash = B256::repeat_byte(4);
		let err = collector
			.add_signature(hash, a.address(), sign(&a, hash))
			.await
			.unwrap_err();
		assert!(matches!(err, SafeError::NotFound(_)));
	}

	#[tokio::test]
	async fn stale_nonce_is_refused_at_proposal() {
		let a = owner(1);
		let collector = collector(MockChain::new(&[&a], 1, 6));
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		let err = collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap_err();
		assert_eq!(
			err,
			SafeError::StaleNonce {
				proposed: U256::from(5),
				current: U256::from(6)
			}
		);
	}

	#[tokio::test]
	async fn superseded_transaction_goes_stale_on_signature_or_refresh() {
		let (a, b) = (owner(1), owner(2));
		let chain = MockChain::new(&[&a, &b], 2, 5);
		let collector = collector(chain.clone());
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap();

		chain.set_nonce(6);
		let err = collector
			.add_signature(hash, b.address(), sign(&b, hash))
			.await
			.unwrap_err();
		assert!(matches!(err, SafeError::StaleNonce { .. }));
		assert_eq!(
			collector.refresh(hash).await.unwrap().status,
			TransactionStatus::Stale
		);
	}

	#[tokio::test]
	async fn refresh_keeps_current_transactions_pending() {
		let a = owner(1);
		let collector = collector(MockChain::new(&[&a, &owner(2)], 2, 5));
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap();
		assert_eq!(
			collector.refresh(hash).await.unwrap().status,
			TransactionStatus::Pending
		);
	}

	#[tokio::test]
	async fn contract_hash_mismatch_halts_proposal() {
		let a = owner(1);
		let chain = MockChain::new(&[&a], 1, 5);
		chain.set_contract_hash(B256::repeat_byte(0xee));
		let collector = collector(chain);
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		let err = collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap_err();
		assert!(matches!(err, SafeError::HashMismatch { .. }));
		assert!(collector.get(hash).await.is_err());
	}

	#[tokio::test]
	async fn unavailable_chain_is_retryable() {
		let a = owner(1);
		let chain = MockChain::new(&[&a], 1, 5);
		chain.set_unavailable(true);
		let collector = collector(chain);
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		let err = collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap_err();
		assert!(err.is_retryable());
	}

	#[tokio::test]
	async fn audit_outage_does_not_block_signing() {
		let (a, b) = (owner(1), owner(2));
		let collector = SignatureCollector::new(CoreContext {
			store: TransactionStore::new(storage()),
			chain: MockChain::new(&[&a, &b], 2, 5),
			locks: TransactionLocks::default(),
			audit: AuditTrail::new(Arc::new(StorageService::new(Box::new(FailingStorage)))),
			events: EventBus::default(),
		});
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		collector
			.propose(SAFE, req, a.address(), sign(&a, hash))
			.await
			.unwrap();
		let progress = collector
			.add_signature(hash, b.address(), sign(&b, hash))
			.await
			.unwrap();
		assert!(progress.ready_to_execute);
	}

	#[tokio::test]
	async fn concurrent_signers_are_all_kept() {
		let owners: Vec<_> = (1..=4u8).map(owner).collect();
		let refs: Vec<_> = owners.iter().collect();
		let collector = Arc::new(collector(MockChain::new(&refs, 3, 5)));
		let req = request(5);
		let hash = compute_hash(SAFE, CHAIN_ID, &req);
		collector
			.propose(SAFE, req, owners[0].address(), sign(&owners[0], hash))
			.await
			.unwrap();

		let handles: Vec<_> = owners[1..]
			.iter()
			.map(|o| {
				let collector = collector.clone();
				let (signer, sig) = (o.address(), sign(o, hash));
				tokio::spawn(async move { collector.add_signature(hash, signer, sig).await })
			})
			.collect();
		for handle in handles {
			handle.await.unwrap().unwrap();
		}
		assert_eq!(collector.get(hash).await.unwrap().signatures.len(), 4);
	}
}
