//! Distribution bookkeeping on top of the Safe transaction flow.
//!
//! A distribution is a named recipient list that is turned into exactly one
//! Safe transaction at a time. Its status follows the linked transaction:
//! execution events close it, and a superseded proposal returns it to
//! `pending` so that it can be proposed again with a fresh nonce.

use crate::audit::AuditTrail;
use crate::collector::SignatureCollector;
use crate::compute::{compute_transaction, ComputedTransaction};
use disburse_builder::TransactionBuilder;
use disburse_chain::ChainInterface;
use disburse_storage::{StorageError, StorageService};
use disburse_types::{
	now, truncate_hash, Address, AuditAction, AuditEntry, Bytes, Distribution, DistributionKind,
	DistributionStatus, PendingTransaction, Recipient, SafeError, SafeEvent,
	SafeTransactionRequest, TransactionStatus, B256,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Storage namespace for distribution records.
pub const DISTRIBUTION_NAMESPACE: &str = "distribution";
/// Transaction hash to distribution id.
const DISTRIBUTION_INDEX_NAMESPACE: &str = "distribution_tx";

const MAX_WRITE_ATTEMPTS: usize = 5;

/// Manages distributions from creation through execution.
pub struct DistributionService {
	storage: Arc<StorageService>,
	builder: Arc<TransactionBuilder>,
	chain: Arc<dyn ChainInterface>,
	collector: Arc<SignatureCollector>,
	audit: AuditTrail,
}

fn status_name(status: DistributionStatus) -> &'static str {
	match status {
		DistributionStatus::Pending => "pending",
		DistributionStatus::Proposed => "proposed",
		DistributionStatus::Executed => "executed",
		DistributionStatus::Failed => "failed",
	}
}

fn ensure_pending(distribution: &Distribution) -> Result<(), SafeError> {
	if distribution.status != DistributionStatus::Pending {
		return Err(SafeError::invalid(
			"status",
			format!(
				"distribution {} is {}",
				distribution.id,
				status_name(distribution.status)
			),
		));
	}
	Ok(())
}

impl DistributionService {
	/// Creates the service. Call `spawn_sync` to follow execution events.
	pub fn new(
		storage: Arc<StorageService>,
		builder: Arc<TransactionBuilder>,
		chain: Arc<dyn ChainInterface>,
		collector: Arc<SignatureCollector>,
		audit: AuditTrail,
	) -> Self {
		Self {
			storage,
			builder,
			chain,
			collector,
			audit,
		}
	}

	/// Validates the recipients and records a new pending distribution.
	#[instrument(skip(self, recipients), fields(recipients = recipients.len()))]
	pub async fn create(
		&self,
		kind: DistributionKind,
		recipients: Vec<Recipient>,
		actor: Option<Address>,
	) -> Result<Distribution, SafeError> {
		let transfers = self.builder.validate(&recipients)?;
		let distribution = Distribution {
			id: uuid::Uuid::new_v4().to_string(),
			kind,
			recipient_count: recipients.len(),
			totals: TransactionBuilder::totals(&transfers),
			recipients,
			status: DistributionStatus::Pending,
			created_at: now(),
			proposed_at: None,
			executed_at: None,
			safe_address: None,
			transaction_hash: None,
			chain_tx_hash: None,
			proposer: None,
		};
		self.storage
			.store(DISTRIBUTION_NAMESPACE, &distribution.id, &distribution)
			.await?;

		info!(id = %distribution.id, "Created distribution");
		let mut entry = AuditEntry::new(AuditAction::Created)
			.with_distribution(&distribution.id)
			.with_details(json!({
				"kind": distribution.kind,
				"recipientCount": distribution.recipient_count,
				"totals": distribution.totals,
			}));
		if let Some(actor) = actor {
			entry = entry.with_actor(actor);
		}
		self.audit.record(entry).await;
		Ok(distribution)
	}

	/// Loads a distribution by id.
	pub async fn get(&self, id: &str) -> Result<Distribution, SafeError> {
		self.storage
			.retrieve(DISTRIBUTION_NAMESPACE, id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => SafeError::NotFound(format!("distribution {}", id)),
				other => other.into(),
			})
	}

	/// All distributions, newest first.
	pub async fn list(&self) -> Result<Vec<Distribution>, SafeError> {
		let mut all: Vec<Distribution> = self.storage.list(DISTRIBUTION_NAMESPACE).await?;
		all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(all)
	}

	/// Builds the Safe transaction for a pending distribution so that the
	/// proposer can sign its hash.
	pub async fn prepare(&self, id: &str, safe: Address) -> Result<ComputedTransaction, SafeError> {
		let distribution = self.get(id).await?;
		ensure_pending(&distribution)?;
		let transfers = self.builder.validate(&distribution.recipients)?;
		compute_transaction(self.chain.as_ref(), &self.builder, safe, &transfers).await
	}

	/// Proposes the prepared transaction and links it to the distribution.
	///
	/// `request` must be exactly what [`prepare`](Self::prepare) produced for
	/// this distribution's recipients.
	#[instrument(skip(self, request, signature), fields(safe = %safe, proposer = %proposer))]
	pub async fn propose(
		&self,
		id: &str,
		safe: Address,
		request: SafeTransactionRequest,
		proposer: Address,
		signature: Bytes,
	) -> Result<Distribution, SafeError> {
		let distribution = self.get(id).await?;
		ensure_pending(&distribution)?;
		let transfers = self.builder.validate(&distribution.recipients)?;
		let expected = self.builder.build_from_transfers(&transfers, request.nonce)?;
		if expected != request {
			return Err(SafeError::invalid(
				"request",
				"does not match the distribution's recipients",
			));
		}

		let tx = self
			.collector
			.propose(safe, request, proposer, signature)
			.await?;
		let hash = tx.transaction_hash;
		self.storage
			.store(DISTRIBUTION_INDEX_NAMESPACE, &hash.to_string(), &id.to_string())
			.await?;

		let updated = self
			.update(id, |d| {
				ensure_pending(d)?;
				d.status = DistributionStatus::Proposed;
				d.proposed_at = Some(now());
				d.safe_address = Some(safe);
				d.transaction_hash = Some(hash);
				d.proposer = Some(proposer);
				Ok(())
			})
			.await?;

		info!(id, hash = %truncate_hash(&hash), "Distribution proposed");
		self.audit
			.record(
				AuditEntry::new(AuditAction::Proposed)
					.with_distribution(id)
					.with_transaction(hash)
					.with_actor(proposer)
					.with_details(json!({ "safe": safe, "nonce": tx.request.nonce })),
			)
			.await;
		Ok(updated)
	}

	/// Copies the linked transaction's current state into the distribution.
	pub async fn reconcile(&self, id: &str) -> Result<Distribution, SafeError> {
		let distribution = self.get(id).await?;
		let Some(hash) = distribution.transaction_hash else {
			return Ok(distribution);
		};
		let tx = self.collector.refresh(hash).await?;
		self.apply_transaction(id, &tx).await
	}

	async fn apply_transaction(
		&self,
		id: &str,
		tx: &PendingTransaction,
	) -> Result<Distribution, SafeError> {
		let hash = tx.transaction_hash;
		let (action, target) = match tx.status {
			TransactionStatus::Pending => return self.get(id).await,
			TransactionStatus::Executed => (AuditAction::Executed, DistributionStatus::Executed),
			TransactionStatus::Failed => (AuditAction::Failed, DistributionStatus::Failed),
			TransactionStatus::Stale => (AuditAction::Updated, DistributionStatus::Pending),
		};

		let mut changed = false;
		let updated = self
			.update(id, |d| {
				changed = false;
				// Only the currently linked proposal may move the distribution.
				if d.transaction_hash != Some(hash) || d.status != DistributionStatus::Proposed {
					return Ok(());
				}
				d.status = target;
				match target {
					DistributionStatus::Executed => {
						d.executed_at = Some(now());
						d.chain_tx_hash = tx.executed_tx_hash;
					}
					DistributionStatus::Failed => d.chain_tx_hash = tx.executed_tx_hash,
					_ => {
						d.transaction_hash = None;
						d.safe_address = None;
						d.proposed_at = None;
						d.proposer = None;
					}
				}
				changed = true;
				Ok(())
			})
			.await?;

		if changed {
			info!(id, status = status_name(updated.status), "Distribution updated");
			self.audit
				.record(
					AuditEntry::new(action)
						.with_distribution(id)
						.with_transaction(hash)
						.with_details(json!({
							"status": updated.status,
							"chainTxHash": tx.executed_tx_hash,
							"reason": tx.failure_reason,
						})),
				)
				.await;
		}
		Ok(updated)
	}

	async fn distribution_for(&self, hash: B256) -> Result<Option<String>, SafeError> {
		match self
			.storage
			.retrieve::<String>(DISTRIBUTION_INDEX_NAMESPACE, &hash.to_string())
			.await
		{
			Ok(id) => Ok(Some(id)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e.into()),
		}
	}

	/// Reacts to one transaction event. Events for transactions that are not
	/// linked to a distribution are ignored.
	pub async fn handle_event(&self, event: &SafeEvent) -> Result<(), SafeError> {
		let hash = event.hash();
		let Some(id) = self.distribution_for(hash).await? else {
			return Ok(());
		};
		match event {
			SafeEvent::SignatureAdded {
				signer,
				signature_count,
				threshold,
				..
			} => {
				self.audit
					.record(
						AuditEntry::new(AuditAction::Approved)
							.with_distribution(&id)
							.with_transaction(hash)
							.with_actor(*signer)
							.with_details(json!({
								"signatureCount": signature_count,
								"threshold": threshold,
							})),
					)
					.await;
			}
			SafeEvent::Executed { .. }
			| SafeEvent::ExecutionFailed { .. }
			| SafeEvent::Superseded { .. } => {
				let tx = self.collector.get(hash).await?;
				self.apply_transaction(&id, &tx).await?;
			}
			SafeEvent::Proposed { .. } => {}
		}
		Ok(())
	}

	/// Keeps distributions in step with the transactions they are linked to.
	pub fn spawn_sync(self: Arc<Self>, mut events: broadcast::Receiver<SafeEvent>) -> JoinHandle<()> {
		tokio::spawn(async move {
			loop {
				match events.recv().await {
					Ok(event) => {
						if let Err(e) = self.handle_event(&event).await {
							warn!(error = %e, "Failed to sync distribution");
						}
					}
					Err(RecvError::Lagged(skipped)) => {
						warn!(skipped, "Distribution sync fell behind, run reconcile");
					}
					Err(RecvError::Closed) => break,
				}
			}
		})
	}

	async fn update<F>(&self, id: &str, mut apply: F) -> Result<Distribution, SafeError>
	where
		F: FnMut(&mut Distribution) -> Result<(), SafeError>,
	{
		for attempt in 1..=MAX_WRITE_ATTEMPTS {
			let (mut distribution, revision) = self
				.storage
				.retrieve_versioned::<Distribution>(DISTRIBUTION_NAMESPACE, id)
				.await
				.map_err(|e| match e {
					StorageError::NotFound => SafeError::NotFound(format!("distribution {}", id)),
					other => other.into(),
				})?;
			apply(&mut distribution)?;
			if self
				.storage
				.replace(DISTRIBUTION_NAMESPACE, id, &revision, &distribution)
				.await?
			{
				return Ok(distribution);
			}
			debug!(attempt, "Concurrent update of distribution, retrying");
		}
		Err(SafeError::Storage(format!(
			"gave up updating distribution {} after {} conflicting writes",
			id, MAX_WRITE_ATTEMPTS
		)))
	}
}
