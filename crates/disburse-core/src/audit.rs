//! Append-only audit trail.
//!
//! Recording is best effort. A failed write is logged and swallowed; signing
//! and execution proceed without it.

use disburse_storage::StorageService;
use disburse_types::{AuditEntry, SafeError, B256};
use std::sync::Arc;
use tracing::{debug, warn};

/// Storage namespace for audit entries.
pub const AUDIT_NAMESPACE: &str = "audit";

/// Append-only log of distribution and transaction actions.
#[derive(Clone)]
pub struct AuditTrail {
	storage: Arc<StorageService>,
}

impl AuditTrail {
	/// Creates an audit trail backed by `storage`.
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Appends `entry`. Storage failures are logged and never propagated.
	pub async fn record(&self, entry: AuditEntry) {
		// Zero-padded timestamp first so listing returns entries in order.
		let id = format!("{:012}-{}", entry.timestamp.max(0), entry.id);
		match self.storage.insert_new(AUDIT_NAMESPACE, &id, &entry).await {
			Ok(_) => debug!(action = %entry.action, "Recorded audit entry"),
			Err(e) => warn!(action = %entry.action, error = %e, "Failed to record audit entry"),
		}
	}

	/// Entries for one distribution, oldest first.
	pub async fn for_distribution(&self, distribution_id: &str) -> Result<Vec<AuditEntry>, SafeError> {
		self.filtered(|e| e.distribution_id.as_deref() == Some(distribution_id))
			.await
	}

	/// Entries for one Safe transaction hash, oldest first.
	pub async fn for_transaction(&self, hash: B256) -> Result<Vec<AuditEntry>, SafeError> {
		self.filtered(|e| e.transaction_hash == Some(hash)).await
	}

	async fn filtered<F>(&self, keep: F) -> Result<Vec<AuditEntry>, SafeError>
	where
		F: Fn(&AuditEntry) -> bool,
	{
		let entries: Vec<AuditEntry> = self.storage.list(AUDIT_NAMESPACE).await?;
		Ok(entries.into_iter().filter(|e| keep(e)).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::FailingStorage;
	use disburse_storage::implementations::memory::MemoryStorage;
	use disburse_types::{Address, AuditAction};

	#[tokio::test]
	async fn entries_are_queryable_by_transaction_and_distribution() {
		let trail = AuditTrail::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))));
		let hash = B256::repeat_byte(9);

		trail
			.record(AuditEntry::new(AuditAction::Created).with_distribution("d1"))
			.await;
		trail
			.record(
				AuditEntry::new(AuditAction::Proposed)
					.with_distribution("d1")
					.with_transaction(hash)
					.with_actor(Address::repeat_byte(1)),
			)
			.await;
		trail
			.record(AuditEntry::new(AuditAction::Created).with_distribution("d2"))
			.await;

		let d1 = trail.for_distribution("d1").await.unwrap();
		assert_eq!(d1.len(), 2);
		let by_hash = trail.for_transaction(hash).await.unwrap();
		assert_eq!(by_hash.len(), 1);
		assert_eq!(by_hash[0].action, AuditAction::Proposed);
	}

	#[tokio::test]
	async fn write_failures_are_swallowed() {
		let trail = AuditTrail::new(Arc::new(StorageService::new(Box::new(FailingStorage))));
		trail.record(AuditEntry::new(AuditAction::Executed)).await;
		assert!(trail.for_distribution("any").await.is_err());
	}
}
