//! Persistence of proposed transactions.
//!
//! Writers take the per-hash lock from [`TransactionLocks`] for the duration
//! of their check-then-write, and every write is a compare-and-set against
//! the revision they read. The lock serializes writers inside this process;
//! the CAS keeps a second process sharing the backend from overwriting a
//! concurrent update.

use dashmap::DashMap;
use disburse_storage::{StorageError, StorageService};
use disburse_types::{now, Address, PendingTransaction, SafeError, B256};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Storage namespace for pending transaction records.
pub const SAFE_TX_NAMESPACE: &str = "safe_tx";

const MAX_WRITE_ATTEMPTS: usize = 5;

/// One async mutex per transaction hash.
///
/// Entries exist only while someone holds or waits for the lock; the last
/// guard to drop removes its entry.
#[derive(Clone, Default)]
pub struct TransactionLocks {
	inner: Arc<DashMap<B256, Arc<Mutex<()>>>>,
}

impl TransactionLocks {
	/// Waits for exclusive access to `hash`.
	pub async fn acquire(&self, hash: B256) -> TransactionGuard {
		let lock = self.inner.entry(hash).or_default().clone();
		TransactionGuard {
			guard: Some(lock.lock_owned().await),
			hash,
			locks: self.inner.clone(),
		}
	}

	/// Number of hashes with a live lock entry.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.is_empty()
	}
}

/// Exclusive access to one transaction hash, released on drop.
pub struct TransactionGuard {
	guard: Option<OwnedMutexGuard<()>>,
	hash: B256,
	locks: Arc<DashMap<B256, Arc<Mutex<()>>>>,
}

impl Drop for TransactionGuard {
	fn drop(&mut self) {
		self.guard.take();
		// Waiters hold a clone of the mutex, so only an idle entry is removed.
		self.locks
			.remove_if(&self.hash, |_, lock| Arc::strong_count(lock) == 1);
	}
}

/// Persistence for [`PendingTransaction`] records keyed by transaction hash.
#[derive(Clone)]
pub struct TransactionStore {
	/// Underlying storage service.
	storage: Arc<StorageService>,
}

fn id(hash: &B256) -> String {
	hash.to_string()
}

impl TransactionStore {
	/// Creates a store over the shared storage service.
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self { storage }
	}

	/// Creates the record; `AlreadyProposed` if the hash is already stored.
	pub async fn insert(&self, tx: &PendingTransaction) -> Result<(), SafeError> {
		let hash = tx.transaction_hash;
		if self
			.storage
			.insert_new(SAFE_TX_NAMESPACE, &id(&hash), tx)
			.await?
		{
			Ok(())
		} else {
			Err(SafeError::AlreadyProposed(hash))
		}
	}

	/// Whether a record exists for `hash`.
	pub async fn exists(&self, hash: B256) -> Result<bool, SafeError> {
		Ok(self.storage.exists(SAFE_TX_NAMESPACE, &id(&hash)).await?)
	}

	/// Loads the record for `hash`, `TransactionNotFound` if absent.
	pub async fn get(&self, hash: B256) -> Result<PendingTransaction, SafeError> {
		self.storage
			.retrieve(SAFE_TX_NAMESPACE, &id(&hash))
			.await
			.map_err(|e| not_found_or(e, hash))
	}

	/// Transactions for `safe`, newest first.
	pub async fn list_by_safe(&self, safe: Address) -> Result<Vec<PendingTransaction>, SafeError> {
		let all: Vec<PendingTransaction> = self.storage.list(SAFE_TX_NAMESPACE).await?;
		let mut matching: Vec<_> = all.into_iter().filter(|tx| tx.safe_address == safe).collect();
		matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
		Ok(matching)
	}

	/// Read-modify-write of one record. `apply` may run more than once if a
	/// concurrent writer wins the compare-and-set, and must therefore only
	/// depend on the record it is given.
	pub async fn update<F>(&self, hash: B256, mut apply: F) -> Result<PendingTransaction, SafeError>
	where
		F: FnMut(&mut PendingTransaction) -> Result<(), SafeError>,
	{
		let key = id(&hash);
		for attempt in 1..=MAX_WRITE_ATTEMPTS {
			let (mut tx, revision) = self
				.storage
				.retrieve_versioned::<PendingTransaction>(SAFE_TX_NAMESPACE, &key)
				.await
				.map_err(|e| not_found_or(e, hash))?;
			apply(&mut tx)?;
			tx.updated_at = now();
			if self
				.storage
				.replace(SAFE_TX_NAMESPACE, &key, &revision, &tx)
				.await?
			{
				return Ok(tx);
			}
			debug!(attempt, "Concurrent update of Safe transaction, retrying");
		}
		Err(SafeError::Storage(format!(
			"gave up updating {} after {} conflicting writes",
			hash, MAX_WRITE_ATTEMPTS
		)))
	}
}

fn not_found_or(err: StorageError, hash: B256) -> SafeError {
	match err {
		StorageError::NotFound => SafeError::NotFound(format!("transaction {}", hash)),
		other => other.into(),
	}
}
