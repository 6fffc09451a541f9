//! Key-value persistence for proposed transactions, distributions and audit
//! entries.
//!
//! Backends only deal in bytes. [`StorageService`] layers JSON encoding and
//! the `namespace:id` key scheme on top, and exposes optimistic
//! read-modify-write through [`StorageService::retrieve_versioned`] and
//! [`StorageService::replace`].

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Invalid key: {0}")]
	InvalidKey(String),
	#[error("Backend error: {0}")]
	Backend(String),
}

impl From<StorageError> for disburse_types::SafeError {
	fn from(err: StorageError) -> Self {
		disburse_types::SafeError::Storage(err.to_string())
	}
}

/// Low-level byte store.
///
/// `compare_and_set` is the only primitive that must be atomic; everything
/// that mutates shared records goes through it.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Writes `value` only if the current bytes equal `expected`
	/// (`None` meaning the key must be absent). Returns whether it wrote.
	async fn compare_and_set(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError>;

	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// All live keys starting with `prefix`, in no particular order.
	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

/// Opaque snapshot of a stored record, used to detect concurrent writers.
#[derive(Debug, Clone)]
pub struct Revision(Vec<u8>);

/// Typed access to a storage backend.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

fn key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn encode<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.backend
			.set_bytes(&key(namespace, id), encode(data)?, None)
			.await
	}

	/// Stores `data` only if nothing exists under the key yet.
	pub async fn insert_new<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<bool, StorageError> {
		self.backend
			.compare_and_set(&key(namespace, id), None, encode(data)?)
			.await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&key(namespace, id)).await?;
		decode(&bytes)
	}

	/// Like [`retrieve`](Self::retrieve) but also returns the revision
	/// needed for a later [`replace`](Self::replace).
	pub async fn retrieve_versioned<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<(T, Revision), StorageError> {
		let bytes = self.backend.get_bytes(&key(namespace, id)).await?;
		let value = decode(&bytes)?;
		Ok((value, Revision(bytes)))
	}

	/// Overwrites the record if it is still at `revision`. A `false` return
	/// means another writer got there first and the caller must re-read.
	pub async fn replace<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		revision: &Revision,
		data: &T,
	) -> Result<bool, StorageError> {
		self.backend
			.compare_and_set(&key(namespace, id), Some(&revision.0), encode(data)?)
			.await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key(namespace, id)).await
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&key(namespace, id)).await
	}

	/// Decodes every record in `namespace`. Records that vanish between
	/// listing and reading are skipped.
	pub async fn list<T: DeserializeOwned>(&self, namespace: &str) -> Result<Vec<T>, StorageError> {
		let prefix = format!("{}:", namespace);
		let mut keys = self.backend.list_keys(&prefix).await?;
		keys.sort();

		let mut values = Vec::with_capacity(keys.len());
		for k in keys {
			match self.backend.get_bytes(&k).await {
				Ok(bytes) => values.push(decode(&bytes)?),
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}
}
