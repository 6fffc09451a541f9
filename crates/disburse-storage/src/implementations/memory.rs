//! In-process storage backend.
//!
//! Data is lost on restart. Compare-and-set is atomic within the process
//! because each key's entry is locked for the duration of the check.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use disburse_types::{ConfigSchema, Schema, ValidationError};
use std::time::{Duration, Instant};

struct Slot {
	value: Vec<u8>,
	expires_at: Option<Instant>,
}

impl Slot {
	fn live(&self) -> bool {
		self.expires_at.map_or(true, |t| Instant::now() < t)
	}
}

#[derive(Default)]
pub struct MemoryStorage {
	entries: DashMap<String, Slot>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		match self.entries.get(key) {
			Some(slot) if slot.live() => Ok(slot.value.clone()),
			_ => Err(StorageError::NotFound),
		}
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let expires_at = ttl.map(|ttl| Instant::now() + ttl);
		self.entries
			.insert(key.to_string(), Slot { value, expires_at });
		Ok(())
	}

	async fn compare_and_set(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let slot = Slot {
			value,
			expires_at: None,
		};
		match (self.entries.entry(key.to_string()), expected) {
			(Entry::Occupied(mut occupied), Some(expected)) => {
				if occupied.get().live() && occupied.get().value == expected {
					occupied.insert(slot);
					Ok(true)
				} else {
					Ok(false)
				}
			}
			(Entry::Occupied(mut occupied), None) => {
				if occupied.get().live() {
					Ok(false)
				} else {
					occupied.insert(slot);
					Ok(true)
				}
			}
			(Entry::Vacant(vacant), None) => {
				vacant.insert(slot);
				Ok(true)
			}
			(Entry::Vacant(_), Some(_)) => Ok(false),
		}
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.entries.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.entries.get(key).is_some_and(|slot| slot.live()))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		Ok(self
			.entries
			.iter()
			.filter(|entry| entry.key().starts_with(prefix) && entry.value().live())
			.map(|entry| entry.key().clone())
			.collect())
	}
}

pub fn create_storage(_config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	Ok(Box::new(MemoryStorage::new()))
}
