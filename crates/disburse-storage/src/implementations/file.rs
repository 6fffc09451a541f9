//! File-backed storage.
//!
//! A key `namespace:id` maps to `<base>/<namespace>/<id>.bin`. Writes go to a
//! temporary file first and are renamed into place. Compare-and-set is
//! serialized by a process-local lock, so a single process must own the
//! directory.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use disburse_types::{ConfigSchema, Field, FieldType, Schema, ValidationError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;

const EXTENSION: &str = "bin";

pub struct FileStorage {
	base_path: PathBuf,
	write_lock: Mutex<()>,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self {
			base_path,
			write_lock: Mutex::new(()),
		}
	}

	fn file_path(&self, key: &str) -> Result<PathBuf, StorageError> {
		let (namespace, id) = key
			.split_once(':')
			.ok_or_else(|| StorageError::InvalidKey(key.to_string()))?;
		let valid = |s: &str| {
			!s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\', ':'])
		};
		if !valid(namespace) || !valid(id) {
			return Err(StorageError::InvalidKey(key.to_string()));
		}
		Ok(self
			.base_path
			.join(namespace)
			.join(format!("{}.{}", id, EXTENSION)))
	}

	async fn read(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
		match fs::read(path).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn write(path: &Path, value: Vec<u8>) -> Result<(), StorageError> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}
}

pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![Field::new("storage_path", FieldType::String)]).validate(config)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.file_path(key)?;
		Self::read(&path).await?.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		_ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let path = self.file_path(key)?;
		let _guard = self.write_lock.lock().await;
		Self::write(&path, value).await
	}

	async fn compare_and_set(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		value: Vec<u8>,
	) -> Result<bool, StorageError> {
		let path = self.file_path(key)?;
		let _guard = self.write_lock.lock().await;
		let current = Self::read(&path).await?;
		if current.as_deref() != expected {
			return Ok(false);
		}
		Self::write(&path, value).await?;
		Ok(true)
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.file_path(key)?;
		let _guard = self.write_lock.lock().await;
		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let path = self.file_path(key)?;
		fs::try_exists(&path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		// Prefixes are expected to name a whole namespace, e.g. "safe_tx:".
		let namespace = prefix.split(':').next().unwrap_or_default();
		let dir = self.base_path.join(namespace);

		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
				continue;
			}
			if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
				let key = format!("{}:{}", namespace, stem);
				if key.starts_with(prefix) {
					keys.push(key);
				}
			}
		}
		Ok(keys)
	}
}

/// Configuration parameters:
/// - `storage_path`: base directory (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Backend(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage");

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
}
