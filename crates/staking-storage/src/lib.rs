//! Storage for transaction records.
//!
//! Backends implement a small byte-level key/value interface; the
//! [`StorageService`] layered on top handles key construction and JSON
//! serialization so callers work with typed records.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use staking_types::{ConfigSchema, ImplementationRegistry, StorageKey};
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Already exists")]
	AlreadyExists,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Low-level interface every storage backend implements.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes, replacing any existing value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations as (name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Typed storage operations over a backend.
///
/// Items are keyed `{collection}-{id}` (see [`StorageKey::key_for`]) and
/// stored as JSON.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a new item, failing if one already exists under the same id.
	pub async fn create<T: Serialize>(
		&self,
		collection: StorageKey,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = collection.key_for(id);
		if self.backend.exists(&key).await? {
			return Err(StorageError::AlreadyExists);
		}
		self.backend.set_bytes(&key, to_bytes(data)?).await
	}

	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		collection: StorageKey,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&collection.key_for(id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Overwrites an existing item. Returns `NotFound` if there is none.
	pub async fn update<T: Serialize>(
		&self,
		collection: StorageKey,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = collection.key_for(id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		self.backend.set_bytes(&key, to_bytes(data)?).await
	}

	pub async fn exists(&self, collection: StorageKey, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&collection.key_for(id)).await
	}
}

fn to_bytes<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec_pretty(data).map_err(|e| StorageError::Serialization(e.to_string()))
}
