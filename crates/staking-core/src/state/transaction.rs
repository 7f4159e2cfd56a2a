//! Transaction lifecycle store.
//!
//! Persists [`TransactionRecord`]s and enforces the lifecycle rules on every
//! write: Created -> Signed -> Broadcasting -> Broadcast, with Failed
//! reachable from any non-terminal state, and a signed payload that can be
//! written only once.

use chrono::Utc;
use dashmap::DashMap;
use staking_storage::{StorageError, StorageService};
use staking_types::{StorageKey, TransactionPatch, TransactionRecord, TransactionState};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Errors that can occur during transaction state management.
#[derive(Debug, Error)]
pub enum TransactionStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition {
		from: TransactionState,
		to: TransactionState,
	},
	#[error("Transaction {0} is already signed")]
	AlreadySigned(String),
	#[error("Transaction not found: {0}")]
	NotFound(String),
	#[error("Transaction already exists: {0}")]
	AlreadyExists(String),
	#[error("Invalid record: {0}")]
	InvalidRecord(String),
}

/// Exclusive access to one record, held across a read-modify-write.
///
/// While the guard lives no other task in this process can update the same
/// transaction id. Dropping the last guard for an id releases its lock entry.
pub struct RecordGuard<'a> {
	store: &'a TransactionStore,
	id: String,
	lock: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordGuard<'_> {
	fn drop(&mut self) {
		drop(self.lock.take());
		self.store
			.locks
			.remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
	}
}

impl RecordGuard<'_> {
	pub async fn read(&self) -> Result<TransactionRecord, TransactionStateError> {
		self.store.load(&self.id).await
	}

	/// Applies `patch` to the stored record.
	pub async fn update(
		&self,
		patch: TransactionPatch,
	) -> Result<TransactionRecord, TransactionStateError> {
		let mut record = self.read().await?;
		check_patch(&record, &patch)?;

		patch.apply_to(&mut record);
		record.updated_at = Utc::now();

		self.store
			.storage
			.update(StorageKey::Transactions, &self.id, &record)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => TransactionStateError::NotFound(self.id.clone()),
				other => TransactionStateError::Storage(other.to_string()),
			})?;
		Ok(record)
	}
}

fn check_patch(
	record: &TransactionRecord,
	patch: &TransactionPatch,
) -> Result<(), TransactionStateError> {
	if let Some(next) = patch.state {
		if !record.state.can_transition_to(next) {
			return Err(TransactionStateError::InvalidTransition {
				from: record.state,
				to: next,
			});
		}
	}
	if patch.signed_payload.is_some() && record.signed_payload.is_some() {
		return Err(TransactionStateError::AlreadySigned(
			record.transaction_id.clone(),
		));
	}
	Ok(())
}

/// Typed, lifecycle-checked access to transaction records.
pub struct TransactionStore {
	storage: Arc<StorageService>,
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TransactionStore {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			locks: DashMap::new(),
		}
	}

	/// Waits for exclusive access to `id`.
	pub async fn lock(&self, id: &str) -> RecordGuard<'_> {
		let mutex = self.locks.entry(id.to_string()).or_default().clone();
		RecordGuard {
			store: self,
			id: id.to_string(),
			lock: Some(mutex.lock_owned().await),
		}
	}

	/// Persists a new record in the `Created` state.
	pub async fn create(
		&self,
		mut record: TransactionRecord,
	) -> Result<TransactionRecord, TransactionStateError> {
		if record.transaction_id.trim().is_empty() {
			return Err(TransactionStateError::InvalidRecord(
				"transaction id is required".into(),
			));
		}
		if record.state != TransactionState::Created {
			return Err(TransactionStateError::InvalidRecord(format!(
				"new records must be created, not {}",
				record.state
			)));
		}

		let now = Utc::now();
		record.created_at = now;
		record.updated_at = now;

		let _guard = self.lock(&record.transaction_id).await;
		self.storage
			.create(StorageKey::Transactions, &record.transaction_id, &record)
			.await
			.map_err(|e| match e {
				StorageError::AlreadyExists => {
					TransactionStateError::AlreadyExists(record.transaction_id.clone())
				},
				other => TransactionStateError::Storage(other.to_string()),
			})?;
		Ok(record)
	}

	pub async fn read(&self, id: &str) -> Result<TransactionRecord, TransactionStateError> {
		self.load(id).await
	}

	pub async fn exists(&self, id: &str) -> Result<bool, TransactionStateError> {
		self.storage
			.exists(StorageKey::Transactions, id)
			.await
			.map_err(|e| TransactionStateError::Storage(e.to_string()))
	}

	/// Shallow-patches a record. Fields absent from the patch are preserved.
	pub async fn update(
		&self,
		id: &str,
		patch: TransactionPatch,
	) -> Result<TransactionRecord, TransactionStateError> {
		self.lock(id).await.update(patch).await
	}

	async fn load(&self, id: &str) -> Result<TransactionRecord, TransactionStateError> {
		self.storage
			.retrieve(StorageKey::Transactions, id)
			.await
			.map_err(|e| match e {
				StorageError::NotFound => TransactionStateError::NotFound(id.to_string()),
				other => TransactionStateError::Storage(other.to_string()),
			})
	}
}
