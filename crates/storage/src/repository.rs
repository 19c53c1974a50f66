use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prep_core::model::{ProgressRecord, UserId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape of a user's progress: the record plus bookkeeping stamps.
///
/// This is the value stored under the user's key; the record itself is kept
/// as one JSON document so the store never has to understand its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredProgress {
    pub user_id: UserId,
    pub progress: ProgressRecord,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredProgress {
    /// Empty progress for a user seen for the first time.
    #[must_use]
    pub fn initial(user_id: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            progress: ProgressRecord::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Key-value contract for per-user progress records.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch the stored progress for a user.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read or the stored
    /// document cannot be decoded.
    async fn get_progress(&self, user_id: &UserId) -> Result<Option<StoredProgress>, StorageError>;

    /// Insert or replace the progress for `stored.user_id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the progress cannot be stored.
    async fn put_progress(&self, stored: &StoredProgress) -> Result<(), StorageError>;
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    progress: Arc<Mutex<HashMap<UserId, StoredProgress>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            progress: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(&self, user_id: &UserId) -> Result<Option<StoredProgress>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(user_id).cloned())
    }

    async fn put_progress(&self, stored: &StoredProgress) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(stored.user_id.clone(), stored.clone());
        Ok(())
    }
}

/// Aggregates repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let progress: Arc<dyn ProgressRepository> = Arc::new(InMemoryRepository::new());
        Self { progress }
    }
}
