//! Persistence backends
//!
//! - [`PersistenceManager`]: the contract a storage backend fulfils
//! - [`PersistenceChain`]: backends ordered by rank, highest first
//! - [`MemoryPersistence`]: in-memory reference backend

use crate::error::StorageError;
use crate::properties::Properties;
use dashmap::DashMap;
use std::sync::Arc;

/// Storage backend for configuration dictionaries
pub trait PersistenceManager: Send + Sync {
    /// Check whether a dictionary exists
    fn exists(&self, id: &str) -> bool;

    /// Load a dictionary
    ///
    /// # Errors
    /// [`StorageError::NotFound`] if nothing is stored under `id`.
    fn load(&self, id: &str) -> Result<Properties, StorageError>;

    /// Store a dictionary, replacing any previous one
    ///
    /// # Errors
    /// Backend specific I/O failures.
    fn store(&self, id: &str, properties: &Properties) -> Result<(), StorageError>;

    /// Delete a dictionary; deleting a missing one is not an error
    ///
    /// # Errors
    /// Backend specific I/O failures.
    fn delete(&self, id: &str) -> Result<(), StorageError>;

    /// All stored dictionaries
    ///
    /// # Errors
    /// Backend specific I/O failures.
    fn list_all(&self) -> Result<Vec<Properties>, StorageError>;
}

struct RankedBackend {
    rank: i32,
    backend: Arc<dyn PersistenceManager>,
}

/// Persistence backends queried in rank order
#[derive(Default)]
pub struct PersistenceChain {
    backends: Vec<RankedBackend>,
}

impl std::fmt::Debug for PersistenceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceChain")
            .field(
                "ranks",
                &self.backends.iter().map(|b| b.rank).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl PersistenceChain {
    /// Create an empty chain
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a backend. Higher ranks are queried first; equal ranks keep
    /// insertion order.
    pub fn add(&mut self, rank: i32, backend: Arc<dyn PersistenceManager>) {
        let idx = self
            .backends
            .iter()
            .position(|b| b.rank < rank)
            .unwrap_or(self.backends.len());
        self.backends.insert(idx, RankedBackend { rank, backend });
    }

    /// Number of backends
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Check if no backend is registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Highest-ranked backend, where new records are stored
    ///
    /// # Errors
    /// [`StorageError::NoBackend`] when the chain is empty.
    pub fn primary(&self) -> Result<&Arc<dyn PersistenceManager>, StorageError> {
        self.backends
            .first()
            .map(|b| &b.backend)
            .ok_or(StorageError::NoBackend)
    }

    /// First backend, in rank order, that has `id`
    #[must_use]
    pub fn first_having(&self, id: &str) -> Option<&Arc<dyn PersistenceManager>> {
        self.backends
            .iter()
            .map(|b| &b.backend)
            .find(|backend| backend.exists(id))
    }

    /// Iterate backends in rank order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn PersistenceManager>> {
        self.backends.iter().map(|b| &b.backend)
    }
}

/// In-memory persistence backend
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    entries: DashMap<String, Properties>,
}

impl MemoryPersistence {
    /// Create an empty backend
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored dictionaries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl PersistenceManager for MemoryPersistence {
    fn exists(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    fn load(&self, id: &str) -> Result<Properties, StorageError> {
        self.entries
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn store(&self, id: &str, properties: &Properties) -> Result<(), StorageError> {
        self.entries.insert(id.to_string(), properties.clone());
        Ok(())
    }

    fn delete(&self, id: &str) -> Result<(), StorageError> {
        self.entries.remove(id);
        Ok(())
    }

    fn list_all(&self) -> Result<Vec<Properties>, StorageError> {
        Ok(self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }
}
