//! Credential persistence abstraction.
//!
//! The session only holds credentials in memory. Loading them at startup and saving
//! refreshed values is delegated to a [`CredentialStore`] supplied by the host.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use super::types::Credential;

/// Errors reported by a credential store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored data could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Other backend-specific failure.
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the persisted credential, if any.
    async fn load(&self) -> Result<Option<Credential>, StoreError>;

    /// Persist a credential, replacing the previous one.
    async fn save(&self, credential: &Credential) -> Result<(), StoreError>;

    /// Remove any persisted credential.
    async fn clear(&self) -> Result<(), StoreError>;
}

/// Credential store that keeps the value in process memory.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    credential: Mutex<Option<Credential>>,
    saves: AtomicUsize,
}

impl MemoryCredentialStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a credential.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            credential: Mutex::new(Some(credential)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Current stored value.
    pub fn snapshot(&self) -> Option<Credential> {
        self.credential.lock().clone()
    }

    /// Number of successful `save` calls.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> Result<Option<Credential>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, credential: &Credential) -> Result<(), StoreError> {
        *self.credential.lock() = Some(credential.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.credential.lock() = None;
        Ok(())
    }
}
