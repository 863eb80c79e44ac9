//! In-memory store backend.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use ledgerview_core::{LedgerResult, StorageError};

use super::PersistentStore;
use crate::keys::{KeyDomain, OwnerContext, ScopedKey};

/// Process-local store. Contents are lost on drop.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.data.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every stored key in flat form, sorted.
    pub fn keys(&self) -> Vec<String> {
        self.data
            .read()
            .map(|d| d.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend {
        reason: "memory store lock poisoned".to_string(),
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn get(&self, key: &ScopedKey) -> LedgerResult<Option<Vec<u8>>> {
        let data = self.data.read().map_err(|_| poisoned())?;
        Ok(data.get(&key.encode()).cloned())
    }

    async fn set(&self, key: &ScopedKey, value: &[u8]) -> LedgerResult<()> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        data.insert(key.encode(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &ScopedKey) -> LedgerResult<bool> {
        let mut data = self.data.write().map_err(|_| poisoned())?;
        Ok(data.remove(&key.encode()).is_some())
    }

    async fn delete_owner(&self, domain: KeyDomain, owner: &OwnerContext) -> LedgerResult<u64> {
        let prefix = ScopedKey::owner_prefix(domain, owner);
        let mut data = self.data.write().map_err(|_| poisoned())?;
        let before = data.len();
        data.retain(|k, _| !k.starts_with(&prefix));
        Ok((before - data.len()) as u64)
    }
}
