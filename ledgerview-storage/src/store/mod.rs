//! Durable key/value capability.
//!
//! [`PersistentStore`] is the only component that touches disk. The cache
//! persists last-known-good values through it and the proposal ledger keeps
//! its records in it. Backends:
//!
//! - [`MemoryStore`]: process-local map, for tests and ephemeral runs
//! - [`LmdbStore`]: memory-mapped LMDB environment via `heed`

pub mod lmdb;
pub mod memory;

pub use lmdb::{LmdbStore, LmdbStoreError};
pub use memory::MemoryStore;

use crate::keys::{KeyDomain, OwnerContext, ScopedKey};
use async_trait::async_trait;
use ledgerview_core::{LedgerError, LedgerResult, StorageError};
use std::fmt;

/// Flat, owner-scoped key/value storage.
///
/// Implementations must be safe for concurrent use. Values are opaque bytes;
/// callers own their serialization.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &ScopedKey) -> LedgerResult<Option<Vec<u8>>>;

    /// Write a value, replacing any previous one.
    async fn set(&self, key: &ScopedKey, value: &[u8]) -> LedgerResult<()>;

    /// Delete a value. Returns whether a value existed.
    async fn delete(&self, key: &ScopedKey) -> LedgerResult<bool>;

    /// Delete every key of one owner within a domain. Returns the count.
    async fn delete_owner(&self, domain: KeyDomain, owner: &OwnerContext) -> LedgerResult<u64>;
}

/// Error for persisted bytes at `key` that no longer decode.
///
/// Readers log it and continue as if the value were absent.
pub(crate) fn corrupt_data(key: &ScopedKey, reason: impl fmt::Display) -> LedgerError {
    StorageError::Corrupt {
        key: key.encode(),
        reason: reason.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerview_core::ErrorKind;

    #[test]
    fn test_corrupt_data_maps_to_store_corrupt() {
        let key = ScopedKey::new(KeyDomain::Governance, OwnerContext::Shared, "proposal-index");
        let err = corrupt_data(&key, "expected value at line 1 column 1");
        assert_eq!(err.kind(), ErrorKind::StoreCorrupt);
        assert!(err.to_string().contains("governance:shared:proposal-index"));
    }
}
