//! Key-value storage adapter contract and in-memory reference store.
//!
//! The platform adapter (localStorage/AsyncStorage style) is consumed as
//! given: async, string-keyed, string-valued. Structured data is JSON
//! serialized by callers before storage.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::StorageError;

/// Uniform async key-value storage backed by platform storage.
///
/// Implementations must report storage-full write failures as
/// [`StorageError::QuotaExceeded`] so the cache manager can run eviction.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    async fn clear(&self) -> Result<(), StorageError>;
    async fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-process reference implementation with an optional byte quota.
///
/// Used as the test double throughout the workspace and usable by embedders
/// that do not need durability.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    items: Mutex<HashMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that fails writes once the sum of stored value lengths would
    /// exceed `quota_bytes`, mirroring platform quota behavior.
    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            items: Mutex::new(HashMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    fn used_bytes(items: &HashMap<String, String>) -> usize {
        items.values().map(|v| v.len()).sum()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.items
            .lock()
            .map_err(|_| StorageError::backend("memory store lock poisoned"))
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.lock()?;
        if let Some(quota) = self.quota_bytes {
            let existing = items.get(key).map(|v| v.len()).unwrap_or(0);
            let projected = Self::used_bytes(&items) - existing + value.len();
            if projected > quota {
                return Err(StorageError::quota(format!(
                    "write of {} bytes exceeds quota of {} bytes",
                    value.len(),
                    quota
                )));
            }
        }
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.lock()?.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_values() {
        let store = MemoryKeyValueStore::new();
        store.set_item("a", "1").await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap().as_deref(), Some("1"));
        store.remove_item("a").await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn quota_rejects_oversized_writes() {
        let store = MemoryKeyValueStore::with_quota(8);
        store.set_item("a", "1234").await.unwrap();
        let err = store.set_item("b", "123456").await.unwrap_err();
        assert!(err.is_quota());
        // Replacing an existing value accounts for the freed bytes.
        store.set_item("a", "12345678").await.unwrap();
    }

    #[tokio::test]
    async fn keys_lists_all_entries() {
        let store = MemoryKeyValueStore::new();
        store.set_item("x", "1").await.unwrap();
        store.set_item("y", "2").await.unwrap();
        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["x", "y"]);
    }
}
