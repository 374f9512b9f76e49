//! Durable Key-Value Stores
//!
//! The tracker and the resolver persist their caches through a small async
//! get/set/remove/clear interface. Each store instance is one namespace.

mod sqlite;

pub use sqlite::SqliteStore;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;

/// Async key-value storage, namespaced per instance
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Insert or replace the value under `key`
    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Remove `key` if present
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// Drop every entry in this namespace
    async fn clear(&self) -> Result<(), StoreError>;
}

/// In-process store, mostly for tests and ephemeral resolvers.
///
/// An optional capacity makes `set_item` fail with [`StoreError::Full`] when a
/// new key would exceed it.
#[derive(Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<String, Value>>,
    capacity: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut items = self.items.write().await;
        if let Some(capacity) = self.capacity {
            if !items.contains_key(key) && items.len() >= capacity {
                return Err(StoreError::Full);
            }
        }
        items.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.items.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        store.set_item("a", json!({"x": 1})).await.unwrap();
        assert_eq!(store.get_item("a").await.unwrap(), Some(json!({"x": 1})));

        store.remove_item("a").await.unwrap();
        assert!(store.get_item("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_store_capacity() {
        let store = MemoryStore::with_capacity(1);
        store.set_item("a", json!("1")).await.unwrap();
        // Overwriting an existing key never exceeds capacity
        store.set_item("a", json!("2")).await.unwrap();
        assert!(matches!(
            store.set_item("b", json!("3")).await,
            Err(StoreError::Full)
        ));

        store.clear().await.unwrap();
        assert!(store.is_empty().await);
        store.set_item("b", json!("3")).await.unwrap();
        assert_eq!(store.len().await, 1);
    }
}
