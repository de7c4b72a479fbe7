use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStore;
use crate::cache_key::CacheKey;
use crate::error::SyncResult;

/// In-memory cache store. Clones share the same entries.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    entries: Arc<RwLock<HashMap<CacheKey, Vec<u8>>>>,
}

impl InMemoryCacheStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> SyncResult<Option<Vec<u8>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &CacheKey, state: Vec<u8>) -> SyncResult<()> {
        self.entries.write().await.insert(key.clone(), state);
        Ok(())
    }

    async fn remove(&self, key: &CacheKey) -> SyncResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> SyncResult<Vec<CacheKey>> {
        let mut keys: Vec<CacheKey> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = InMemoryCacheStore::new();
        let key = CacheKey::from_raw("count:abc");

        assert!(store.get(&key).await.unwrap().is_none());
        store.set(&key, b"state".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), Some(b"state".to_vec()));

        store.remove(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap().is_none());
        store.remove(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let a = InMemoryCacheStore::new();
        let b = a.clone();
        a.set(&CacheKey::from_raw("k"), vec![1]).await.unwrap();
        assert_eq!(b.len().await, 1);
        assert_eq!(b.keys().await.unwrap(), vec![CacheKey::from_raw("k")]);
    }
}
