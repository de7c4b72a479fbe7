//! Key-value persistence for calculator state.
//!
//! The orchestrator only needs `get`, `set` and `remove`. Backends store the
//! encoded [`CalculatorState`](crate::calculator::CalculatorState) bytes
//! verbatim and never inspect them.

mod fs;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use fs::FileSystemCacheStore;
pub use memory::InMemoryCacheStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCacheStore;

use async_trait::async_trait;

use crate::cache_key::CacheKey;
use crate::error::SyncResult;

/// Trait for storing and retrieving serialized calculator state.
///
/// There is no transactional guarantee across sessions; sessions are
/// partitioned by [`CacheKey`].
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Loads the state stored under `key`, if any.
    async fn get(&self, key: &CacheKey) -> SyncResult<Option<Vec<u8>>>;

    /// Stores `state` under `key`, replacing any previous value.
    async fn set(&self, key: &CacheKey, state: Vec<u8>) -> SyncResult<()>;

    /// Removes the entry for `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &CacheKey) -> SyncResult<()>;

    /// Lists all stored keys in sorted order.
    async fn keys(&self) -> SyncResult<Vec<CacheKey>>;
}
