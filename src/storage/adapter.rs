//! The raw backend contract
//!
//! A [`StorageAdapter`] is the string-shaped interface every backend
//! (in-memory, Redis, Memcached, …) implements. The record discipline is
//! layered on top by [`RecordStorage`](super::RecordStorage); the
//! multi-level manager consumes adapters directly for its tier storage.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CacheResult;
use crate::storage::ConnectionStatus;

/// Callback invoked by reconnecting adapters when the backend comes back
pub type ConnectListener = Box<dyn Fn() + Send + Sync>;

/// Uniform operations over any string-typed backend.
///
/// Both shapes of the same backend (this raw interface and the record
/// interface built on it) must be consistent at the same key. Every method
/// may fail transiently; callers degrade per the crate failure policy.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Read the raw value at `key`
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Write `value` at `key`, expiring after `ttl` when given. Returns
    /// whether the backend acknowledged the write.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<bool>;

    /// Read several keys at once, preserving order
    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Write several pairs at once, without TTLs
    async fn mset(&self, pairs: &[(String, String)]) -> CacheResult<()> {
        for (key, value) in pairs {
            self.set(key, value, None).await?;
        }
        Ok(())
    }

    /// Delete `key`, reporting whether it existed
    async fn del(&self, key: &str) -> CacheResult<bool>;

    /// Best-effort exclusive lock at `key`, expiring after `ttl` so a
    /// crashed holder cannot wedge the key. Returns whether this caller
    /// acquired it.
    async fn acquire_lock(&self, key: &str, ttl: Duration) -> CacheResult<bool>;

    /// Release a lock previously acquired at `key`
    async fn release_lock(&self, key: &str) -> CacheResult<bool>;

    /// Whether an unexpired lock currently exists at `key`
    async fn is_lock_exists(&self, key: &str) -> CacheResult<bool>;

    /// Current connection state
    fn connection_status(&self) -> ConnectionStatus;

    /// Register a callback for reconnection events. The default is a no-op
    /// for adapters whose backend cannot disconnect.
    fn on_connect(&self, _listener: ConnectListener) {}
}
