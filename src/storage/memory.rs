//! In-process backend adapter
//!
//! Backed by concurrent maps with lazy TTL expiry and a TTL'd lock table.
//! This is the adapter the test suite runs against, and a usable backend
//! for single-process deployments.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::error::CacheResult;
use crate::storage::{ConnectionStatus, StorageAdapter};

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// In-memory [`StorageAdapter`] over concurrent hash maps.
///
/// Expired values are dropped lazily on read. Locks live in a separate
/// table so they never collide with cached values at the same key.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    values: DashMap<String, StoredValue>,
    locks: DashMap<String, Instant>,
}

impl MemoryAdapter {
    /// Create an empty adapter
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (possibly expired, not yet collected) entries
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the adapter holds no entries
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryAdapter {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        if let Some(stored) = self.values.get(key) {
            if stored.is_expired() {
                drop(stored);
                self.values.remove(key);
                return Ok(None);
            }
            return Ok(Some(stored.value.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<bool> {
        self.values.insert(
            key.to_string(),
            StoredValue {
                value: value.to_string(),
                expires_at: ttl.map(|ttl| Instant::now() + ttl),
            },
        );
        Ok(true)
    }

    async fn mget(&self, keys: &[String]) -> CacheResult<Vec<Option<String>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    async fn mset(&self, pairs: &[(String, String)]) -> CacheResult<()> {
        for (key, value) in pairs {
            self.set(key, value, None).await?;
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        Ok(self.values.remove(key).is_some())
    }

    async fn acquire_lock(&self, key: &str, ttl: Duration) -> CacheResult<bool> {
        // Entry holds the shard lock, so check-and-claim is atomic per key.
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut holder) => {
                if Instant::now() >= *holder.get() {
                    holder.insert(Instant::now() + ttl);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Instant::now() + ttl);
                Ok(true)
            }
        }
    }

    async fn release_lock(&self, key: &str) -> CacheResult<bool> {
        Ok(self.locks.remove(key).is_some())
    }

    async fn is_lock_exists(&self, key: &str) -> CacheResult<bool> {
        if let Some(holder) = self.locks.get(key) {
            if Instant::now() < *holder {
                return Ok(true);
            }
            drop(holder);
            self.locks.remove(key);
        }
        Ok(false)
    }

    fn connection_status(&self) -> ConnectionStatus {
        ConnectionStatus::Connected
    }
}
