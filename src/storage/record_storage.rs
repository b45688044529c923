//! The record discipline over a raw adapter
//!
//! [`RecordStorage`] enforces the envelope model: on write it resolves the
//! caller's tags, snapshots their current versions (creating missing tags
//! at the current time), and persists the whole record as one blob; on read
//! it deserializes the envelope and can compare captured tag versions
//! against the tag store. Every adapter call is bounded by the configured
//! operation timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use crate::error::{CacheError, CacheResult};
use crate::options::SetOptions;
use crate::record::{epoch_ms, Record, RecordTag};
use crate::storage::{ConnectionStatus, Storage, StorageAdapter};

/// Key prefix under which tag versions live in the backend
const TAG_KEY_PREFIX: &str = "tags:";

fn tag_key(name: &str) -> String {
    format!("{TAG_KEY_PREFIX}{name}")
}

/// Tuning for [`RecordStorage`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordStorageConfig {
    /// Upper bound on each backend call; an expired wait surfaces as a
    /// transient storage failure
    pub operation_timeout: Duration,
    /// TTL of per-key recompute locks, bounding the damage of a crashed
    /// holder
    pub lock_expire_timeout: Duration,
}

impl Default for RecordStorageConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_millis(150),
            lock_expire_timeout: Duration::from_millis(20_000),
        }
    }
}

impl RecordStorageConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-call timeout
    pub fn with_operation_timeout(mut self, bound: Duration) -> Self {
        self.operation_timeout = bound;
        self
    }

    /// Set the lock TTL
    pub fn with_lock_expire_timeout(mut self, ttl: Duration) -> Self {
        self.lock_expire_timeout = ttl;
        self
    }
}

/// [`Storage`] implementation wrapping any [`StorageAdapter`]
pub struct RecordStorage<A: StorageAdapter> {
    adapter: Arc<A>,
    config: RecordStorageConfig,
}

impl<A: StorageAdapter> RecordStorage<A> {
    /// Wrap an adapter with the default configuration
    pub fn new(adapter: A) -> Self {
        Self::with_config(adapter, RecordStorageConfig::default())
    }

    /// Wrap an adapter with explicit tuning
    pub fn with_config(adapter: A, config: RecordStorageConfig) -> Self {
        Self {
            adapter: Arc::new(adapter),
            config,
        }
    }

    /// Wrap an already-shared adapter, e.g. one also used as a multi-level
    /// tier
    pub fn from_shared(adapter: Arc<A>, config: RecordStorageConfig) -> Self {
        Self { adapter, config }
    }

    /// The lock TTL this storage hands to the adapter
    pub fn lock_expire_timeout(&self) -> Duration {
        self.config.lock_expire_timeout
    }

    async fn bounded<T>(&self, fut: impl Future<Output = CacheResult<T>> + Send) -> CacheResult<T> {
        match timeout(self.config.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Storage(format!(
                "backend call exceeded {:?}",
                self.config.operation_timeout
            ))),
        }
    }

    /// Current version for each named tag without creating missing ones; a
    /// missing tag reads as version 0 (never touched, so never outdating)
    async fn current_versions(&self, names: &[String]) -> CacheResult<Vec<u64>> {
        let keys: Vec<String> = names.iter().map(|name| tag_key(name)).collect();
        let values = self.bounded(self.adapter.mget(&keys)).await?;
        Ok(values
            .into_iter()
            .map(|value| value.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0))
            .collect())
    }
}

#[async_trait]
impl<A: StorageAdapter> Storage for RecordStorage<A> {
    async fn get(&self, key: &str) -> CacheResult<Option<Record>> {
        let Some(blob) = self.bounded(self.adapter.get(key)).await? else {
            return Ok(None);
        };
        match serde_json::from_str::<Record>(&blob) {
            Ok(record) => Ok(Some(record)),
            Err(error) => {
                // A corrupt envelope reads as a miss; the next write repairs it.
                warn!(key, %error, "dropping undecodable record envelope");
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, payload: &str, options: &SetOptions) -> CacheResult<Record> {
        let tag_names = options
            .tags
            .as_ref()
            .map(TagSourceExt::resolve_unique)
            .unwrap_or_default();
        let tags = self.get_tags(&tag_names).await?;

        // No TTL means the record only dies by tag or explicit delete.
        let permanent = options.permanent || options.expires_in.is_none();
        let expires_in = if permanent {
            0
        } else {
            options
                .expires_in
                .map(|ttl| ttl.as_millis() as u64)
                .unwrap_or(0)
        };

        let record = Record::new(key, payload, epoch_ms(), expires_in, permanent, tags);
        let blob = serde_json::to_string(&record)?;
        let ttl = (!permanent).then(|| Duration::from_millis(expires_in));
        self.bounded(self.adapter.set(key, &blob, ttl)).await?;
        Ok(record)
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        self.bounded(self.adapter.del(key)).await
    }

    async fn touch(&self, tag_names: &[String]) -> CacheResult<()> {
        if tag_names.is_empty() {
            return Ok(());
        }
        let now = epoch_ms().to_string();
        let pairs: Vec<(String, String)> = tag_names
            .iter()
            .map(|name| (tag_key(name), now.clone()))
            .collect();
        self.bounded(self.adapter.mset(&pairs)).await
    }

    async fn get_tags(&self, tag_names: &[String]) -> CacheResult<Vec<RecordTag>> {
        if tag_names.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = tag_names.iter().map(|name| tag_key(name)).collect();
        let current = self.bounded(self.adapter.mget(&keys)).await?;

        let now = epoch_ms();
        let mut tags = Vec::with_capacity(tag_names.len());
        let mut missing = Vec::new();
        for (name, value) in tag_names.iter().zip(current) {
            match value.and_then(|v| v.parse::<u64>().ok()) {
                Some(version) => tags.push(RecordTag::new(name.clone(), version)),
                None => {
                    // Vacuum-fill: a tag first seen on a write starts at now.
                    missing.push((tag_key(name), now.to_string()));
                    tags.push(RecordTag::new(name.clone(), now));
                }
            }
        }
        if !missing.is_empty() {
            self.bounded(self.adapter.mset(&missing)).await?;
        }
        Ok(tags)
    }

    async fn lock_key(&self, key: &str) -> CacheResult<bool> {
        self.bounded(
            self.adapter
                .acquire_lock(key, self.config.lock_expire_timeout),
        )
        .await
    }

    async fn release_key(&self, key: &str) -> CacheResult<bool> {
        self.bounded(self.adapter.release_lock(key)).await
    }

    async fn key_is_locked(&self, key: &str) -> CacheResult<bool> {
        self.bounded(self.adapter.is_lock_exists(key)).await
    }

    async fn is_outdated(&self, record: &Record) -> CacheResult<bool> {
        if record.tags.is_empty() {
            return Ok(false);
        }
        let names: Vec<String> = record.tags.iter().map(|tag| tag.name.clone()).collect();
        let current = self.current_versions(&names).await?;
        Ok(record
            .tags
            .iter()
            .zip(current)
            .any(|(captured, version)| version > captured.version))
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.adapter.connection_status()
    }
}

/// Resolve a tag source, deduplicating while preserving first-seen order so
/// version snapshots stay aligned with names
trait TagSourceExt {
    fn resolve_unique(&self) -> Vec<String>;
}

impl TagSourceExt for crate::options::TagSource {
    fn resolve_unique(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        self.resolve()
            .into_iter()
            .filter(|name| seen.insert(name.clone()))
            .collect()
    }
}
