//! Caching disciplines and the shared recompute path
//!
//! A [`Manager`] is a caching discipline dispatched to by the façade:
//!
//! - [`ReadThroughManager`]: recompute on miss or staleness, return valid
//!   records as-is
//! - [`WriteThroughManager`]: explicit permanent writes, passive reads
//! - [`RefreshAheadManager`]: read-through plus background refresh of
//!   records nearing expiry
//! - [`MultiLevelManager`]: ordered storage tiers with warm-up and metrics
//!
//! Managers move opaque payload strings; the façade owns (de)serialization.
//! The stampede-protected recompute branch shared by the single-tier
//! disciplines lives here as a free function over the storage capability.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::warn;

use crate::bloom::BloomFilter;
use crate::error::CacheResult;
use crate::options::{GetOptions, LockedKeyRetrieveStrategy, SetOptions};
use crate::record::{epoch_ms, Record};
use crate::storage::Storage;

mod multi_level;
mod read_through;
mod refresh_ahead;
mod write_through;

pub use multi_level::{
    FallbackStrategy, Level, LevelMetrics, LevelStats, MultiLevelManager, MultiLevelOptions,
};
pub use read_through::ReadThroughManager;
pub use refresh_ahead::RefreshAheadManager;
pub use write_through::WriteThroughManager;

/// A type-erased value-producing thunk, invoked at most once per operation.
///
/// The future yields the already-serialized payload; caller failures arrive
/// as [`CacheError::Executor`](crate::error::CacheError::Executor).
pub type BoxedExecutor = Box<dyn FnOnce() -> BoxFuture<'static, CacheResult<String>> + Send>;

/// A caching discipline
#[async_trait]
pub trait Manager: Send + Sync {
    /// Registry name of this manager
    fn name(&self) -> &str;

    /// Resolve `key` to a payload, running `executor` on miss or staleness
    /// according to the discipline
    async fn get(
        &self,
        key: &str,
        executor: BoxedExecutor,
        options: &GetOptions,
    ) -> CacheResult<String>;

    /// Write `payload` at `key` according to the discipline
    async fn set(&self, key: &str, payload: &str, options: &SetOptions) -> CacheResult<Record>;

    /// Delete `key`
    async fn del(&self, key: &str) -> CacheResult<bool>;
}

/// Construction-time dependencies shared by the single-tier managers,
/// normally produced by [`Cache::manager_options`](crate::Cache::manager_options)
#[derive(Clone)]
pub struct ManagerOptions {
    /// The record-shaped storage the manager operates on
    pub storage: Arc<dyn Storage>,
    /// Optional shared Bloom filter consulted before storage reads
    pub bloom: Option<Arc<BloomFilter>>,
    /// Bound on how long `WaitForResult` polls for a contended key before
    /// falling back to the executor
    pub lock_wait_timeout: Duration,
}

impl ManagerOptions {
    /// Options over `storage` with no Bloom filter and the default wait
    /// bound (the lock TTL default: past it the holder is presumed dead)
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            bloom: None,
            lock_wait_timeout: Duration::from_millis(20_000),
        }
    }

    /// Attach a shared Bloom filter
    pub fn with_bloom(mut self, bloom: Arc<BloomFilter>) -> Self {
        self.bloom = Some(bloom);
        self
    }

    /// Set the contended-key wait bound
    pub fn with_lock_wait_timeout(mut self, bound: Duration) -> Self {
        self.lock_wait_timeout = bound;
        self
    }
}

const WAIT_INITIAL_BACKOFF: Duration = Duration::from_millis(5);
const WAIT_MAX_BACKOFF: Duration = Duration::from_millis(100);

/// The stampede-protected recompute path shared by the single-tier
/// disciplines.
///
/// Exactly one caller per key acquires the recompute lock, runs the
/// executor, writes back, and releases; contenders either wait for the
/// winner's record or run the executor without writing, per the options'
/// [`LockedKeyRetrieveStrategy`].
pub(crate) async fn update_cache_and_get_result(
    storage: &Arc<dyn Storage>,
    key: &str,
    executor: BoxedExecutor,
    options: &GetOptions,
    lock_wait_timeout: Duration,
) -> CacheResult<String> {
    let locked = match storage.lock_key(key).await {
        Ok(locked) => locked,
        Err(error) => {
            // Lock primitive unavailable: serve this caller from the
            // executor and leave the store alone.
            warn!(key, %error, "recompute lock unavailable, running executor uncached");
            return executor().await;
        }
    };

    if locked {
        let result = executor().await;
        match result {
            Ok(payload) => {
                if let Err(error) = storage.set(key, &payload, &options.as_set_options()).await {
                    warn!(key, %error, "write-back after recompute failed");
                }
                release_lock(storage, key).await;
                Ok(payload)
            }
            Err(error) => {
                release_lock(storage, key).await;
                Err(error)
            }
        }
    } else {
        match options.locked_key_retrieve_strategy.unwrap_or_default() {
            LockedKeyRetrieveStrategy::RunExecutor => executor().await,
            LockedKeyRetrieveStrategy::WaitForResult => {
                match wait_for_result(storage, key, lock_wait_timeout).await {
                    Some(payload) => Ok(payload),
                    None => executor().await,
                }
            }
        }
    }
}

/// Poll for the winner's record with exponential backoff until `bound`
/// elapses. Any fresh record qualifies, including one stamped after the
/// wait began.
async fn wait_for_result(
    storage: &Arc<dyn Storage>,
    key: &str,
    bound: Duration,
) -> Option<String> {
    let deadline = tokio::time::Instant::now() + bound;
    let mut backoff = WAIT_INITIAL_BACKOFF;

    loop {
        tokio::time::sleep(backoff).await;

        if let Ok(Some(record)) = storage.get(key).await {
            if record.is_time_valid(epoch_ms())
                && matches!(storage.is_outdated(&record).await, Ok(false))
            {
                return Some(record.value);
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        backoff = (backoff * 2).min(WAIT_MAX_BACKOFF);
    }
}

async fn release_lock(storage: &Arc<dyn Storage>, key: &str) {
    if let Err(error) = storage.release_key(key).await {
        warn!(key, %error, "failed to release recompute lock, it will expire by TTL");
    }
}
