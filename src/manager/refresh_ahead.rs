//! Refresh-ahead discipline

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::bloom::BloomFilter;
use crate::error::{CacheError, CacheResult};
use crate::manager::{update_cache_and_get_result, BoxedExecutor, Manager, ManagerOptions};
use crate::options::{GetOptions, SetOptions};
use crate::record::{epoch_ms, Record};
use crate::storage::Storage;

/// Default fraction of the TTL after which a fresh record triggers a
/// background refresh
pub const DEFAULT_REFRESH_AHEAD_FACTOR: f64 = 0.8;

/// Read-through plus proactive refresh: a record that is still fresh but
/// past `expires_in * factor` of its lifetime is returned immediately while
/// a background task recomputes and overwrites it. Refreshes are serialized
/// by a derived per-key lock, so a hot key refreshes at most once per
/// window; background failures are logged and swallowed.
pub struct RefreshAheadManager {
    storage: Arc<dyn Storage>,
    bloom: Option<Arc<BloomFilter>>,
    lock_wait_timeout: Duration,
    factor: f64,
}

impl RefreshAheadManager {
    /// Registry name
    pub const NAME: &'static str = "refresh-ahead";

    /// Build with the default refresh factor
    pub fn new(options: ManagerOptions) -> Self {
        Self {
            storage: options.storage,
            bloom: options.bloom,
            lock_wait_timeout: options.lock_wait_timeout,
            factor: DEFAULT_REFRESH_AHEAD_FACTOR,
        }
    }

    /// Build with an explicit refresh factor, rejected outside `(0, 1)`
    pub fn with_factor(options: ManagerOptions, factor: f64) -> CacheResult<Self> {
        if !(factor > 0.0 && factor < 1.0) {
            return Err(CacheError::Config(format!(
                "refresh-ahead factor must be in (0, 1), got {factor}"
            )));
        }
        Ok(Self {
            storage: options.storage,
            bloom: options.bloom,
            lock_wait_timeout: options.lock_wait_timeout,
            factor,
        })
    }

    fn definitely_absent(&self, key: &str) -> bool {
        self.bloom
            .as_ref()
            .is_some_and(|bloom| !bloom.might_contain(key))
    }

    /// Whether the record has aged into its refresh window
    fn refresh_due(&self, record: &Record, now_ms: u64) -> bool {
        if record.permanent {
            return false;
        }
        let window_start = (record.expires_in as f64 * self.factor) as u64;
        record.age_ms(now_ms) > window_start
    }

    /// Recompute and overwrite `key` under the derived refresh lock. The
    /// synchronous caller already has its value; nothing here may surface.
    fn spawn_refresh(&self, key: &str, executor: BoxedExecutor, options: &GetOptions) {
        let storage = self.storage.clone();
        let key = key.to_string();
        let write_options = options.as_set_options();

        tokio::spawn(async move {
            let refresh_lock = format!("{key}:refresh-ahead");
            match storage.lock_key(&refresh_lock).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(error) => {
                    warn!(key, %error, "refresh lock unavailable, skipping refresh");
                    return;
                }
            }

            match executor().await {
                Ok(payload) => {
                    if let Err(error) = storage.set(&key, &payload, &write_options).await {
                        warn!(key, %error, "background refresh write failed");
                    } else {
                        debug!(key, "background refresh completed");
                    }
                }
                Err(error) => {
                    warn!(key, %error, "background refresh executor failed");
                }
            }

            if let Err(error) = storage.release_key(&refresh_lock).await {
                warn!(key, %error, "failed to release refresh lock, it will expire by TTL");
            }
        });
    }
}

#[async_trait]
impl Manager for RefreshAheadManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn get(
        &self,
        key: &str,
        executor: BoxedExecutor,
        options: &GetOptions,
    ) -> CacheResult<String> {
        if !self.definitely_absent(key) {
            match self.storage.get(key).await {
                Ok(Some(record)) if record.is_time_valid(epoch_ms()) => {
                    if matches!(self.storage.is_outdated(&record).await, Ok(false)) {
                        if self.refresh_due(&record, epoch_ms()) {
                            self.spawn_refresh(key, executor, options);
                        }
                        return Ok(record.value);
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(key, %error, "storage read failed, treating as miss");
                }
            }
        }

        update_cache_and_get_result(&self.storage, key, executor, options, self.lock_wait_timeout)
            .await
    }

    async fn set(&self, key: &str, payload: &str, options: &SetOptions) -> CacheResult<Record> {
        let record = self.storage.set(key, payload, options).await?;
        if let Some(bloom) = &self.bloom {
            bloom.add(key);
        }
        Ok(record)
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        self.storage.del(key).await
    }
}
