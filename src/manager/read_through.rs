//! Read-through discipline

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::bloom::BloomFilter;
use crate::error::CacheResult;
use crate::manager::{update_cache_and_get_result, BoxedExecutor, Manager, ManagerOptions};
use crate::options::{GetOptions, SetOptions};
use crate::record::{epoch_ms, Record};
use crate::storage::Storage;

/// Cache population on miss or staleness: a valid record is returned as-is,
/// anything else routes through the stampede-protected recompute path.
pub struct ReadThroughManager {
    storage: Arc<dyn Storage>,
    bloom: Option<Arc<BloomFilter>>,
    lock_wait_timeout: std::time::Duration,
}

impl ReadThroughManager {
    /// Registry name
    pub const NAME: &'static str = "read-through";

    /// Build from injected dependencies
    pub fn new(options: ManagerOptions) -> Self {
        Self {
            storage: options.storage,
            bloom: options.bloom,
            lock_wait_timeout: options.lock_wait_timeout,
        }
    }

    /// A definite Bloom miss lets us skip the storage read entirely
    fn definitely_absent(&self, key: &str) -> bool {
        self.bloom
            .as_ref()
            .is_some_and(|bloom| !bloom.might_contain(key))
    }
}

#[async_trait]
impl Manager for ReadThroughManager {
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
                    // A failed tag check degrades to a recompute, same as
                    // any other transient read failure.
                    if matches!(self.storage.is_outdated(&record).await, Ok(false)) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomConfig;
    use crate::error::CacheError;
    use crate::manager::test_support::{counting_executor, failing_executor};
    use crate::storage::{MemoryAdapter, RecordStorage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manager() -> ReadThroughManager {
        let storage: Arc<dyn Storage> = Arc::new(RecordStorage::new(MemoryAdapter::new()));
        ReadThroughManager::new(ManagerOptions::new(storage))
    }

    fn options() -> GetOptions {
        GetOptions::new().with_expires_in(Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_miss_runs_executor_and_caches() {
        let manager = manager();
        let calls = Arc::new(AtomicUsize::new(0));

        let first = manager
            .get(
                "u:1",
                counting_executor("\"A\"", Duration::ZERO, calls.clone()),
                &options(),
            )
            .await
            .unwrap();
        assert_eq!(first, "\"A\"");

        // The second read is served from the cache; a failing executor
        // proves it is never invoked.
        let second = manager
            .get("u:1", failing_executor("must not run"), &options())
            .await
            .unwrap();
        assert_eq!(second, "\"A\"");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_record_recomputes() {
        let manager = manager();
        let calls = Arc::new(AtomicUsize::new(0));
        let short = GetOptions::new().with_expires_in(Duration::from_millis(30));

        manager
            .get(
                "k",
                counting_executor("\"old\"", Duration::ZERO, calls.clone()),
                &short,
            )
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        let refreshed = manager
            .get(
                "k",
                counting_executor("\"new\"", Duration::ZERO, calls.clone()),
                &short,
            )
            .await
            .unwrap();
        assert_eq!(refreshed, "\"new\"");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_touched_tag_forces_recompute() {
        let manager = manager();
        let tagged = options().with_tags(vec!["users"]);

        manager.set("u:1", "\"v1\"", &SetOptions::new()
            .with_expires_in(Duration::from_secs(60))
            .with_tags(vec!["users"]))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.storage.touch(&["users".to_string()]).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let value = manager
            .get(
                "u:1",
                counting_executor("\"v2\"", Duration::ZERO, calls.clone()),
                &tagged,
            )
            .await
            .unwrap();
        assert_eq!(value, "\"v2\"");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.storage.get("u:1").await.unwrap().unwrap().value,
            "\"v2\""
        );
    }

    #[tokio::test]
    async fn test_executor_failure_propagates_on_miss() {
        let manager = manager();
        let err = manager
            .get("absent", failing_executor("no source"), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Executor(_)));
    }

    #[tokio::test]
    async fn test_bloom_negative_skips_storage() {
        let storage: Arc<dyn Storage> = Arc::new(RecordStorage::new(MemoryAdapter::new()));
        let bloom = Arc::new(BloomFilter::new(BloomConfig::default()).unwrap());
        let manager = ReadThroughManager::new(
            ManagerOptions::new(storage.clone()).with_bloom(bloom.clone()),
        );

        // Seed the store behind the filter's back: the filter has never
        // seen the key, so the read is skipped and the executor wins.
        storage
            .set(
                "ghost",
                "\"stale\"",
                &SetOptions::new().with_expires_in(Duration::from_secs(60)),
            )
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let value = manager
            .get(
                "ghost",
                counting_executor("\"fresh\"", Duration::ZERO, calls.clone()),
                &options(),
            )
            .await
            .unwrap();
        assert_eq!(value, "\"fresh\"");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_set_feeds_bloom() {
        let storage: Arc<dyn Storage> = Arc::new(RecordStorage::new(MemoryAdapter::new()));
        let bloom = Arc::new(BloomFilter::new(BloomConfig::default()).unwrap());
        let manager =
            ReadThroughManager::new(ManagerOptions::new(storage).with_bloom(bloom.clone()));

        manager
            .set(
                "u:1",
                "\"v\"",
                &SetOptions::new().with_expires_in(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert!(bloom.might_contain("u:1"));

        let value = manager
            .get("u:1", failing_executor("cached"), &options())
            .await
            .unwrap();
        assert_eq!(value, "\"v\"");
    }
}
