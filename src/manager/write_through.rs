//! Write-through discipline

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::error::CacheResult;
use crate::manager::{update_cache_and_get_result, BoxedExecutor, Manager, ManagerOptions};
use crate::options::{GetOptions, SetOptions};
use crate::record::Record;
use crate::storage::Storage;

/// Authoritative application writes: `set` persists permanent records and
/// the application keeps them current via `set`/`touch`. `get` is a passive
/// accessor: whatever record exists is returned without a freshness check,
/// and only a true miss routes through the recompute path.
pub struct WriteThroughManager {
    storage: Arc<dyn Storage>,
    lock_wait_timeout: std::time::Duration,
}

impl WriteThroughManager {
    /// Registry name
    pub const NAME: &'static str = "write-through";

    /// Build from injected dependencies
    pub fn new(options: ManagerOptions) -> Self {
        Self {
            storage: options.storage,
            lock_wait_timeout: options.lock_wait_timeout,
        }
    }
}

#[async_trait]
impl Manager for WriteThroughManager {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn get(
        &self,
        key: &str,
        executor: BoxedExecutor,
        options: &GetOptions,
    ) -> CacheResult<String> {
        match self.storage.get(key).await {
            Ok(Some(record)) => return Ok(record.value),
            Ok(None) => {}
            Err(error) => {
                warn!(key, %error, "storage read failed, treating as miss");
            }
        }

        update_cache_and_get_result(&self.storage, key, executor, options, self.lock_wait_timeout)
            .await
    }

    async fn set(&self, key: &str, payload: &str, options: &SetOptions) -> CacheResult<Record> {
        // Write-through records never expire by time.
        let options = options.clone().with_permanent(true);
        self.storage.set(key, payload, &options).await
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        self.storage.del(key).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::test_support::{counting_executor, failing_executor};
    use crate::storage::{MemoryAdapter, RecordStorage};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn manager() -> WriteThroughManager {
        let storage: Arc<dyn Storage> = Arc::new(RecordStorage::new(MemoryAdapter::new()));
        WriteThroughManager::new(ManagerOptions::new(storage))
    }

    #[tokio::test]
    async fn test_set_writes_permanent_records() {
        let manager = manager();

        // Even an explicit TTL is overridden: the application owns
        // invalidation for write-through data.
        let record = manager
            .set(
                "cfg",
                "\"v\"",
                &SetOptions::new().with_expires_in(Duration::from_millis(10)),
            )
            .await
            .unwrap();
        assert!(record.permanent);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let read = manager
            .get("cfg", failing_executor("cached"), &GetOptions::new())
            .await
            .unwrap();
        assert_eq!(read, "\"v\"");
    }

    #[tokio::test]
    async fn test_get_skips_freshness_checks() {
        let manager = manager();
        manager
            .set(
                "k",
                "\"v\"",
                &SetOptions::new().with_tags(vec!["users"]),
            )
            .await
            .unwrap();

        // A touched tag does not stop the passive read.
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.storage.touch(&["users".to_string()]).await.unwrap();

        let read = manager
            .get("k", failing_executor("cached"), &GetOptions::new())
            .await
            .unwrap();
        assert_eq!(read, "\"v\"");
    }

    #[tokio::test]
    async fn test_miss_recomputes() {
        let manager = manager();
        let calls = Arc::new(AtomicUsize::new(0));

        let value = manager
            .get(
                "absent",
                counting_executor("\"computed\"", Duration::ZERO, calls.clone()),
                &GetOptions::new().with_expires_in(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        assert_eq!(value, "\"computed\"");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_del_removes_record() {
        let manager = manager();
        manager.set("k", "\"v\"", &SetOptions::new()).await.unwrap();
        assert!(manager.del("k").await.unwrap());
        assert!(manager.storage.get("k").await.unwrap().is_none());
    }
}
