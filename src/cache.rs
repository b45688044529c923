//! The cache façade
//!
//! [`Cache`] owns the default storage, a registry of named managers, the
//! key-shaping rules (prefix, hashing), and the typed boundary where caller
//! values become the opaque payload strings the rest of the crate moves.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::bloom::{BloomConfig, BloomFilter};
use crate::codec;
use crate::error::{CacheError, CacheResult};
use crate::manager::{BoxedExecutor, Manager, ManagerOptions, ReadThroughManager};
use crate::options::{GetOptions, SetOptions};
use crate::record::Record;
use crate::storage::Storage;

/// Façade-level configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Manager used when a call names none
    pub default_manager: String,
    /// Fallback TTL when a call omits `expires_in`; records stay permanent
    /// when this is also unset
    pub default_ttl: Option<Duration>,
    /// Prefix concatenated before every key with a `:` separator
    pub prefix: Option<String>,
    /// Digest keys (SHA-256, hex) before storage to bound their length
    pub hash_keys: bool,
    /// Build a shared Bloom filter handed to managers constructed from
    /// [`Cache::manager_options`]
    pub bloom: Option<BloomConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_manager: ReadThroughManager::NAME.to_string(),
            default_ttl: None,
            prefix: None,
            hash_keys: false,
            bloom: None,
        }
    }
}

impl CacheConfig {
    /// The default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default manager name
    pub fn with_default_manager(mut self, name: impl Into<String>) -> Self {
        self.default_manager = name.into();
        self
    }

    /// Set the fallback TTL
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set the key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Enable key hashing
    pub fn with_hash_keys(mut self, hash_keys: bool) -> Self {
        self.hash_keys = hash_keys;
        self
    }

    /// Enable the shared Bloom pre-check
    pub fn with_bloom(mut self, config: BloomConfig) -> Self {
        self.bloom = Some(config);
        self
    }
}

/// Entry point: registers managers, shapes keys, serializes values, and
/// forwards `get`/`set`/`touch`/`del` to the resolved discipline
pub struct Cache {
    storage: Arc<dyn Storage>,
    managers: RwLock<HashMap<String, Arc<dyn Manager>>>,
    config: CacheConfig,
    bloom: Option<Arc<BloomFilter>>,
}

impl Cache {
    /// A cache over `storage` with the default configuration and a
    /// read-through manager pre-registered
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self::build(storage, CacheConfig::default(), None)
    }

    /// A cache over `storage` with explicit configuration. Fails on invalid
    /// Bloom sizing parameters.
    pub fn with_config(storage: Arc<dyn Storage>, config: CacheConfig) -> CacheResult<Self> {
        let bloom = config
            .bloom
            .map(BloomFilter::new)
            .transpose()?
            .map(Arc::new);
        Ok(Self::build(storage, config, bloom))
    }

    fn build(
        storage: Arc<dyn Storage>,
        config: CacheConfig,
        bloom: Option<Arc<BloomFilter>>,
    ) -> Self {
        let cache = Self {
            storage,
            managers: RwLock::new(HashMap::new()),
            config,
            bloom,
        };
        cache.register_manager(Arc::new(ReadThroughManager::new(cache.manager_options())));
        cache
    }

    /// The dependencies a manager built for this cache should be
    /// constructed from: the default storage, the shared Bloom filter
    pub fn manager_options(&self) -> ManagerOptions {
        let mut options = ManagerOptions::new(self.storage.clone());
        if let Some(bloom) = &self.bloom {
            options = options.with_bloom(bloom.clone());
        }
        options
    }

    /// Register a manager under its own name. Registration refuses silent
    /// overwrite: on a duplicate name the already-registered instance is
    /// returned unchanged.
    pub fn register_manager(&self, manager: Arc<dyn Manager>) -> Arc<dyn Manager> {
        let name = manager.name().to_string();
        self.register_manager_as(name, manager)
    }

    /// Register a manager under an explicit name, e.g. to run two
    /// differently-configured instances of the same discipline side by side
    pub fn register_manager_as(
        &self,
        name: impl Into<String>,
        manager: Arc<dyn Manager>,
    ) -> Arc<dyn Manager> {
        self.managers
            .write()
            .entry(name.into())
            .or_insert(manager)
            .clone()
    }

    /// The shared Bloom filter, when configured
    pub fn bloom(&self) -> Option<Arc<BloomFilter>> {
        self.bloom.clone()
    }

    /// Resolve `key` through the configured discipline, running `executor`
    /// on miss or staleness
    pub async fn get<T, F, Fut>(
        &self,
        key: &str,
        executor: F,
        options: GetOptions,
    ) -> CacheResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let manager = self.resolve_manager(options.manager.as_deref())?;
        let full_key = self.full_key(key);

        let mut options = options;
        if options.expires_in.is_none() {
            options.expires_in = self.config.default_ttl;
        }

        let boxed: BoxedExecutor = Box::new(move || {
            Box::pin(async move {
                match executor().await {
                    Ok(value) => codec::encode(&value),
                    Err(error) => Err(CacheError::Executor(error)),
                }
            })
        });

        let payload = manager.get(&full_key, boxed, &options).await?;
        codec::decode(&payload)
    }

    /// Write `value` through the configured discipline
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> CacheResult<Record> {
        let manager = self.resolve_manager(options.manager.as_deref())?;
        let payload = codec::encode(value)?;

        let mut options = options;
        if options.expires_in.is_none() {
            options.expires_in = self.config.default_ttl;
        }

        manager.set(&self.full_key(key), &payload, &options).await
    }

    /// Advance the named tags, invalidating every record that captured
    /// older versions
    pub async fn touch(&self, tag_names: &[String]) -> CacheResult<()> {
        self.storage.touch(tag_names).await
    }

    /// Delete `key` through the default manager
    pub async fn del(&self, key: &str) -> CacheResult<bool> {
        let manager = self.resolve_manager(None)?;
        manager.del(&self.full_key(key)).await
    }

    fn resolve_manager(&self, name: Option<&str>) -> CacheResult<Arc<dyn Manager>> {
        let name = name.unwrap_or(&self.config.default_manager);
        self.managers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CacheError::Config(format!("unknown manager '{name}'")))
    }

    /// Shape a caller key for storage: digest first when hashing is on,
    /// then prefix, so operators can still group keys by prefix. Tag names
    /// are never shaped.
    fn full_key(&self, key: &str) -> String {
        let shaped = if self.config.hash_keys {
            hex::encode(Sha256::digest(key.as_bytes()))
        } else {
            key.to_string()
        };
        match &self.config.prefix {
            Some(prefix) => format!("{prefix}:{shaped}"),
            None => shaped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::WriteThroughManager;
    use crate::storage::{MemoryAdapter, RecordStorage};
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct User {
        id: u64,
        name: String,
    }

    fn cache() -> Cache {
        Cache::new(Arc::new(RecordStorage::new(MemoryAdapter::new())))
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let cache = cache();
        let user = User {
            id: 1,
            name: "A".to_string(),
        };

        cache.set("u:1", &user, SetOptions::new()).await.unwrap();
        let read: User = cache
            .get(
                "u:1",
                || async { anyhow::bail!("must be cached") },
                GetOptions::new(),
            )
            .await
            .unwrap();
        assert_eq!(read, user);
    }

    #[tokio::test]
    async fn test_executor_runs_on_miss() {
        let cache = cache();
        let value: u32 = cache
            .get("n", || async { Ok(41 + 1) }, GetOptions::new())
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_register_manager_refuses_overwrite() {
        let cache = cache();
        let first = cache.register_manager(Arc::new(WriteThroughManager::new(
            cache.manager_options(),
        )));
        let second = cache.register_manager(Arc::new(WriteThroughManager::new(
            cache.manager_options(),
        )));
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_register_manager_under_explicit_name() {
        let cache = cache();
        cache.register_manager_as(
            "authoritative",
            Arc::new(WriteThroughManager::new(cache.manager_options())),
        );

        cache
            .set(
                "k",
                &7u32,
                SetOptions::new().with_manager("authoritative"),
            )
            .await
            .unwrap();
        let value: u32 = cache
            .get(
                "k",
                || async { anyhow::bail!("must be cached") },
                GetOptions::new().with_manager("authoritative"),
            )
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_unknown_manager_is_config_error() {
        let cache = cache();
        let result: CacheResult<u32> = cache
            .get(
                "k",
                || async { Ok(1) },
                GetOptions::new().with_manager("no-such-manager"),
            )
            .await;
        assert!(matches!(result, Err(CacheError::Config(_))));
    }

    #[tokio::test]
    async fn test_prefix_and_hashing_shape_keys() {
        let storage = Arc::new(RecordStorage::new(MemoryAdapter::new()));
        let cache = Cache::with_config(
            storage.clone(),
            CacheConfig::new().with_prefix("app").with_hash_keys(true),
        )
        .unwrap();

        cache.set("user one", &1u32, SetOptions::new()).await.unwrap();

        let expected = format!("app:{}", hex::encode(Sha256::digest("user one")));
        let record = storage.get(&expected).await.unwrap().unwrap();
        assert_eq!(record.value, "1");
    }

    #[tokio::test]
    async fn test_default_ttl_applies_when_unset() {
        let storage = Arc::new(RecordStorage::new(MemoryAdapter::new()));
        let cache = Cache::with_config(
            storage.clone(),
            CacheConfig::new().with_default_ttl(Duration::from_secs(90)),
        )
        .unwrap();

        cache.set("k", &1u32, SetOptions::new()).await.unwrap();
        let record = storage.get("k").await.unwrap().unwrap();
        assert!(!record.permanent);
        assert_eq!(record.expires_in, 90_000);
    }

    #[tokio::test]
    async fn test_touch_and_del_forward() {
        let cache = cache();
        cache
            .set(
                "k",
                &1u32,
                SetOptions::new()
                    .with_expires_in(Duration::from_secs(60))
                    .with_tags(vec!["users"]),
            )
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.touch(&["users".to_string()]).await.unwrap();

        let refreshed: u32 = cache
            .get("k", || async { Ok(2) }, GetOptions::new())
            .await
            .unwrap();
        assert_eq!(refreshed, 2);

        assert!(cache.del("k").await.unwrap());
        assert!(!cache.del("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_bloom_config_fails_construction() {
        let storage: Arc<dyn Storage> = Arc::new(RecordStorage::new(MemoryAdapter::new()));
        let result = Cache::with_config(
            storage,
            CacheConfig::new().with_bloom(BloomConfig {
                expected_elements: 0,
                false_positive_rate: 0.01,
            }),
        );
        assert!(matches!(result, Err(CacheError::Config(_))));
    }
}
