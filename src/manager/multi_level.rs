//! Multi-level tier composition
//!
//! An ordered set of storage tiers walked in priority order: the first
//! enabled tier holding the key services the request and every
//! higher-priority tier is warmed with the hit value. Tiers talk the raw
//! adapter interface, keep their own TTLs, and count their own traffic.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::bloom::BloomFilter;
use crate::error::{CacheError, CacheResult};
use crate::manager::{BoxedExecutor, Manager};
use crate::options::{GetOptions, SetOptions};
use crate::record::{epoch_ms, Record, RecordTag};
use crate::storage::StorageAdapter;

/// Behaviour when every enabled level misses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackStrategy {
    /// Run the executor, populate all enabled levels, return the result
    #[default]
    Executor,
    /// Reserved for chained loaders; currently identical to `Executor`
    NextLevel,
    /// Surface a [`CacheError::Miss`] instead of recomputing
    Fail,
}

/// Configuration of a single tier
#[derive(Clone)]
pub struct Level {
    /// Unique tier name, used for runtime enable/disable and metrics
    pub name: String,
    /// The raw backend for this tier
    pub adapter: Arc<dyn StorageAdapter>,
    /// Walk order; lower priorities are consulted (and warmed) first
    pub priority: u32,
    /// Tier-specific TTL; wins over the caller's `expires_in` when present
    pub ttl: Option<Duration>,
    /// Whether the tier participates at construction time
    pub enabled: bool,
}

impl Level {
    /// A tier over `adapter` at the given walk priority
    pub fn new(name: impl Into<String>, adapter: Arc<dyn StorageAdapter>, priority: u32) -> Self {
        Self {
            name: name.into(),
            adapter,
            priority,
            ttl: None,
            enabled: true,
        }
    }

    /// Set the tier TTL
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Start the tier disabled
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl std::fmt::Debug for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Level")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("ttl", &self.ttl)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Point-in-time traffic counters for one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelMetrics {
    /// Tier name
    pub name: String,
    /// Reads served by this tier
    pub hits: u64,
    /// Reads that fell past this tier (including tier errors)
    pub misses: u64,
    /// Writes into this tier (explicit, warm-up, and fallback)
    pub sets: u64,
    /// Deletes issued to this tier
    pub dels: u64,
}

/// Point-in-time configuration snapshot for one tier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelStats {
    /// Tier name
    pub name: String,
    /// Walk priority
    pub priority: u32,
    /// Tier TTL, when configured
    pub ttl: Option<Duration>,
    /// Whether the tier currently participates
    pub enabled: bool,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    dels: AtomicU64,
}

struct Tier {
    name: String,
    adapter: Arc<dyn StorageAdapter>,
    priority: u32,
    ttl: Option<Duration>,
    enabled: AtomicBool,
    counters: Counters,
}

impl Tier {
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Effective TTL for a write into this tier; the tier TTL wins even
    /// over a caller's `permanent`
    fn write_ttl(&self, options: &SetOptions) -> Option<Duration> {
        self.ttl
            .or(if options.permanent { None } else { options.expires_in })
    }
}

/// Construction options for [`MultiLevelManager`]
#[derive(Clone, Default)]
pub struct MultiLevelOptions {
    /// What to do when every enabled level misses
    pub fallback_strategy: FallbackStrategy,
    /// Optional Bloom filter consulted once per `get`, across the whole
    /// manager rather than per tier
    pub bloom: Option<Arc<BloomFilter>>,
}

impl MultiLevelOptions {
    /// Default options: executor fallback, no Bloom filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fallback strategy
    pub fn with_fallback_strategy(mut self, strategy: FallbackStrategy) -> Self {
        self.fallback_strategy = strategy;
        self
    }

    /// Attach a shared Bloom filter
    pub fn with_bloom(mut self, bloom: Arc<BloomFilter>) -> Self {
        self.bloom = Some(bloom);
        self
    }
}

/// Ordered tier composition with warm-up, per-tier TTLs, and metrics
pub struct MultiLevelManager {
    tiers: Vec<Tier>,
    fallback: FallbackStrategy,
    bloom: Option<Arc<BloomFilter>>,
}

impl MultiLevelManager {
    /// Registry name
    pub const NAME: &'static str = "multi-level";

    /// Build over the given levels, sorted ascending by priority.
    ///
    /// Rejects an empty level list and duplicate level names.
    pub fn new(levels: Vec<Level>, options: MultiLevelOptions) -> CacheResult<Self> {
        if levels.is_empty() {
            return Err(CacheError::Config(
                "multi-level manager requires at least one level".to_string(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for level in &levels {
            if !names.insert(level.name.clone()) {
                return Err(CacheError::Config(format!(
                    "duplicate level name '{}'",
                    level.name
                )));
            }
        }

        let mut levels = levels;
        levels.sort_by_key(|level| level.priority);
        let tiers = levels
            .into_iter()
            .map(|level| Tier {
                name: level.name,
                adapter: level.adapter,
                priority: level.priority,
                ttl: level.ttl,
                enabled: AtomicBool::new(level.enabled),
                counters: Counters::default(),
            })
            .collect();

        Ok(Self {
            tiers,
            fallback: options.fallback_strategy,
            bloom: options.bloom,
        })
    }

    /// Level names in walk order
    pub fn get_levels(&self) -> Vec<String> {
        self.tiers.iter().map(|tier| tier.name.clone()).collect()
    }

    /// Re-enable a level by name
    pub fn enable_level(&self, name: &str) -> CacheResult<()> {
        self.set_level_enabled(name, true)
    }

    /// Take a level out of the walk by name
    pub fn disable_level(&self, name: &str) -> CacheResult<()> {
        self.set_level_enabled(name, false)
    }

    /// Configuration snapshot of every level in walk order
    pub fn get_level_stats(&self) -> Vec<LevelStats> {
        self.tiers
            .iter()
            .map(|tier| LevelStats {
                name: tier.name.clone(),
                priority: tier.priority,
                ttl: tier.ttl,
                enabled: tier.is_enabled(),
            })
            .collect()
    }

    /// Traffic counters of every level in walk order
    pub fn get_metrics(&self) -> Vec<LevelMetrics> {
        self.tiers
            .iter()
            .map(|tier| LevelMetrics {
                name: tier.name.clone(),
                hits: tier.counters.hits.load(Ordering::Relaxed),
                misses: tier.counters.misses.load(Ordering::Relaxed),
                sets: tier.counters.sets.load(Ordering::Relaxed),
                dels: tier.counters.dels.load(Ordering::Relaxed),
            })
            .collect()
    }

    fn set_level_enabled(&self, name: &str, enabled: bool) -> CacheResult<()> {
        let tier = self
            .tiers
            .iter()
            .find(|tier| tier.name == name)
            .ok_or_else(|| CacheError::Config(format!("unknown level '{name}'")))?;
        tier.enabled.store(enabled, Ordering::Relaxed);
        Ok(())
    }

    fn definitely_absent(&self, key: &str) -> bool {
        self.bloom
            .as_ref()
            .is_some_and(|bloom| !bloom.might_contain(key))
    }

    /// Warm every enabled tier above the hit with the hit value, using each
    /// tier's own TTL else the caller's. Failures are logged, not retried.
    async fn warm_upper_tiers(&self, hit_index: usize, key: &str, raw: &str, ttl: Option<Duration>) {
        for tier in self.tiers[..hit_index].iter().filter(|tier| tier.is_enabled()) {
            let write_ttl = tier.ttl.or(ttl);
            match tier.adapter.set(key, raw, write_ttl).await {
                Ok(_) => {
                    tier.counters.sets.fetch_add(1, Ordering::Relaxed);
                }
                Err(error) => {
                    warn!(key, level = %tier.name, %error, "tier warm-up write failed");
                }
            }
        }
    }

    /// Populate every enabled tier after a fallback recompute
    async fn store_all(&self, key: &str, raw: &str, options: &SetOptions) -> bool {
        let mut any_success = false;
        for tier in self.tiers.iter().filter(|tier| tier.is_enabled()) {
            match tier.adapter.set(key, raw, tier.write_ttl(options)).await {
                Ok(acknowledged) => {
                    tier.counters.sets.fetch_add(1, Ordering::Relaxed);
                    any_success |= acknowledged;
                }
                Err(error) => {
                    warn!(key, level = %tier.name, %error, "tier write failed");
                }
            }
        }
        any_success
    }

    fn synthesize_record(&self, key: &str, raw: &str, options: &SetOptions) -> Record {
        let now = epoch_ms();
        let tags = options
            .tags
            .as_ref()
            .map(|tags| {
                tags.resolve()
                    .into_iter()
                    .map(|name| RecordTag::new(name, now))
                    .collect()
            })
            .unwrap_or_default();
        let permanent = options.permanent || options.expires_in.is_none();
        let expires_in = options
            .expires_in
            .map(|ttl| ttl.as_millis() as u64)
            .unwrap_or(0);
        Record::new(key, raw, now, expires_in, permanent, tags)
    }
}

#[async_trait]
impl Manager for MultiLevelManager {
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
            for (index, tier) in self
                .tiers
                .iter()
                .enumerate()
                .filter(|(_, tier)| tier.is_enabled())
            {
                match tier.adapter.get(key).await {
                    Ok(Some(raw)) => {
                        tier.counters.hits.fetch_add(1, Ordering::Relaxed);
                        debug!(key, level = %tier.name, "tier hit");
                        self.warm_upper_tiers(index, key, &raw, options.expires_in)
                            .await;
                        return Ok(raw);
                    }
                    Ok(None) => {
                        tier.counters.misses.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(error) => {
                        // A failing tier reads as a miss and the walk goes on.
                        tier.counters.misses.fetch_add(1, Ordering::Relaxed);
                        warn!(key, level = %tier.name, %error, "tier read failed");
                    }
                }
            }
        }

        match self.fallback {
            FallbackStrategy::Executor | FallbackStrategy::NextLevel => {
                let payload = executor().await?;
                self.store_all(key, &payload, &options.as_set_options())
                    .await;
                if let Some(bloom) = &self.bloom {
                    bloom.add(key);
                }
                Ok(payload)
            }
            FallbackStrategy::Fail => Err(CacheError::Miss {
                key: key.to_string(),
            }),
        }
    }

    async fn set(&self, key: &str, payload: &str, options: &SetOptions) -> CacheResult<Record> {
        self.store_all(key, payload, options).await;
        if let Some(bloom) = &self.bloom {
            bloom.add(key);
        }
        Ok(self.synthesize_record(key, payload, options))
    }

    async fn del(&self, key: &str) -> CacheResult<bool> {
        let mut any = false;
        for tier in self.tiers.iter().filter(|tier| tier.is_enabled()) {
            match tier.adapter.del(key).await {
                Ok(deleted) => {
                    tier.counters.dels.fetch_add(1, Ordering::Relaxed);
                    any |= deleted;
                }
                Err(error) => {
                    warn!(key, level = %tier.name, %error, "tier delete failed");
                }
            }
        }
        Ok(any)
    }
}
