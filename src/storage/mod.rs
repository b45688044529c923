//! Storage contracts and the record discipline
//!
//! Two shapes over the same backend:
//!
//! - [`StorageAdapter`]: the raw string interface a backend implements
//! - [`Storage`]: the record-shaped interface managers consume, provided by
//!   [`RecordStorage`] layered over any adapter
//!
//! Both shapes must be consistent at the same key; the multi-level manager
//! talks to adapters directly, every other manager goes through [`Storage`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CacheResult;
use crate::options::SetOptions;
use crate::record::{Record, RecordTag};

mod adapter;
mod memory;
mod record_storage;

pub use adapter::{ConnectListener, StorageAdapter};
pub use memory::MemoryAdapter;
pub use record_storage::{RecordStorage, RecordStorageConfig};

/// Backend connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// The backend is reachable
    Connected,
    /// The backend is unreachable; operations will fail transiently
    Disconnected,
}

/// The record-shaped storage contract consumed by managers.
///
/// Implementations hide backend specifics: envelope (de)serialization, tag
/// version bookkeeping, and per-key lock primitives. Methods may fail
/// transiently; managers treat read failures as misses and write failures
/// as best-effort.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Read the full record envelope at `key`
    async fn get(&self, key: &str) -> CacheResult<Option<Record>>;

    /// Serialize and write a record at `key`, capturing current tag
    /// versions for the options' tags. Returns the record actually written.
    async fn set(&self, key: &str, payload: &str, options: &SetOptions) -> CacheResult<Record>;

    /// Delete `key`, reporting whether it existed
    async fn del(&self, key: &str) -> CacheResult<bool>;

    /// Advance every named tag's version to now, retroactively invalidating
    /// records that captured older versions
    async fn touch(&self, tag_names: &[String]) -> CacheResult<()>;

    /// Snapshot current versions for the named tags, creating missing tags
    /// at the current time
    async fn get_tags(&self, tag_names: &[String]) -> CacheResult<Vec<RecordTag>>;

    /// Best-effort exclusive recompute lock for `key`
    async fn lock_key(&self, key: &str) -> CacheResult<bool>;

    /// Release the recompute lock for `key`
    async fn release_key(&self, key: &str) -> CacheResult<bool>;

    /// Whether the recompute lock for `key` is currently held
    async fn key_is_locked(&self, key: &str) -> CacheResult<bool>;

    /// Whether any tag captured on `record` has moved past the captured
    /// version
    async fn is_outdated(&self, record: &Record) -> CacheResult<bool>;

    /// Current backend connection state
    fn connection_status(&self) -> ConnectionStatus;
}
