//! # Stratacache - Tiered Caching Library
//!
//! An asynchronous caching layer that sits between an application and its
//! slow data sources.
//!
//! ## Architecture
//!
//! - `cache`: the façade with the manager registry, key shaping, and the
//!   typed boundary
//! - `manager`: caching disciplines (read-through, write-through,
//!   refresh-ahead, multi-level) and the shared stampede-protected
//!   recompute path
//! - `storage`: the backend seam with raw adapters, the record discipline,
//!   and the in-memory adapter
//! - `record`: the persisted envelope and tag model
//! - `bloom`: the probabilistic pre-check for definite misses
//! - `options`: per-call read/write options
//! - `error`: the failure taxonomy
//!
//! ## Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use stratacache::{Cache, GetOptions, MemoryAdapter, RecordStorage};
//!
//! # async fn example() -> stratacache::CacheResult<()> {
//! let cache = Cache::new(Arc::new(RecordStorage::new(MemoryAdapter::new())));
//!
//! // Miss: the executor runs once and its result is cached.
//! let user: String = cache
//!     .get(
//!         "user:1",
//!         || async { Ok("loaded from the database".to_string()) },
//!         GetOptions::new().with_expires_in(std::time::Duration::from_secs(60)),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

// Failure taxonomy
pub mod error;

// Record envelope and tag model
pub mod record;

// Bloom pre-check
pub mod bloom;

// Payload serialization hooks
pub mod codec;

// Per-call options
pub mod options;

// Storage contracts and adapters
pub mod storage;

// Caching disciplines
pub mod manager;

// The façade
pub mod cache;

// Re-export commonly used types
pub use bloom::{BloomConfig, BloomFilter, BloomStats};
pub use cache::{Cache, CacheConfig};
pub use error::{CacheError, CacheResult};
pub use manager::{
    FallbackStrategy, Level, LevelMetrics, LevelStats, Manager, ManagerOptions, MultiLevelManager,
    MultiLevelOptions, ReadThroughManager, RefreshAheadManager, WriteThroughManager,
};
pub use options::{GetOptions, LockedKeyRetrieveStrategy, SetOptions, TagSource};
pub use record::{Record, RecordTag};
pub use storage::{
    ConnectionStatus, MemoryAdapter, RecordStorage, RecordStorageConfig, Storage, StorageAdapter,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
