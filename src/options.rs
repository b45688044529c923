//! Per-call options for cache reads and writes

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Behaviour when another caller already holds the recompute lock for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockedKeyRetrieveStrategy {
    /// Poll the store with exponential backoff until the winner's record
    /// appears, falling back to the executor when the wait exhausts
    #[default]
    WaitForResult,
    /// Run the executor immediately and return its result without writing,
    /// leaving the store to the lock holder
    RunExecutor,
}

/// Tags for a write: either a ready list or a callable producing one.
///
/// Providers are resolved eagerly at set time, before tag versions are
/// snapshotted.
#[derive(Clone)]
pub enum TagSource {
    /// A fixed list of tag names
    List(Vec<String>),
    /// A callable producing the tag names at write time
    Provider(Arc<dyn Fn() -> Vec<String> + Send + Sync>),
}

impl TagSource {
    /// Resolve to a concrete tag list
    pub fn resolve(&self) -> Vec<String> {
        match self {
            Self::List(tags) => tags.clone(),
            Self::Provider(provider) => provider(),
        }
    }
}

impl fmt::Debug for TagSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(tags) => f.debug_tuple("List").field(tags).finish(),
            Self::Provider(_) => f.debug_tuple("Provider").field(&"<fn>").finish(),
        }
    }
}

impl From<Vec<String>> for TagSource {
    fn from(tags: Vec<String>) -> Self {
        Self::List(tags)
    }
}

impl From<Vec<&str>> for TagSource {
    fn from(tags: Vec<&str>) -> Self {
        Self::List(tags.into_iter().map(String::from).collect())
    }
}

/// Options for `get` operations
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// TTL for a record written back by the recompute path; the façade
    /// default applies when unset
    pub expires_in: Option<Duration>,
    /// Tags captured on a record written back by the recompute path
    pub tags: Option<TagSource>,
    /// Manager to dispatch to; the façade default applies when unset
    pub manager: Option<String>,
    /// Contention behaviour; defaults to waiting for the winner's result
    pub locked_key_retrieve_strategy: Option<LockedKeyRetrieveStrategy>,
}

impl GetOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the write-back TTL
    pub fn with_expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    /// Set the tags captured on write-back
    pub fn with_tags(mut self, tags: impl Into<TagSource>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    /// Dispatch to a specific registered manager
    pub fn with_manager(mut self, name: impl Into<String>) -> Self {
        self.manager = Some(name.into());
        self
    }

    /// Set the contention strategy
    pub fn with_strategy(mut self, strategy: LockedKeyRetrieveStrategy) -> Self {
        self.locked_key_retrieve_strategy = Some(strategy);
        self
    }

    /// The write options the recompute path uses when storing the executor
    /// result
    pub(crate) fn as_set_options(&self) -> SetOptions {
        SetOptions {
            expires_in: self.expires_in,
            tags: self.tags.clone(),
            manager: self.manager.clone(),
            permanent: false,
        }
    }
}

/// Options for `set` operations
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// TTL for the record; the façade default applies when unset
    pub expires_in: Option<Duration>,
    /// Tags to capture on the record
    pub tags: Option<TagSource>,
    /// Manager to dispatch to; the façade default applies when unset
    pub manager: Option<String>,
    /// Disable time-based expiry for this record
    pub permanent: bool,
}

impl SetOptions {
    /// Create empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the TTL
    pub fn with_expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }

    /// Set the tags to capture
    pub fn with_tags(mut self, tags: impl Into<TagSource>) -> Self {
        self.tags = Some(tags.into());
        self
    }

    /// Dispatch to a specific registered manager
    pub fn with_manager(mut self, name: impl Into<String>) -> Self {
        self.manager = Some(name.into());
        self
    }

    /// Mark the record permanent
    pub fn with_permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }
}
