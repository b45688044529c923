//! Crate-wide error types
//!
//! Every public operation returns [`CacheResult`]. The taxonomy mirrors how
//! failures are handled at the manager boundary: storage failures are
//! transient and degraded (reads become misses, writes are logged),
//! executor failures and configuration mistakes propagate to the caller.

use thiserror::Error;

/// Errors produced by cache operations
#[derive(Error, Debug)]
pub enum CacheError {
    /// A storage operation failed or timed out. Managers degrade this to a
    /// cache miss on reads and to a logged no-op on writes; it only escapes
    /// the crate through adapter-level calls made directly by the caller.
    #[error("storage error: {0}")]
    Storage(String),

    /// The caller-provided executor failed. Any per-key lock held on its
    /// behalf has been released before this is returned.
    #[error("executor error: {0}")]
    Executor(#[source] anyhow::Error),

    /// No level of a multi-level manager held the key and the fallback
    /// strategy forbids running the executor.
    #[error("cache miss for key '{key}'")]
    Miss {
        /// The key that missed every level
        key: String,
    },

    /// Invalid construction or registration arguments
    #[error("configuration error: {0}")]
    Config(String),

    /// A payload or record envelope could not be (de)serialized
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CacheError::Miss {
            key: "user:1".to_string(),
        };
        assert_eq!(err.to_string(), "cache miss for key 'user:1'");

        let err = CacheError::Config("refresh factor must be in (0, 1)".to_string());
        assert!(err.to_string().contains("configuration error"));
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<u32>("not-a-number").unwrap_err();
        let err: CacheError = parse_err.into();
        assert!(matches!(err, CacheError::Serialization(_)));
    }
}
