//! The Record envelope and tag model
//!
//! A [`Record`] is the unit persisted per key: the serialized payload plus
//! the metadata needed to decide validity later (creation time, TTL or
//! permanence, and the tag versions captured at write time). Records are
//! stored as a single JSON blob so any string-typed backend can hold them.

use serde::{Deserialize, Serialize};

/// A named invalidation epoch captured on a [`Record`] at write time.
///
/// Versions are epoch-millisecond timestamps and only ever increase; a
/// record whose captured version is older than the tag's current version is
/// stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTag {
    /// Tag name as supplied by the caller (never prefixed or hashed)
    pub name: String,
    /// Tag version at the moment the record was written (epoch ms)
    pub version: u64,
}

impl RecordTag {
    /// Create a tag snapshot
    pub fn new(name: impl Into<String>, version: u64) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }
}

/// The stored envelope for a single key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Full storage key (already prefixed/hashed by the façade)
    pub key: String,
    /// Serialized payload; opaque to the core
    pub value: String,
    /// Write timestamp (epoch ms)
    pub created_at: u64,
    /// Time-to-live in milliseconds; ignored when `permanent` is set
    pub expires_in: u64,
    /// Disables time-based expiry (tag invalidation still applies)
    pub permanent: bool,
    /// Tag versions captured at write time
    pub tags: Vec<RecordTag>,
}

impl Record {
    /// Compose a record stamped at `created_at`
    pub fn new(
        key: impl Into<String>,
        value: impl Into<String>,
        created_at: u64,
        expires_in: u64,
        permanent: bool,
        tags: Vec<RecordTag>,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            created_at,
            expires_in,
            permanent,
            tags,
        }
    }

    /// Whether the record is still within its time budget at `now_ms`.
    ///
    /// Permanent records never expire by time. Tag validity is a separate
    /// check performed against the tag store (`Storage::is_outdated`).
    pub fn is_time_valid(&self, now_ms: u64) -> bool {
        self.permanent || now_ms <= self.created_at.saturating_add(self.expires_in)
    }

    /// Age of the record at `now_ms`, in milliseconds
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }
}

/// Current wall-clock time as epoch milliseconds.
///
/// Tag versions and record timestamps must survive process restarts and be
/// comparable across processes sharing a backend, so this is wall-clock
/// time rather than a monotonic instant.
pub(crate) fn epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_validity() {
        let record = Record::new("k", "v", 1_000, 500, false, vec![]);
        assert!(record.is_time_valid(1_000));
        assert!(record.is_time_valid(1_500));
        assert!(!record.is_time_valid(1_501));
    }

    #[test]
    fn test_permanent_record_never_expires() {
        let record = Record::new("k", "v", 1_000, 0, true, vec![]);
        assert!(record.is_time_valid(u64::MAX));
    }

    #[test]
    fn test_envelope_round_trip() {
        let record = Record::new(
            "user:1",
            "{\"id\":1}",
            42,
            60_000,
            false,
            vec![RecordTag::new("users", 42)],
        );

        let blob = serde_json::to_string(&record).unwrap();
        let parsed: Record = serde_json::from_str(&blob).unwrap();

        assert_eq!(parsed.key, "user:1");
        assert_eq!(parsed.value, "{\"id\":1}");
        assert_eq!(parsed.tags, vec![RecordTag::new("users", 42)]);
        assert!(!parsed.permanent);
    }

    #[test]
    fn test_age() {
        let record = Record::new("k", "v", 1_000, 500, false, vec![]);
        assert_eq!(record.age_ms(1_400), 400);
        assert_eq!(record.age_ms(900), 0);
    }
}
