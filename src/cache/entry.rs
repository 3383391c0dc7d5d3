/// Cache entry and report types

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Namespace of persisted entries on the local backend
pub const CACHE_PREFIX: &str = "cache/";

const ENTRY_SUFFIX: &str = ".entry";

/// Cached documentation lookup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub cache_key: String,
    pub payload: Value,
    /// Serialized length of `payload`; what the budget counts
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    /// Lifetime from `created_at`, in milliseconds
    pub ttl_ms: u64,
    /// Exempt from LRU eviction, not from expiry
    #[serde(default)]
    pub pinned: bool,
}

impl CacheEntry {
    /// Sub-millisecond TTLs round up to one millisecond; a zero TTL is
    /// rejected
    pub fn new(cache_key: &str, payload: Value, ttl: Duration, now: DateTime<Utc>) -> StoreResult<Self> {
        if ttl.is_zero() {
            return Err(StoreError::invalid_state(cache_key, "ttl must be positive"));
        }
        let ttl_ms = u64::try_from(ttl.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX);

        let size_bytes = serde_json::to_vec(&payload)
            .map_err(|e| StoreError::invalid_state(cache_key, e))?
            .len() as u64;

        Ok(Self {
            cache_key: cache_key.to_string(),
            payload,
            size_bytes,
            created_at: now,
            last_accessed_at: now,
            ttl_ms,
            pinned: false,
        })
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        i64::try_from(self.ttl_ms)
            .ok()
            .and_then(chrono::Duration::try_milliseconds)
            .and_then(|ttl| self.created_at.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Expired once `now - created_at >= ttl`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Backend key the entry persists under
    pub fn storage_key(cache_key: &str) -> String {
        format!("{CACHE_PREFIX}{cache_key}{ENTRY_SUFFIX}")
    }

    /// Inverse of `storage_key`
    pub fn cache_key_of(storage_key: &str) -> Option<&str> {
        storage_key
            .strip_prefix(CACHE_PREFIX)?
            .strip_suffix(ENTRY_SUFFIX)
            .filter(|key| !key.is_empty())
    }
}

/// Snapshot of cache occupancy and effectiveness
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_bytes: u64,
    pub budget_bytes: u64,
    /// hits / lookups since the last reset; 0 when there were none
    pub hit_rate: f64,
    /// Age in seconds of the oldest resident entry
    pub oldest_entry_age_secs: Option<u64>,
    pub hits: u64,
    pub lookups: u64,
    pub pinned: usize,
}

/// Outcome of one prefetch batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    /// Distinct cache keys the keywords resolved to
    pub requested: usize,
    pub prefetched: usize,
    pub already_cached: usize,
    /// Resolver failures and oversized payloads
    pub skipped: usize,
    pub cancelled: bool,
}
