/// Documentation cache
///
/// TTL + size-bounded cache with strict LRU eviction. One async mutex guards
/// the whole index so purge, eviction and insertion are atomic with respect
/// to each other. Entries are mirrored to a local backend on a best-effort
/// basis and can be reloaded with `warm` after a restart. Mirror I/O always
/// runs after the index lock is released.

use crate::cache::entry::{CacheEntry, CacheStats, CACHE_PREFIX};
use crate::cache::prefetch::KeywordTable;
use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{StoreError, StoreResult};
use crate::storage::backend::{key_segments, with_deadline, Backend};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;

#[derive(Debug)]
struct Resident {
    entry: CacheEntry,
    /// Position in the LRU order; higher is more recent
    tick: u64,
}

#[derive(Debug, Default)]
struct CacheIndex {
    entries: HashMap<String, Resident>,
    /// tick → key, ascending = least recently used first
    lru: BTreeMap<u64, String>,
    /// (expiry, key) for cheap purging
    expiry: BTreeSet<(DateTime<Utc>, String)>,
    total_bytes: u64,
    next_tick: u64,
    hits: u64,
    lookups: u64,
}

impl CacheIndex {
    fn bump_tick(&mut self) -> u64 {
        self.next_tick += 1;
        self.next_tick
    }

    fn insert(&mut self, entry: CacheEntry) {
        let tick = self.bump_tick();
        self.total_bytes += entry.size_bytes;
        self.lru.insert(tick, entry.cache_key.clone());
        self.expiry.insert((entry.expires_at(), entry.cache_key.clone()));
        self.entries.insert(entry.cache_key.clone(), Resident { entry, tick });
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let resident = self.entries.remove(key)?;
        self.lru.remove(&resident.tick);
        self.expiry.remove(&(resident.entry.expires_at(), key.to_string()));
        self.total_bytes = self.total_bytes.saturating_sub(resident.entry.size_bytes);
        Some(resident.entry)
    }

    /// Move `key` to the most-recently-used position
    fn touch(&mut self, key: &str, now: DateTime<Utc>) {
        let tick = self.bump_tick();
        if let Some(resident) = self.entries.get_mut(key) {
            self.lru.remove(&resident.tick);
            resident.tick = tick;
            resident.entry.last_accessed_at = now;
            self.lru.insert(tick, key.to_string());
        }
    }

    /// Drop every expired entry; returns the dropped keys
    fn purge_expired(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let mut purged = Vec::new();
        while let Some((expires_at, key)) = self.expiry.first().cloned() {
            if expires_at > now {
                break;
            }
            self.remove(&key);
            purged.push(key);
        }
        purged
    }

    /// LRU victims that free room for `incoming` bytes replacing `key`,
    /// or `None` when pinned entries leave no room
    fn plan_eviction(&self, key: &str, incoming: u64, budget: u64) -> Option<Vec<String>> {
        let replaced = self.entries.get(key).map_or(0, |r| r.entry.size_bytes);
        let mut occupied = self.total_bytes - replaced;
        let mut victims = Vec::new();

        for candidate in self.lru.values() {
            if occupied + incoming <= budget {
                break;
            }
            if candidate == key {
                continue;
            }
            if let Some(resident) = self.entries.get(candidate) {
                if resident.entry.pinned {
                    continue;
                }
                occupied -= resident.entry.size_bytes;
                victims.push(candidate.clone());
            }
        }

        (occupied + incoming <= budget).then_some(victims)
    }
}

/// TTL + LRU documentation cache
#[derive(Debug)]
pub struct DocCache {
    index: Mutex<CacheIndex>,
    ttl: Duration,
    budget: u64,
    keywords: KeywordTable,
    /// Local backend entries are mirrored to
    persistence: Option<Arc<dyn Backend>>,
    io_timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl DocCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            index: Mutex::new(CacheIndex::default()),
            ttl: config.ttl(),
            budget: config.size_budget_bytes,
            keywords: KeywordTable::default(),
            persistence: None,
            io_timeout: Duration::from_secs(5),
            clock: Arc::new(SystemClock),
        }
    }

    /// Mirror entries to `backend` under `cache/`
    pub fn with_persistence(mut self, backend: Arc<dyn Backend>, io_timeout: Duration) -> Self {
        self.persistence = Some(backend);
        self.io_timeout = io_timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_keywords(mut self, keywords: KeywordTable) -> Self {
        self.keywords = keywords;
        self
    }

    /// Keyword table used by prefetch; swappable at runtime
    pub fn keywords(&self) -> &KeywordTable {
        &self.keywords
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Fresh payload for `cache_key`; a hit becomes most recently used
    pub async fn get(&self, cache_key: &str) -> Option<Value> {
        let now = self.clock.now();
        let mut index = self.index.lock().await;
        let purged = index.purge_expired(now);

        index.lookups += 1;
        let payload = index
            .entries
            .get(cache_key)
            .map(|resident| resident.entry.payload.clone());
        if payload.is_some() {
            index.hits += 1;
            index.touch(cache_key, now);
        }
        drop(index);

        self.forget_persisted(&purged).await;
        payload
    }

    /// Whether a fresh entry exists, without counting a lookup or touching LRU
    pub async fn contains_fresh(&self, cache_key: &str) -> bool {
        let now = self.clock.now();
        let index = self.index.lock().await;
        index
            .entries
            .get(cache_key)
            .is_some_and(|resident| !resident.entry.is_expired(now))
    }

    /// Insert or replace with the default TTL
    pub async fn put(&self, cache_key: &str, payload: Value) -> StoreResult<()> {
        self.put_with_ttl(cache_key, payload, self.ttl).await
    }

    /// Insert or replace with an explicit TTL
    pub async fn put_with_ttl(&self, cache_key: &str, payload: Value, ttl: Duration) -> StoreResult<()> {
        let storage_key = CacheEntry::storage_key(cache_key);
        if cache_key.is_empty() || key_segments(&storage_key).is_err() {
            return Err(StoreError::invalid_state(cache_key, "invalid cache key"));
        }

        let now = self.clock.now();
        let mut entry = CacheEntry::new(cache_key, payload, ttl, now)?;
        if entry.size_bytes > self.budget {
            return Err(StoreError::too_large(cache_key, entry.size_bytes, self.budget));
        }

        let mut index = self.index.lock().await;
        let mut dropped = index.purge_expired(now);

        let Some(victims) = index.plan_eviction(cache_key, entry.size_bytes, self.budget) else {
            drop(index);
            self.forget_persisted(&dropped).await;
            return Err(StoreError::too_large(cache_key, entry.size_bytes, self.budget));
        };

        for victim in &victims {
            index.remove(victim);
            tracing::debug!("🧹 Evicted {} (LRU)", victim);
        }
        dropped.extend(victims);

        if let Some(previous) = index.remove(cache_key) {
            entry.pinned = previous.pinned;
        }
        let encoded = self.encode_persisted(&entry);
        index.insert(entry);
        let total_bytes = index.total_bytes;
        drop(index);

        dropped.retain(|key| key != cache_key);
        self.forget_persisted(&dropped).await;
        self.write_persisted(cache_key, encoded).await;
        tracing::debug!("📥 Cached {} ({} bytes used of {})", cache_key, total_bytes, self.budget);
        Ok(())
    }

    /// Exempt a resident entry from LRU eviction
    pub async fn pin(&self, cache_key: &str) -> StoreResult<()> {
        self.set_pinned(cache_key, true).await
    }

    pub async fn unpin(&self, cache_key: &str) -> StoreResult<()> {
        self.set_pinned(cache_key, false).await
    }

    async fn set_pinned(&self, cache_key: &str, pinned: bool) -> StoreResult<()> {
        let now = self.clock.now();
        let mut index = self.index.lock().await;
        let purged = index.purge_expired(now);

        let encoded = match index.entries.get_mut(cache_key) {
            Some(resident) => {
                resident.entry.pinned = pinned;
                Ok(self.encode_persisted(&resident.entry))
            }
            None => Err(StoreError::not_found(cache_key)),
        };
        drop(index);

        self.forget_persisted(&purged).await;
        self.write_persisted(cache_key, encoded?).await;
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let mut index = self.index.lock().await;
        let purged = index.purge_expired(now);

        let oldest_entry_age_secs = index
            .entries
            .values()
            .map(|resident| resident.entry.created_at)
            .min()
            .map(|created_at| (now - created_at).num_seconds().max(0) as u64);

        let stats = CacheStats {
            entry_count: index.entries.len(),
            total_bytes: index.total_bytes,
            budget_bytes: self.budget,
            hit_rate: if index.lookups == 0 {
                0.0
            } else {
                index.hits as f64 / index.lookups as f64
            },
            oldest_entry_age_secs,
            hits: index.hits,
            lookups: index.lookups,
            pinned: index.entries.values().filter(|r| r.entry.pinned).count(),
        };
        drop(index);

        self.forget_persisted(&purged).await;
        stats
    }

    /// Zero the hit/lookup counters
    pub async fn reset_stats(&self) {
        let mut index = self.index.lock().await;
        index.hits = 0;
        index.lookups = 0;
    }

    /// Remove every entry, persisted copies included, and reset counters
    pub async fn clear(&self) {
        let count = {
            let mut index = self.index.lock().await;
            std::mem::take(&mut *index).entries.len()
        };

        if let Some(backend) = &self.persistence {
            match with_deadline(CACHE_PREFIX, self.io_timeout, backend.list(CACHE_PREFIX)).await {
                Ok(keys) => {
                    for key in keys {
                        if let Err(e) = with_deadline(&key, self.io_timeout, backend.delete(&key)).await {
                            tracing::warn!("⚠️ Failed to delete persisted cache entry {}: {}", key, e);
                        }
                    }
                }
                Err(e) => tracing::warn!("⚠️ Failed to list persisted cache entries: {}", e),
            }
        }

        tracing::info!("🧹 Cleared documentation cache ({} entries)", count);
    }

    /// Reload persisted entries, most recently accessed first, until the
    /// budget is full; expired, corrupt and overflow entries are removed
    pub async fn warm(&self) -> StoreResult<usize> {
        let Some(backend) = &self.persistence else {
            return Ok(0);
        };

        let now = self.clock.now();
        let keys = with_deadline(CACHE_PREFIX, self.io_timeout, backend.list(CACHE_PREFIX)).await?;

        let mut loaded = Vec::new();
        let mut discard = Vec::new();
        for storage_key in keys {
            let Some(cache_key) = CacheEntry::cache_key_of(&storage_key) else {
                continue;
            };
            let decoded = with_deadline(&storage_key, self.io_timeout, backend.get(&storage_key))
                .await
                .and_then(|bytes| {
                    serde_json::from_slice::<CacheEntry>(&bytes)
                        .map_err(|e| StoreError::invalid_state(&storage_key, e))
                });

            match decoded {
                Ok(entry) if entry.cache_key == cache_key && !entry.is_expired(now) => loaded.push(entry),
                Ok(_) => discard.push(cache_key.to_string()),
                Err(e) => {
                    tracing::warn!("⚠️ Dropping unreadable cache entry {}: {}", storage_key, e);
                    discard.push(cache_key.to_string());
                }
            }
        }

        loaded.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));

        let mut index = self.index.lock().await;
        let mut kept = Vec::new();
        let mut used = index.total_bytes;
        for entry in loaded {
            if index.entries.contains_key(&entry.cache_key) {
                continue;
            }
            if used + entry.size_bytes <= self.budget {
                used += entry.size_bytes;
                kept.push(entry);
            } else {
                discard.push(entry.cache_key);
            }
        }

        // Oldest first so the most recent entry ends up MRU
        let count = kept.len();
        for entry in kept.into_iter().rev() {
            index.insert(entry);
        }
        drop(index);

        self.forget_persisted(&discard).await;
        tracing::info!("🔥 Warmed documentation cache with {} entries ({} dropped)", count, discard.len());
        Ok(count)
    }

    /// Mirror copy of `entry`, taken while the index is locked; `None`
    /// without persistence
    fn encode_persisted(&self, entry: &CacheEntry) -> Option<Vec<u8>> {
        self.persistence.as_ref()?;
        match serde_json::to_vec(entry) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                tracing::warn!("⚠️ Failed to encode cache entry {}: {}", entry.cache_key, e);
                None
            }
        }
    }

    async fn write_persisted(&self, cache_key: &str, bytes: Option<Vec<u8>>) {
        let (Some(backend), Some(bytes)) = (&self.persistence, bytes) else {
            return;
        };
        let storage_key = CacheEntry::storage_key(cache_key);
        if let Err(e) = with_deadline(&storage_key, self.io_timeout, backend.put(&storage_key, &bytes)).await {
            tracing::warn!("⚠️ Failed to persist cache entry {}: {}", cache_key, e);
        }
    }

    async fn forget_persisted(&self, cache_keys: &[String]) {
        let Some(backend) = &self.persistence else {
            return;
        };
        for cache_key in cache_keys {
            let storage_key = CacheEntry::storage_key(cache_key);
            if let Err(e) = with_deadline(&storage_key, self.io_timeout, backend.delete(&storage_key)).await {
                tracing::warn!("⚠️ Failed to delete persisted cache entry {}: {}", cache_key, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::storage::{FaultMode, LocalFsBackend, MemoryBackend};
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    /// JSON string whose serialized form is exactly `len` bytes
    fn payload_of(len: usize) -> Value {
        json!("x".repeat(len - 2))
    }

    fn cache(budget: u64) -> (Arc<ManualClock>, DocCache) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = CacheConfig {
            size_budget_bytes: budget,
            ..CacheConfig::default()
        };
        (clock.clone(), DocCache::new(&config).with_clock(clock))
    }

    #[tokio::test]
    async fn test_hit_and_miss_are_counted() {
        let (_, cache) = cache(1_000);
        cache.put("nodes.slack", json!({ "doc": "slack" })).await.unwrap();

        assert_eq!(cache.get("nodes.slack").await, Some(json!({ "doc": "slack" })));
        assert_eq!(cache.get("nodes.email").await, None);

        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.hit_rate, 0.5);

        cache.reset_stats().await;
        assert_eq!(cache.stats().await.hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_lru_evicts_least_recently_accessed() {
        let (_, cache) = cache(300);
        cache.put("a", payload_of(100)).await.unwrap();
        cache.put("b", payload_of(100)).await.unwrap();
        cache.put("c", payload_of(100)).await.unwrap();

        // a is now more recent than b
        assert!(cache.get("a").await.is_some());
        cache.put("d", payload_of(100)).await.unwrap();

        assert!(cache.get("b").await.is_none());
        assert!(cache.get("a").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert!(cache.get("d").await.is_some());
        assert_eq!(cache.stats().await.total_bytes, 300);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss_regardless_of_recency() {
        let (clock, cache) = cache(1_000);
        cache
            .put_with_ttl("short", json!("doc"), Duration::from_secs(60))
            .await
            .unwrap();
        assert!(cache.get("short").await.is_some());

        clock.advance(ChronoDuration::seconds(60));
        assert!(cache.get("short").await.is_none());
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_sub_second_ttl_is_served_until_it_lapses() {
        let (clock, cache) = cache(1_000);
        cache
            .put_with_ttl("k", json!(1), Duration::from_millis(900))
            .await
            .unwrap();
        assert_eq!(cache.get("k").await, Some(json!(1)));

        clock.advance(ChronoDuration::milliseconds(899));
        assert!(cache.get("k").await.is_some());
        clock.advance(ChronoDuration::milliseconds(1));
        assert!(cache.get("k").await.is_none());

        let err = cache.put_with_ttl("k", json!(1), Duration::ZERO).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_puts_never_exceed_budget() {
        let (_, cache) = cache(1_000);
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..64usize)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.put(&format!("doc.{i}"), payload_of(90 + (i % 7) * 10)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let index = cache.index.lock().await;
        let resident: u64 = index.entries.values().map(|r| r.entry.size_bytes).sum();
        assert!(index.total_bytes <= 1_000, "{} bytes resident", index.total_bytes);
        assert_eq!(resident, index.total_bytes);
        assert_eq!(index.lru.len(), index.entries.len());
        assert!(!index.entries.is_empty());
    }

    #[tokio::test]
    async fn test_slow_mirror_does_not_block_readers() {
        let backend = Arc::new(MemoryBackend::new());
        backend.set_mode(FaultMode::Hang);
        let (_, cache) = cache(1_000);
        let cache = Arc::new(cache.with_persistence(backend.clone(), Duration::from_secs(60)));

        let writer = tokio::spawn({
            let cache = cache.clone();
            async move { cache.put("a", json!(1)).await }
        });
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cache.contains_fresh("a").await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let read = tokio::time::timeout(Duration::from_secs(1), cache.get("a")).await.unwrap();
        assert_eq!(read, Some(json!(1)));
        let stats = tokio::time::timeout(Duration::from_secs(1), cache.stats()).await.unwrap();
        assert_eq!(stats.entry_count, 1);

        writer.abort();
    }

    #[tokio::test]
    async fn test_replacing_an_expired_entry_keeps_its_mirror() {
        let backend = Arc::new(MemoryBackend::new());
        let (clock, cache) = cache(1_000);
        let cache = cache.with_persistence(backend.clone(), Duration::from_secs(1));

        cache.put_with_ttl("a", json!(1), Duration::from_secs(10)).await.unwrap();
        clock.advance(ChronoDuration::seconds(20));
        cache.put("a", json!(2)).await.unwrap();

        let persisted: CacheEntry = serde_json::from_slice(&backend.snapshot("cache/a.entry").unwrap()).unwrap();
        assert_eq!(persisted.payload, json!(2));
    }

    #[tokio::test]
    async fn test_oversized_payload_is_too_large() {
        let (_, cache) = cache(100);
        let err = cache.put("big", payload_of(101)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooLarge);
        assert_eq!(err.key(), "big");
    }

    #[tokio::test]
    async fn test_large_insert_evicts_enough_lru_data() {
        let (_, cache) = cache(100);
        for i in 0..6 {
            cache.put(&format!("old.{i}"), payload_of(10)).await.unwrap();
        }
        cache.put("recent", payload_of(20)).await.unwrap();

        cache.put("docs.slack", payload_of(50)).await.unwrap();

        let stats = cache.stats().await;
        assert!(stats.total_bytes <= 100);
        assert!(cache.get("docs.slack").await.is_some());
        assert!(cache.get("recent").await.is_some());
        assert!(cache.get("old.0").await.is_none());
    }

    #[tokio::test]
    async fn test_pinned_entries_survive_eviction() {
        let (_, cache) = cache(200);
        cache.put("pinned", payload_of(100)).await.unwrap();
        cache.pin("pinned").await.unwrap();
        cache.put("b", payload_of(100)).await.unwrap();

        cache.put("c", payload_of(100)).await.unwrap();
        assert!(cache.get("pinned").await.is_some());
        assert!(cache.get("b").await.is_none());

        cache.pin("c").await.unwrap();
        let err = cache.put("d", payload_of(100)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooLarge);

        assert!(cache.pin("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_replacing_an_entry_reuses_its_space() {
        let (_, cache) = cache(100);
        cache.put("a", payload_of(60)).await.unwrap();
        cache.put("a", payload_of(90)).await.unwrap();

        let stats = cache.stats().await;
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.total_bytes, 90);
    }

    #[tokio::test]
    async fn test_invalid_keys_are_rejected() {
        let (_, cache) = cache(100);
        for key in ["", "../escape", "a//b"] {
            assert_eq!(cache.put(key, json!(1)).await.unwrap_err().kind(), ErrorKind::InvalidState);
        }
    }

    #[tokio::test]
    async fn test_oldest_entry_age() {
        let (clock, cache) = cache(1_000);
        assert_eq!(cache.stats().await.oldest_entry_age_secs, None);

        cache.put("a", json!(1)).await.unwrap();
        clock.advance(ChronoDuration::seconds(30));
        cache.put("b", json!(2)).await.unwrap();

        assert_eq!(cache.stats().await.oldest_entry_age_secs, Some(30));
    }

    #[tokio::test]
    async fn test_clear_removes_persisted_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let (_, cache) = cache(1_000);
        let cache = cache.with_persistence(backend.clone(), Duration::from_secs(1));

        cache.put("a", json!(1)).await.unwrap();
        assert!(backend.snapshot("cache/a.entry").is_some());

        cache.clear().await;
        assert!(backend.is_empty());
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_warm_reloads_fresh_entries_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn Backend> = Arc::new(LocalFsBackend::new(dir.path()).await.unwrap());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let config = CacheConfig::default();

        {
            let cache = DocCache::new(&config)
                .with_clock(clock.clone())
                .with_persistence(backend.clone(), Duration::from_secs(1));
            cache.put("nodes.slack", json!({ "doc": "slack" })).await.unwrap();
            cache
                .put_with_ttl("nodes.stale", json!("old"), Duration::from_secs(10))
                .await
                .unwrap();
        }
        backend.put("cache/nodes.corrupt.entry", b"{oops").await.unwrap();
        clock.advance(ChronoDuration::seconds(20));

        let restarted = DocCache::new(&config)
            .with_clock(clock.clone())
            .with_persistence(backend.clone(), Duration::from_secs(1));
        assert_eq!(restarted.warm().await.unwrap(), 1);
        assert_eq!(restarted.get("nodes.slack").await, Some(json!({ "doc": "slack" })));

        let remaining = backend.list("cache/").await.unwrap();
        assert_eq!(remaining, vec!["cache/nodes.slack.entry".to_string()]);
    }

    #[tokio::test]
    async fn test_warm_respects_budget_most_recent_first() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let big = CacheConfig::default();

        let writer = DocCache::new(&big)
            .with_clock(clock.clone())
            .with_persistence(backend.clone(), Duration::from_secs(1));
        writer.put("older", payload_of(60)).await.unwrap();
        clock.advance(ChronoDuration::seconds(1));
        writer.put("newer", payload_of(60)).await.unwrap();

        let small = CacheConfig {
            size_budget_bytes: 100,
            ..CacheConfig::default()
        };
        let restarted = DocCache::new(&small)
            .with_clock(clock.clone())
            .with_persistence(backend.clone(), Duration::from_secs(1));

        assert_eq!(restarted.warm().await.unwrap(), 1);
        assert!(restarted.get("newer").await.is_some());
        assert!(restarted.get("older").await.is_none());
    }
}
