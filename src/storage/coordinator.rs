/// Dual-backend coordinator
///
/// Presents a remote and a local backend as one logical store:
/// - the remote store is authoritative whenever it answers
/// - every successful remote write is mirrored to local
/// - a failed remote write lands locally and is queued as pending-sync
/// - reads fall back to local when the remote fails
///
/// The pending-sync queue is a set of marker files on the local backend
/// (`pending-sync/{key}`), so reconciliation state survives restarts and can
/// be inspected.

use crate::clock::{Clock, SystemClock};
use crate::config::StorageConfig;
use crate::error::{StoreError, StoreResult};
use crate::storage::backend::{with_deadline, Backend};
use crate::storage::locks::KeyedLocks;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Namespace of pending-sync markers on the local backend
pub const PENDING_PREFIX: &str = "pending-sync/";

/// Remote operation still owed for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    Put,
    Delete,
}

/// Why the key was queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PendingReason {
    /// The remote call failed or timed out
    RemoteFailure,
    /// The caller chose a local-only write
    Deferred,
}

/// Pending-sync marker as persisted on the local backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMarker {
    pub key: String,
    pub op: PendingOp,
    pub reason: PendingReason,
    /// Failed reconciliation attempts so far
    pub attempts: u32,
    pub first_marked_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Outcome of one reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub synced: usize,
    pub still_pending: usize,
    pub cancelled: bool,
}

/// Tunables for the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub remote_timeout: Duration,
    pub local_timeout: Duration,
    pub local_fallback_enabled: bool,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

impl From<&StorageConfig> for CoordinatorOptions {
    fn from(config: &StorageConfig) -> Self {
        Self {
            remote_timeout: config.remote_timeout(),
            local_timeout: config.local_timeout(),
            local_fallback_enabled: config.local_fallback_enabled,
        }
    }
}

/// One logical store over a remote and a local backend
#[derive(Debug)]
pub struct StorageCoordinator {
    /// Authoritative store; `None` runs local-only
    remote: Option<Arc<dyn Backend>>,
    /// Fallback, mirror and pending-sync side-table
    local: Arc<dyn Backend>,
    options: CoordinatorOptions,
    /// Serializes writes and per-key reconciliation
    locks: KeyedLocks,
    /// Held while a reconciliation sweep runs
    sweep_lock: Mutex<()>,
    clock: Arc<dyn Clock>,
}

fn marker_key(key: &str) -> String {
    format!("{PENDING_PREFIX}{key}")
}

impl StorageCoordinator {
    pub fn new(
        remote: Option<Arc<dyn Backend>>,
        local: Arc<dyn Backend>,
        options: CoordinatorOptions,
    ) -> Self {
        Self {
            remote,
            local,
            options,
            locks: KeyedLocks::new(),
            sweep_lock: Mutex::new(()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn is_local_only(&self) -> bool {
        self.remote.is_none()
    }

    // ------------------------------------------------------------------
    // Deadline-bounded backend calls
    // ------------------------------------------------------------------

    async fn remote_put(&self, remote: &dyn Backend, key: &str, value: &[u8]) -> StoreResult<()> {
        with_deadline(key, self.options.remote_timeout, remote.put(key, value)).await
    }

    async fn remote_get(&self, remote: &dyn Backend, key: &str) -> StoreResult<Vec<u8>> {
        with_deadline(key, self.options.remote_timeout, remote.get(key)).await
    }

    async fn remote_delete(&self, remote: &dyn Backend, key: &str) -> StoreResult<()> {
        with_deadline(key, self.options.remote_timeout, remote.delete(key)).await
    }

    async fn local_put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        with_deadline(key, self.options.local_timeout, self.local.put(key, value)).await
    }

    async fn local_get(&self, key: &str) -> StoreResult<Vec<u8>> {
        with_deadline(key, self.options.local_timeout, self.local.get(key)).await
    }

    async fn local_delete(&self, key: &str) -> StoreResult<()> {
        with_deadline(key, self.options.local_timeout, self.local.delete(key)).await
    }

    // ------------------------------------------------------------------
    // Pending-sync side-table
    // ------------------------------------------------------------------

    /// Current marker for `key`; `None` only when the local backend reports
    /// no marker. A corrupt marker is treated as a pending put so the local
    /// copy keeps precedence.
    async fn marker(&self, key: &str) -> StoreResult<Option<PendingMarker>> {
        match self.local_get(&marker_key(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                tracing::warn!("⚠️ Unreadable pending-sync marker for {}: {}", key, e);
                self.assumed_put(key, format!("unreadable marker: {e}"))
            }))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn assumed_put(&self, key: &str, reason: String) -> PendingMarker {
        PendingMarker {
            key: key.to_string(),
            op: PendingOp::Put,
            reason: PendingReason::RemoteFailure,
            attempts: 0,
            first_marked_at: self.clock.now(),
            last_attempt_at: None,
            last_error: Some(reason),
        }
    }

    async fn write_marker(&self, marker: &PendingMarker) -> StoreResult<()> {
        let bytes = serde_json::to_vec(marker)
            .map_err(|e| StoreError::invalid_state(marker_key(&marker.key), e))?;
        self.local_put(&marker_key(&marker.key), &bytes).await
    }

    async fn mark_pending(
        &self,
        key: &str,
        op: PendingOp,
        reason: PendingReason,
        error: Option<String>,
    ) -> StoreResult<()> {
        let existing = self.marker(key).await.unwrap_or_else(|e| {
            tracing::warn!("⚠️ Replacing unreadable pending-sync marker for {}: {}", key, e);
            None
        });
        let marker = match existing {
            Some(existing) => PendingMarker {
                op,
                reason,
                last_error: error.or(existing.last_error),
                ..existing
            },
            None => PendingMarker {
                key: key.to_string(),
                op,
                reason,
                attempts: 0,
                first_marked_at: self.clock.now(),
                last_attempt_at: None,
                last_error: error,
            },
        };

        self.write_marker(&marker).await?;
        tracing::debug!("📌 Marked {} pending-sync ({:?}, {:?})", key, op, reason);
        Ok(())
    }

    async fn clear_marker(&self, key: &str) {
        if let Err(e) = self.local_delete(&marker_key(key)).await {
            tracing::warn!("⚠️ Failed to clear pending-sync marker for {}: {}", key, e);
        }
    }

    // ------------------------------------------------------------------
    // Logical store operations
    // ------------------------------------------------------------------

    /// Write remote first, mirror to local; on remote failure write local
    /// only and queue the key for reconciliation
    pub async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let _guard = self.locks.lock(key).await;

        let Some(remote) = self.remote.as_deref() else {
            return self.local_put(key, value).await;
        };

        match self.remote_put(remote, key, value).await {
            Ok(()) => {
                if let Err(e) = self.local_put(key, value).await {
                    tracing::warn!("⚠️ {} mirror write failed for {}: {}", self.local.name(), key, e);
                }
                self.clear_marker(key).await;
                tracing::debug!("💾 Stored {} in {} + {}", key, remote.name(), self.local.name());
                Ok(())
            }
            Err(remote_err) if self.options.local_fallback_enabled => {
                tracing::warn!(
                    "⚠️ {} write failed for {}, falling back to {}: {}",
                    remote.name(),
                    key,
                    self.local.name(),
                    remote_err
                );
                self.local_put(key, value).await.map_err(|local_err| {
                    tracing::error!("❌ Both backends failed to store {}: remote={}, local={}", key, remote_err, local_err);
                    local_err
                })?;
                self.mark_pending(key, PendingOp::Put, PendingReason::RemoteFailure, Some(remote_err.to_string()))
                    .await
            }
            Err(remote_err) => {
                tracing::error!("❌ {} write failed for {} (fallback disabled): {}", remote.name(), key, remote_err);
                Err(remote_err)
            }
        }
    }

    /// Durable local write, synced to the remote later
    ///
    /// Degrades to a full `put` when local fallback is disabled.
    pub async fn put_deferred(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        if self.remote.is_none() {
            let _guard = self.locks.lock(key).await;
            return self.local_put(key, value).await;
        }
        if !self.options.local_fallback_enabled {
            return self.put(key, value).await;
        }

        let _guard = self.locks.lock(key).await;
        self.local_put(key, value).await?;
        self.mark_pending(key, PendingOp::Put, PendingReason::Deferred, None).await?;
        tracing::debug!("🕒 Deferred remote write for {}", key);
        Ok(())
    }

    /// Read the newest value for `key`
    pub async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let Some(remote) = self.remote.as_deref() else {
            return self.local_get(key).await;
        };

        let marker = self.marker(key).await.unwrap_or_else(|e| {
            tracing::warn!("⚠️ Pending-sync state of {} unknown, preferring the {} copy: {}", key, self.local.name(), e);
            Some(self.assumed_put(key, e.to_string()))
        });
        if let Some(marker) = marker {
            if marker.op == PendingOp::Delete {
                return Err(StoreError::not_found(key));
            }
            match self.local_get(key).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => tracing::warn!(
                    "⚠️ Pending key {} unreadable from {}, trying {}: {}",
                    key,
                    self.local.name(),
                    remote.name(),
                    e
                ),
            }
        }

        match self.remote_get(remote, key).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.is_not_found() => Err(e),
            Err(e) if self.options.local_fallback_enabled => {
                tracing::warn!("⚠️ {} read failed for {}, serving {} copy: {}", remote.name(), key, self.local.name(), e);
                self.local_get(key).await
            }
            Err(e) => Err(e),
        }
    }

    /// Union of remote and local keys under `prefix`, sorted and deduplicated
    pub async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let local = with_deadline(prefix, self.options.local_timeout, self.local.list(prefix)).await;

        let remote = match self.remote.as_deref() {
            Some(remote) => Some(
                with_deadline(prefix, self.options.remote_timeout, remote.list(prefix)).await,
            ),
            None => None,
        };

        let mut keys = BTreeSet::new();
        let hide_markers = !prefix.starts_with(PENDING_PREFIX);

        match (local, remote) {
            (Err(e), None) => return Err(e),
            (Err(local_err), Some(Err(remote_err))) => {
                tracing::error!("❌ Both backends failed to list {}: remote={}, local={}", prefix, remote_err, local_err);
                return Err(local_err);
            }
            (local, remote) => {
                match local {
                    Ok(local_keys) => keys.extend(local_keys),
                    Err(e) => tracing::warn!("⚠️ Local list failed for {}: {}", prefix, e),
                }
                match remote {
                    Some(Ok(remote_keys)) => keys.extend(remote_keys),
                    Some(Err(e)) => tracing::warn!("⚠️ Remote list failed for {}, using {} keys: {}", prefix, self.local.name(), e),
                    None => {}
                }
            }
        }

        Ok(keys
            .into_iter()
            .filter(|key| !(hide_markers && key.starts_with(PENDING_PREFIX)))
            .collect())
    }

    /// Remove `key` from both backends; absent keys are fine
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        let _guard = self.locks.lock(key).await;

        let local_result = self.local_delete(key).await;

        let Some(remote) = self.remote.as_deref() else {
            return local_result;
        };

        match self.remote_delete(remote, key).await {
            Ok(()) => {
                if let Err(e) = &local_result {
                    tracing::warn!("⚠️ Local delete failed for {}: {}", key, e);
                }
                self.clear_marker(key).await;
                Ok(())
            }
            Err(remote_err) if self.options.local_fallback_enabled => {
                local_result.map_err(|local_err| {
                    tracing::error!("❌ Both backends failed to delete {}: remote={}, local={}", key, remote_err, local_err);
                    local_err
                })?;
                tracing::warn!("⚠️ {} delete failed for {}, queued for reconciliation: {}", remote.name(), key, remote_err);
                self.mark_pending(key, PendingOp::Delete, PendingReason::RemoteFailure, Some(remote_err.to_string()))
                    .await
            }
            Err(remote_err) => Err(remote_err),
        }
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Current pending-sync markers
    pub async fn pending(&self) -> StoreResult<Vec<PendingMarker>> {
        let mut keys = with_deadline(PENDING_PREFIX, self.options.local_timeout, self.local.list(PENDING_PREFIX)).await?;
        keys.sort();

        let mut markers = Vec::with_capacity(keys.len());
        for marker_key in keys {
            let Some(key) = marker_key.strip_prefix(PENDING_PREFIX) else {
                continue;
            };
            if let Some(marker) = self.marker(key).await? {
                markers.push(marker);
            }
        }
        Ok(markers)
    }

    /// Sweep unless another sweep is already running
    ///
    /// Returns `None` when the call was coalesced into the running sweep.
    pub async fn try_reconcile(&self, cancel: &CancellationToken) -> StoreResult<Option<ReconcileReport>> {
        let Ok(_running) = self.sweep_lock.try_lock() else {
            tracing::debug!("⏭️ Reconciliation already running, skipping");
            return Ok(None);
        };
        self.reconcile(cancel).await.map(Some)
    }

    /// Retry every pending remote operation
    ///
    /// Stops between keys when `cancel` fires; keys already synced stay
    /// synced. Failed keys stay queued with their attempt count bumped.
    pub async fn reconcile(&self, cancel: &CancellationToken) -> StoreResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let Some(remote) = self.remote.as_deref() else {
            return Ok(report);
        };

        let mut keys = with_deadline(PENDING_PREFIX, self.options.local_timeout, self.local.list(PENDING_PREFIX)).await?;
        keys.sort();

        if !keys.is_empty() {
            tracing::info!("🔄 Reconciling {} pending-sync keys", keys.len());
        }

        for marker_key in keys {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(key) = marker_key.strip_prefix(PENDING_PREFIX) else {
                continue;
            };

            report.attempted += 1;
            let synced = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    report.cancelled = true;
                    report.still_pending += 1;
                    break;
                }
                synced = self.reconcile_key(remote, key) => synced,
            };

            if synced {
                report.synced += 1;
            } else {
                report.still_pending += 1;
            }
        }

        tracing::info!(
            "✅ Reconciliation finished: {} attempted, {} synced, {} still pending{}",
            report.attempted,
            report.synced,
            report.still_pending,
            if report.cancelled { " (cancelled)" } else { "" }
        );
        Ok(report)
    }

    /// Sync one key; returns whether it is no longer pending
    async fn reconcile_key(&self, remote: &dyn Backend, key: &str) -> bool {
        let _guard = self.locks.lock(key).await;

        let marker = match self.marker(key).await {
            Ok(Some(marker)) => marker,
            // A concurrent write already synced it
            Ok(None) => return true,
            Err(e) => {
                tracing::warn!("⚠️ Pending-sync marker for {} unreadable, retrying later: {}", key, e);
                return false;
            }
        };

        let outcome = match marker.op {
            PendingOp::Put => match self.local_get(key).await {
                Ok(bytes) => self.remote_put(remote, key, &bytes).await,
                Err(e) => Err(e),
            },
            PendingOp::Delete => self.remote_delete(remote, key).await,
        };

        match outcome {
            Ok(()) => {
                self.clear_marker(key).await;
                tracing::debug!("✅ Reconciled {} ({:?})", key, marker.op);
                true
            }
            Err(e) => {
                let attempts = marker.attempts + 1;
                tracing::warn!("⚠️ Reconciliation of {} failed (attempt {}): {}", key, attempts, e);
                let updated = PendingMarker {
                    attempts,
                    last_attempt_at: Some(self.clock.now()),
                    last_error: Some(e.to_string()),
                    ..marker
                };
                if let Err(write_err) = self.write_marker(&updated).await {
                    tracing::warn!("⚠️ Could not record attempt for {}: {}", key, write_err);
                }
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::memory::{FaultMode, MemoryBackend};

    struct Fixture {
        remote: Arc<MemoryBackend>,
        local: Arc<MemoryBackend>,
        coordinator: StorageCoordinator,
    }

    fn fixture(fallback: bool) -> Fixture {
        let remote = Arc::new(MemoryBackend::new());
        let local = Arc::new(MemoryBackend::new());
        let coordinator = StorageCoordinator::new(
            Some(remote.clone() as Arc<dyn Backend>),
            local.clone() as Arc<dyn Backend>,
            CoordinatorOptions {
                remote_timeout: Duration::from_millis(50),
                local_timeout: Duration::from_millis(500),
                local_fallback_enabled: fallback,
            },
        );
        Fixture {
            remote,
            local,
            coordinator,
        }
    }

    #[tokio::test]
    async fn test_put_writes_remote_and_mirrors_local() {
        let f = fixture(true);
        f.coordinator.put("session/t/t.a.record", b"v1").await.unwrap();

        assert_eq!(f.remote.snapshot("session/t/t.a.record").unwrap(), b"v1");
        assert_eq!(f.local.snapshot("session/t/t.a.record").unwrap(), b"v1");
        assert!(f.coordinator.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_timeout_falls_back_and_marks_pending() {
        let f = fixture(true);
        f.remote.set_mode(FaultMode::Hang);

        f.coordinator.put("k", b"v").await.unwrap();

        assert_eq!(f.local.snapshot("k").unwrap(), b"v");
        let pending = f.coordinator.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "k");
        assert_eq!(pending[0].reason, PendingReason::RemoteFailure);
        assert!(pending[0].last_error.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_remote_failure_without_fallback_propagates() {
        let f = fixture(false);
        f.remote.set_mode(FaultMode::Unreachable);

        let err = f.coordinator.put("k", b"v").await.unwrap_err();
        assert!(err.is_transient());
        assert!(f.local.snapshot("k").is_none());
    }

    #[tokio::test]
    async fn test_get_serves_mirrored_copy_when_remote_down() {
        let f = fixture(true);
        f.coordinator.put("k", b"mirrored").await.unwrap();
        f.remote.set_mode(FaultMode::Unreachable);

        assert_eq!(f.coordinator.get("k").await.unwrap(), b"mirrored");
    }

    #[tokio::test]
    async fn test_get_missing_everywhere_is_not_found() {
        let f = fixture(true);
        f.remote.set_mode(FaultMode::Hang);
        assert!(f.coordinator.get("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_pending_key_prefers_newer_local_value() {
        let f = fixture(true);
        f.coordinator.put("k", b"old").await.unwrap();
        f.coordinator.put_deferred("k", b"new").await.unwrap();

        assert_eq!(f.remote.snapshot("k").unwrap(), b"old");
        assert_eq!(f.coordinator.get("k").await.unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_unreadable_marker_still_prefers_pending_local_value() {
        let f = fixture(true);
        f.coordinator.put("k", b"old").await.unwrap();
        f.coordinator.put_deferred("k", b"new").await.unwrap();
        f.local.set_mode_for(PENDING_PREFIX, FaultMode::Unreachable);

        assert_eq!(f.coordinator.get("k").await.unwrap(), b"new");

        f.local.set_mode_for(PENDING_PREFIX, FaultMode::Healthy);
        let pending = f.coordinator.pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reason, PendingReason::Deferred);
    }

    #[tokio::test]
    async fn test_marker_read_failure_fails_pending_listing() {
        let f = fixture(true);
        f.coordinator.put_deferred("k", b"v").await.unwrap();
        f.local.set_mode_for(PENDING_PREFIX, FaultMode::Unreachable);

        assert!(f.coordinator.pending().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_get_without_fallback_propagates_remote_error() {
        let f = fixture(false);
        f.coordinator.put("k", b"v").await.unwrap();
        assert_eq!(f.local.snapshot("k").unwrap(), b"v");

        f.remote.set_mode(FaultMode::Unreachable);
        assert_eq!(f.coordinator.get("k").await.unwrap_err().kind(), ErrorKind::Io);

        f.remote.set_mode(FaultMode::Hang);
        assert_eq!(f.coordinator.get("k").await.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_successful_put_clears_earlier_marker() {
        let f = fixture(true);
        f.coordinator.put_deferred("k", b"draft").await.unwrap();
        assert_eq!(f.coordinator.pending().await.unwrap().len(), 1);

        f.coordinator.put("k", b"final").await.unwrap();
        assert!(f.coordinator.pending().await.unwrap().is_empty());
        assert_eq!(f.remote.snapshot("k").unwrap(), b"final");
    }

    #[tokio::test]
    async fn test_list_merges_and_hides_markers() {
        let f = fixture(true);
        f.remote.put("session/t/a", b"1").await.unwrap();
        f.local.put("session/t/b", b"2").await.unwrap();
        f.coordinator.put("session/t/a", b"1").await.unwrap();
        f.coordinator.put_deferred("session/t/c", b"3").await.unwrap();

        let keys = f.coordinator.list("session/t/").await.unwrap();
        assert_eq!(keys, vec!["session/t/a", "session/t/b", "session/t/c"]);

        let everything = f.coordinator.list("").await.unwrap();
        assert!(everything.iter().all(|k| !k.starts_with(PENDING_PREFIX)));
    }

    #[tokio::test]
    async fn test_list_survives_remote_outage() {
        let f = fixture(true);
        f.coordinator.put("session/t/a", b"1").await.unwrap();
        f.remote.set_mode(FaultMode::Unreachable);

        assert_eq!(f.coordinator.list("session/").await.unwrap(), vec!["session/t/a"]);
    }

    #[tokio::test]
    async fn test_failed_remote_delete_hides_key_until_reconciled() {
        let f = fixture(true);
        f.coordinator.put("k", b"v").await.unwrap();
        f.remote.set_mode(FaultMode::Unreachable);

        f.coordinator.delete("k").await.unwrap();
        f.remote.set_mode(FaultMode::Healthy);

        assert!(f.coordinator.get("k").await.unwrap_err().is_not_found());
        assert!(f.remote.snapshot("k").is_some());

        let report = f.coordinator.reconcile(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(f.remote.snapshot("k").is_none());
        assert!(f.coordinator.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_keeps_failing_keys_and_counts_attempts() {
        let f = fixture(true);
        f.remote.set_mode(FaultMode::Unreachable);
        f.coordinator.put("k", b"v").await.unwrap();

        for _ in 0..3 {
            let report = f.coordinator.reconcile(&CancellationToken::new()).await.unwrap();
            assert_eq!(report.still_pending, 1);
        }

        let pending = f.coordinator.pending().await.unwrap();
        assert_eq!(pending[0].attempts, 3);
        assert!(pending[0].last_attempt_at.is_some());

        f.remote.set_mode(FaultMode::Healthy);
        let report = f.coordinator.reconcile(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(f.remote.snapshot("k").unwrap(), b"v");
    }

    #[tokio::test]
    async fn test_cancelled_reconcile_leaves_queue_intact() {
        let f = fixture(true);
        f.remote.set_mode(FaultMode::Unreachable);
        f.coordinator.put("a", b"1").await.unwrap();
        f.coordinator.put("b", b"2").await.unwrap();
        f.remote.set_mode(FaultMode::Healthy);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = f.coordinator.reconcile(&cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.synced, 0);
        assert_eq!(f.coordinator.pending().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_sweeps_are_coalesced() {
        let f = fixture(true);
        let _running = f.coordinator.sweep_lock.lock().await;
        let report = f.coordinator.try_reconcile(&CancellationToken::new()).await.unwrap();
        assert!(report.is_none());
    }

    #[tokio::test]
    async fn test_local_only_mode_never_marks() {
        let local = Arc::new(MemoryBackend::new());
        let coordinator = StorageCoordinator::new(None, local.clone(), CoordinatorOptions::default());

        coordinator.put_deferred("k", b"v").await.unwrap();
        assert_eq!(coordinator.get("k").await.unwrap(), b"v");
        assert!(coordinator.pending().await.unwrap().is_empty());
        assert_eq!(local.len(), 1);
    }
}
