/// Session store
///
/// Keyed CRUD over session records on top of the storage coordinator.
/// Every read-modify-write runs under a per-session lock. Updates are written
/// locally and deferred to the remote store until the auto-save policy
/// fires, a checkpoint is taken, or reconciliation runs.

use crate::clock::{Clock, SystemClock};
use crate::config::SessionConfig;
use crate::error::{StoreError, StoreResult};
use crate::session::autosave::AutoSavePolicy;
use crate::session::types::{
    workflow_nodes, Checkpoint, CheckpointKind, SessionKey, SessionMutation, SessionRecord,
    SessionSummary,
};
use crate::storage::locks::KeyedLocks;
use crate::storage::StorageCoordinator;
use futures::stream::{self, StreamExt};
use std::sync::Arc;

/// Records loaded concurrently while listing
const LIST_CONCURRENCY: usize = 8;

/// Session persistence with auto-save and checkpoints
#[derive(Debug)]
pub struct SessionStore {
    storage: Arc<StorageCoordinator>,
    locks: KeyedLocks,
    policy: AutoSavePolicy,
    config: SessionConfig,
    clock: Arc<dyn Clock>,
}

impl SessionStore {
    pub fn new(storage: Arc<StorageCoordinator>, config: SessionConfig) -> Self {
        Self {
            storage,
            locks: KeyedLocks::new(),
            policy: AutoSavePolicy::new(config.auto_save_every_n_validations),
            config,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn storage(&self) -> &Arc<StorageCoordinator> {
        &self.storage
    }

    pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    fn tenant_or_default<'a>(&'a self, tenant: Option<&'a str>) -> &'a str {
        tenant.unwrap_or(&self.config.default_tenant)
    }

    /// Create a session; its key is derived from tenant and name
    pub async fn create_session(
        &self,
        tenant: Option<&str>,
        name: &str,
        intent: &str,
        estimated_steps: u32,
    ) -> StoreResult<SessionKey> {
        let tenant = self.tenant_or_default(tenant);
        let key = SessionKey::derive(tenant, name)?;
        let storage_key = key.storage_key();
        let _guard = self.locks.lock(&storage_key).await;

        match self.storage.get(&storage_key).await {
            Ok(bytes) => {
                // A corrupt record is reported, never overwritten
                SessionRecord::decode(&key.to_string(), &bytes)?;
                return Err(StoreError::already_exists(key.to_string()));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let record = SessionRecord::new(&key, tenant, name, intent, estimated_steps, self.clock.now());
        self.check_state(&key, &record)?;
        self.storage.put(&storage_key, &record.encode()?).await?;

        tracing::info!("🆕 Created session {} ({} estimated steps)", key, estimated_steps);
        Ok(key)
    }

    /// Load a session; malformed keys are `NotFound`
    pub async fn get_session(&self, raw_key: &str) -> StoreResult<SessionRecord> {
        let key = SessionKey::parse(raw_key)?;
        self.load(&key).await
    }

    async fn load(&self, key: &SessionKey) -> StoreResult<SessionRecord> {
        let bytes = self.storage.get(&key.storage_key()).await.map_err(|e| match e {
            StoreError::NotFound { .. } => StoreError::not_found(key.to_string()),
            other => other,
        })?;
        SessionRecord::decode(&key.to_string(), &bytes)
    }

    /// Apply a caller mutation
    pub async fn update_session(&self, raw_key: &str, mutation: SessionMutation) -> StoreResult<SessionRecord> {
        self.modify(raw_key, |record| {
            mutation.apply_to(record);
            Ok(())
        })
        .await
    }

    /// Read-modify-write under the session lock, then persist according to
    /// the auto-save policy
    pub(crate) async fn modify<F>(&self, raw_key: &str, change: F) -> StoreResult<SessionRecord>
    where
        F: FnOnce(&mut SessionRecord) -> StoreResult<()>,
    {
        let key = SessionKey::parse(raw_key)?;
        let storage_key = key.storage_key();
        let _guard = self.locks.lock(&storage_key).await;

        let current = self.load(&key).await?;
        let mut next = current.clone();
        change(&mut next)?;
        self.check_state(&key, &next)?;

        next.updated_at = self.clock.now();
        let nodes_changed = workflow_nodes(&current.state) != workflow_nodes(&next.state);
        let since_save = next.validation_count.saturating_sub(next.saved_validation_count);

        match self.policy.evaluate(since_save, nodes_changed) {
            Some(reason) => {
                next.saved_validation_count = next.validation_count;
                let checkpoint =
                    Checkpoint::capture(&next, format!("auto-save: {reason}"), CheckpointKind::Auto, next.updated_at);
                next.checkpoints.push(checkpoint);
                prune_auto_checkpoints(&mut next.checkpoints, self.config.checkpoint_retention);

                self.storage.put(&storage_key, &next.encode()?).await?;
                tracing::info!("💾 Auto-saved session {} ({})", key, reason);
            }
            None => {
                self.storage.put_deferred(&storage_key, &next.encode()?).await?;
                tracing::debug!("📝 Updated session {} (validation {})", key, next.validation_count);
            }
        }

        Ok(next)
    }

    /// Append a manual checkpoint and write through
    pub async fn checkpoint(&self, raw_key: &str, label: &str) -> StoreResult<Checkpoint> {
        let key = SessionKey::parse(raw_key)?;
        let storage_key = key.storage_key();
        let _guard = self.locks.lock(&storage_key).await;

        let mut record = self.load(&key).await?;
        let now = self.clock.now();
        let label = if label.trim().is_empty() { "checkpoint" } else { label.trim() };

        let checkpoint = Checkpoint::capture(&record, label, CheckpointKind::Manual, now);
        record.checkpoints.push(checkpoint.clone());
        record.saved_validation_count = record.validation_count;
        record.updated_at = now;

        self.storage.put(&storage_key, &record.encode()?).await?;

        tracing::info!("📍 Checkpoint '{}' for session {}", checkpoint.label, key);
        Ok(checkpoint)
    }

    /// Summaries of a tenant's sessions, most recently updated first
    ///
    /// Never fails: unreadable records are skipped and a failed listing
    /// yields an empty result.
    pub async fn list_sessions(&self, tenant: Option<&str>) -> Vec<SessionSummary> {
        let prefix = match SessionKey::tenant_prefix(self.tenant_or_default(tenant)) {
            Ok(prefix) => prefix,
            Err(e) => {
                tracing::warn!("⚠️ Not listing sessions: {}", e);
                return Vec::new();
            }
        };

        let keys = match self.storage.list(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!("⚠️ Failed to list sessions under {}: {}", prefix, e);
                return Vec::new();
            }
        };

        let storage = &self.storage;
        let mut summaries: Vec<SessionSummary> = stream::iter(keys.into_iter().filter(|key| key.ends_with(".record")))
            .map(|storage_key| async move {
                let loaded = storage.get(&storage_key).await;
                (storage_key, loaded)
            })
            .buffer_unordered(LIST_CONCURRENCY)
            .filter_map(|(storage_key, loaded)| async move {
                let bytes = match loaded {
                    Ok(bytes) => bytes,
                    Err(e) if e.is_not_found() => return None,
                    Err(e) => {
                        tracing::warn!("⚠️ Skipping unreadable session {}: {}", storage_key, e);
                        return None;
                    }
                };
                match SessionRecord::decode(&storage_key, &bytes) {
                    Ok(record) => Some(record.summary()),
                    Err(e) => {
                        tracing::warn!("⚠️ Skipping corrupt session {}: {}", storage_key, e);
                        None
                    }
                }
            })
            .collect()
            .await;

        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.session_key.cmp(&b.session_key))
        });
        summaries
    }

    /// Remove a session from both backends; absent sessions are fine
    pub async fn delete_session(&self, raw_key: &str) -> StoreResult<()> {
        let Ok(key) = SessionKey::parse(raw_key) else {
            tracing::debug!("Ignoring delete of malformed session key {:?}", raw_key);
            return Ok(());
        };
        let storage_key = key.storage_key();
        let _guard = self.locks.lock(&storage_key).await;

        self.storage.delete(&storage_key).await?;
        tracing::info!("🗑️ Deleted session {}", key);
        Ok(())
    }

    fn check_state(&self, key: &SessionKey, record: &SessionRecord) -> StoreResult<()> {
        if !record.state.is_object() {
            return Err(StoreError::invalid_state(key.to_string(), "state must be a JSON object"));
        }

        let size = serde_json::to_vec(&record.state)
            .map_err(|e| StoreError::invalid_state(key.to_string(), e))?
            .len() as u64;
        if size > self.config.max_state_bytes {
            return Err(StoreError::too_large(key.to_string(), size, self.config.max_state_bytes));
        }
        Ok(())
    }
}

/// Drop the oldest auto checkpoints beyond `retention`; manual ones stay
fn prune_auto_checkpoints(checkpoints: &mut Vec<Checkpoint>, retention: usize) {
    let autos = checkpoints
        .iter()
        .filter(|checkpoint| checkpoint.kind == CheckpointKind::Auto)
        .count();
    let mut excess = autos.saturating_sub(retention);

    checkpoints.retain(|checkpoint| {
        if excess > 0 && checkpoint.kind == CheckpointKind::Auto {
            excess -= 1;
            false
        } else {
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorKind;
    use crate::storage::{Backend, CoordinatorOptions, FaultMode, MemoryBackend};
    use chrono::{Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::time::Duration;

    struct Fixture {
        remote: Arc<MemoryBackend>,
        local: Arc<MemoryBackend>,
        clock: Arc<ManualClock>,
        store: SessionStore,
    }

    fn fixture_with(config: SessionConfig) -> Fixture {
        let remote = Arc::new(MemoryBackend::new());
        let local = Arc::new(MemoryBackend::new());
        let coordinator = StorageCoordinator::new(
            Some(remote.clone() as Arc<dyn Backend>),
            local.clone() as Arc<dyn Backend>,
            CoordinatorOptions {
                remote_timeout: Duration::from_millis(50),
                local_timeout: Duration::from_millis(500),
                local_fallback_enabled: true,
            },
        );
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = SessionStore::new(Arc::new(coordinator), config).with_clock(clock.clone());
        Fixture {
            remote,
            local,
            clock,
            store,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(SessionConfig::default())
    }

    fn remote_record(f: &Fixture, key: &SessionKey) -> Option<SessionRecord> {
        f.remote
            .snapshot(&key.storage_key())
            .map(|bytes| SessionRecord::decode("remote", &bytes).unwrap())
    }

    fn validation() -> SessionMutation {
        SessionMutation {
            validation_event: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_session_starts_at_zero() {
        let f = fixture();
        let key = f.store.create_session(Some("t1"), "wf1", "build alerting", 6).await.unwrap();

        let record = f.store.get_session(&key.to_string()).await.unwrap();
        assert_eq!(record.step_index, 0);
        assert_eq!(record.validation_count, 0);
        assert_eq!(record.estimated_steps, 6);
        assert_eq!(record.goal, "build alerting");
        assert!(record.checkpoints.is_empty());
        assert!(remote_record(&f, &key).is_some());
    }

    #[tokio::test]
    async fn test_missing_tenant_uses_default() {
        let f = fixture();
        let key = f.store.create_session(None, "wf", "goal", 1).await.unwrap();
        assert_eq!(key.tenant(), "default");

        let record = f.store.get_session(&key.to_string()).await.unwrap();
        assert_eq!(record.tenant_id, "default");

        let blank = f.store.create_session(Some("  "), "other", "goal", 1).await.unwrap_err();
        assert_eq!(blank.kind(), ErrorKind::InvalidState);
        assert!(f.store.list_sessions(Some("")).await.is_empty());
    }

    #[tokio::test]
    async fn test_non_ascii_tenant_is_isolated_from_default() {
        let f = fixture();
        f.store.create_session(None, "secret-flow", "goal", 1).await.unwrap();

        assert!(f.store.list_sessions(Some("客户")).await.is_empty());

        let key = f.store.create_session(Some("客户"), "wf", "goal", 1).await.unwrap();
        let listed = f.store.list_sessions(Some("客户")).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_key, key.to_string());

        let record = f.store.get_session(&key.to_string()).await.unwrap();
        assert_eq!(record.tenant_id, "客户");
        assert_eq!(f.store.list_sessions(None).await.len(), 1);
    }

    #[tokio::test]
    async fn test_names_that_slug_alike_are_separate_sessions() {
        let f = fixture();
        let mut keys = Vec::new();
        for name in ["報告", "請求", "wf.1", "wf-1"] {
            keys.push(f.store.create_session(Some("t1"), name, "goal", 1).await.unwrap());
        }

        for (key, name) in keys.iter().zip(["報告", "請求", "wf.1", "wf-1"]) {
            assert_eq!(f.store.get_session(&key.to_string()).await.unwrap().name, name);
        }
        assert_eq!(f.store.list_sessions(Some("t1")).await.len(), 4);

        let again = f.store.create_session(Some("t1"), "報告", "goal", 1).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::AlreadyExists);
    }

    #[tokio::test]
    async fn test_create_twice_is_already_exists() {
        let f = fixture();
        f.store.create_session(Some("t1"), "wf1", "goal", 3).await.unwrap();
        let err = f.store.create_session(Some("t1"), "wf1", "goal", 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(err.key(), "t1.wf1");
    }

    #[tokio::test]
    async fn test_corrupt_record_is_never_overwritten() {
        let f = fixture();
        let key = SessionKey::derive("t1", "wf1").unwrap();
        f.remote.put(&key.storage_key(), b"{broken").await.unwrap();

        let err = f.store.create_session(Some("t1"), "wf1", "goal", 3).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(f.remote.snapshot(&key.storage_key()).unwrap(), b"{broken");

        let err = f.store.get_session(&key.to_string()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_update_missing_session_never_creates() {
        let f = fixture();
        let err = f.store.update_session("t1.ghost", validation()).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.key(), "t1.ghost");
        assert!(f.local.is_empty());

        let err = f.store.checkpoint("t1.ghost", "label").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_third_validation_writes_through() {
        let f = fixture();
        let key = f.store.create_session(Some("t1"), "wf1", "build alerting", 6).await.unwrap();
        let raw = key.to_string();

        f.store.update_session(&raw, validation()).await.unwrap();
        f.store.update_session(&raw, validation()).await.unwrap();
        assert_eq!(remote_record(&f, &key).unwrap().validation_count, 0);
        assert_eq!(f.store.get_session(&raw).await.unwrap().validation_count, 2);

        let record = f.store.update_session(&raw, validation()).await.unwrap();
        assert_eq!(record.validation_count, 3);
        assert_eq!(record.saved_validation_count, 3);
        assert_eq!(record.checkpoints.len(), 1);
        assert_eq!(record.checkpoints[0].kind, CheckpointKind::Auto);

        let remote = remote_record(&f, &key).unwrap();
        assert_eq!(remote.validation_count, 3);
        assert!(f.store.storage().pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_node_change_triggers_auto_save() {
        let f = fixture();
        let key = f.store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap();

        let record = f
            .store
            .update_session(
                &key.to_string(),
                SessionMutation {
                    state_patch: Some(json!({ "workflow": { "nodes": [{ "name": "Slack" }] } })),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(record.checkpoints.len(), 1);
        let remote = remote_record(&f, &key).unwrap();
        assert_eq!(workflow_nodes(&remote.state), Some(&json!([{ "name": "Slack" }])));
    }

    #[tokio::test]
    async fn test_plain_update_is_deferred_but_durable_locally() {
        let f = fixture();
        let key = f.store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap();

        f.store
            .update_session(
                &key.to_string(),
                SessionMutation {
                    step_index: Some(2),
                    token_usage_delta: 50,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(remote_record(&f, &key).unwrap().step_index, 0);
        let local = SessionRecord::decode("local", &f.local.snapshot(&key.storage_key()).unwrap()).unwrap();
        assert_eq!(local.step_index, 2);
        assert_eq!(local.token_usage, 50);
        assert_eq!(f.store.storage().pending().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_state_is_not_persisted() {
        let f = fixture();
        let key = f.store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap();
        let raw = key.to_string();

        let err = f
            .store
            .update_session(
                &raw,
                SessionMutation {
                    state_patch: Some(json!([1, 2, 3])),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(f.store.get_session(&raw).await.unwrap().state.is_object());
    }

    #[tokio::test]
    async fn test_oversized_state_is_too_large() {
        let f = fixture_with(SessionConfig {
            max_state_bytes: 256,
            ..SessionConfig::default()
        });
        let key = f.store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap();

        let err = f
            .store
            .update_session(
                &key.to_string(),
                SessionMutation {
                    state_patch: Some(json!({ "blob": "x".repeat(512) })),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TooLarge);
    }

    #[tokio::test]
    async fn test_checkpoint_resets_auto_save_counter() {
        let f = fixture();
        let key = f.store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap();
        let raw = key.to_string();

        f.store.update_session(&raw, validation()).await.unwrap();
        f.store.update_session(&raw, validation()).await.unwrap();
        let checkpoint = f.store.checkpoint(&raw, "before refactor").await.unwrap();
        assert_eq!(checkpoint.kind, CheckpointKind::Manual);
        assert_eq!(remote_record(&f, &key).unwrap().validation_count, 2);

        let record = f.store.update_session(&raw, validation()).await.unwrap();
        assert_eq!(record.validation_count, 3);
        assert_eq!(record.checkpoints.len(), 1);
        assert_eq!(remote_record(&f, &key).unwrap().validation_count, 2);
    }

    #[tokio::test]
    async fn test_retention_prunes_only_auto_checkpoints() {
        let f = fixture_with(SessionConfig {
            auto_save_every_n_validations: 1,
            checkpoint_retention: 2,
            ..SessionConfig::default()
        });
        let key = f.store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap();
        let raw = key.to_string();

        f.store.checkpoint(&raw, "manual").await.unwrap();
        let mut record = None;
        for _ in 0..5 {
            record = Some(f.store.update_session(&raw, validation()).await.unwrap());
        }
        let record = record.unwrap();

        let kinds: Vec<CheckpointKind> = record.checkpoints.iter().map(|c| c.kind).collect();
        assert_eq!(kinds, vec![CheckpointKind::Manual, CheckpointKind::Auto, CheckpointKind::Auto]);
    }

    #[tokio::test]
    async fn test_list_orders_by_recency_and_skips_corrupt() {
        let f = fixture();
        f.store.create_session(Some("t1"), "older", "first", 2).await.unwrap();
        f.clock.advance(ChronoDuration::seconds(5));
        let newer = f.store.create_session(Some("t1"), "newer", "second", 2).await.unwrap();
        f.store.create_session(Some("t2"), "elsewhere", "other tenant", 2).await.unwrap();
        f.remote.put("session/t1/t1.broken.record", b"not json").await.unwrap();

        f.clock.advance(ChronoDuration::seconds(5));
        f.store
            .update_session(
                &newer.to_string(),
                SessionMutation {
                    step_index: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let summaries = f.store.list_sessions(Some("t1")).await;
        let keys: Vec<&str> = summaries.iter().map(|s| s.session_key.as_str()).collect();
        assert_eq!(keys, vec!["t1.newer", "t1.older"]);
        assert_eq!(summaries[0].progress, 0.5);
        assert_eq!(summaries[0].goal, "second");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let f = fixture();
        let key = f.store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap();
        let raw = key.to_string();

        f.store.delete_session(&raw).await.unwrap();
        f.store.delete_session(&raw).await.unwrap();
        f.store.delete_session("not a key").await.unwrap();

        assert!(f.store.get_session(&raw).await.unwrap_err().is_not_found());
        assert!(remote_record(&f, &key).is_none());
    }

    #[tokio::test]
    async fn test_unreachable_remote_serves_mirrored_record() {
        let f = fixture();
        let key = f.store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap();
        f.remote.set_mode(FaultMode::Unreachable);

        let record = f.store.get_session(&key.to_string()).await.unwrap();
        assert_eq!(record.session_key, "t1.wf1");
    }

    #[tokio::test]
    async fn test_concurrent_validations_are_not_lost() {
        let f = fixture_with(SessionConfig {
            auto_save_every_n_validations: 0,
            ..SessionConfig::default()
        });
        let store = Arc::new(f.store);
        let key = store.create_session(Some("t1"), "wf1", "goal", 4).await.unwrap().to_string();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.update_session(&key, validation()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get_session(&key).await.unwrap().validation_count, 10);
    }
}
