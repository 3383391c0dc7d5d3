/// In-process backend with fault injection
///
/// Stands in for the remote store in tests and local development. The fault
/// mode can be flipped at runtime, for the whole store or for one key
/// prefix, to simulate an unreachable or hanging backend without touching
/// the coordinator.

use crate::error::{StoreError, StoreResult};
use crate::storage::backend::Backend;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

/// How the memory backend answers calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultMode {
    /// Behave like a working store
    #[default]
    Healthy,
    /// Fail every call immediately with an I/O error
    Unreachable,
    /// Never complete, so the caller's deadline fires
    Hang,
}

/// BTreeMap-backed store
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
    mode: Mutex<FaultMode>,
    /// Per-prefix overrides of `mode`; first match wins
    prefix_modes: Mutex<Vec<(String, FaultMode)>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_mode(&self, mode: FaultMode) {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner) = mode;
        tracing::debug!("🧪 Memory backend fault mode: {:?}", mode);
    }

    /// Override the fault mode for keys under `prefix`
    pub fn set_mode_for(&self, prefix: &str, mode: FaultMode) {
        let mut prefix_modes = self.prefix_modes.lock().unwrap_or_else(PoisonError::into_inner);
        prefix_modes.retain(|(existing, _)| existing != prefix);
        prefix_modes.push((prefix.to_string(), mode));
        tracing::debug!("🧪 Memory backend fault mode under {}: {:?}", prefix, mode);
    }

    pub fn mode(&self) -> FaultMode {
        *self.mode.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mode_for(&self, key: &str) -> FaultMode {
        self.prefix_modes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix.as_str()))
            .map_or_else(|| self.mode(), |(_, mode)| *mode)
    }

    /// Direct read that ignores the fault mode (test inspection)
    pub fn snapshot(&self, key: &str) -> Option<Vec<u8>> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn check(&self, key: &str) -> StoreResult<()> {
        match self.mode_for(key) {
            FaultMode::Healthy => Ok(()),
            FaultMode::Unreachable => Err(StoreError::io(key, "memory backend unreachable")),
            FaultMode::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check(key).await?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        self.check(key).await?;
        self.snapshot(key).ok_or_else(|| StoreError::not_found(key))
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check(prefix).await?;
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.check(key).await?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}
