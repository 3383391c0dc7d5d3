/// Backend adapter contract
///
/// A backend is one physical key/value store. It knows nothing about sessions,
/// cache semantics, retries or fallback; those live in the coordinator.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use std::{future::Future, time::Duration};

/// Uniform read/write/list/delete over one physical store
///
/// Keys are `/`-separated paths such as `session/acme/acme.alerts.record`.
/// Values are opaque bytes.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// Short name used in log lines ("postgres", "local", "memory")
    fn name(&self) -> &'static str;

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Fails with `NotFound` when the key is absent
    async fn get(&self, key: &str) -> StoreResult<Vec<u8>>;

    /// All keys starting with `prefix`, in no particular order
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Deleting an absent key succeeds
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Run a backend call under a deadline, mapping expiry to `Timeout`
pub async fn with_deadline<T, F>(key: &str, limit: Duration, call: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::timeout(key, limit)),
    }
}

/// Validate a key and split it into path segments
///
/// Rejects empty keys, leading `/`, empty/`.`/`..` segments, backslashes and
/// NUL bytes, so a key can never escape the namespace it is stored under.
pub fn key_segments(key: &str) -> StoreResult<Vec<&str>> {
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || key.contains('\0') {
        return Err(StoreError::io(key, "invalid storage key"));
    }

    let segments: Vec<&str> = key.split('/').collect();
    if segments
        .iter()
        .any(|segment| segment.is_empty() || *segment == "." || *segment == "..")
    {
        return Err(StoreError::io(key, "invalid storage key segment"));
    }

    Ok(segments)
}
