/// Local filesystem backend
///
/// One file per key, one directory per namespace segment:
/// `session/acme/acme.alerts.record` lives at
/// `{base_dir}/session/acme/acme.alerts.record`.
/// Writes go through a temp file in the same directory, fsync, then rename,
/// so a crash never leaves a half-written record behind.

use crate::error::{StoreError, StoreResult};
use crate::storage::backend::{key_segments, Backend};
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};

/// Suffix of in-flight temp files; never reported by `list`
const TEMP_SUFFIX: &str = ".tmp";

/// Filesystem-backed store rooted at a base directory
#[derive(Debug, Clone)]
pub struct LocalFsBackend {
    base_dir: PathBuf,
}

impl LocalFsBackend {
    /// Create the backend, ensuring the base directory exists
    pub async fn new(base_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| StoreError::io(base_dir.display().to_string(), e))?;

        tracing::info!("🗄️ Local store ready at {}", base_dir.display());
        Ok(Self { base_dir })
    }

    fn path_for(&self, key: &str) -> StoreResult<PathBuf> {
        let mut path = self.base_dir.clone();
        for segment in key_segments(key)? {
            path.push(segment);
        }
        Ok(path)
    }

    async fn write_atomic(&self, key: &str, path: &Path, value: &[u8]) -> std::io::Result<()> {
        let parent = path.parent().unwrap_or(self.base_dir.as_path());
        fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| key.replace('/', "_"));
        let tmp_path = parent.join(format!(".{}.{}{}", file_name, uuid::Uuid::new_v4(), TEMP_SUFFIX));

        let mut tmp_file = fs::File::create(&tmp_path).await?;
        let written = async {
            tmp_file.write_all(value).await?;
            tmp_file.sync_all().await
        }
        .await;
        drop(tmp_file);

        if let Err(e) = written {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e);
        }
        Ok(())
    }

    /// Directory to start walking from for `prefix`: the deepest complete
    /// namespace the prefix names
    fn walk_root(&self, prefix: &str) -> PathBuf {
        let mut root = self.base_dir.clone();
        if let Some((dirs, _)) = prefix.rsplit_once('/') {
            for segment in dirs.split('/') {
                if segment.is_empty() || segment == "." || segment == ".." {
                    return self.base_dir.clone();
                }
                root.push(segment);
            }
        }
        root
    }

    fn key_for(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.base_dir).ok()?;
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl Backend for LocalFsBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn put(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let path = self.path_for(key)?;
        self.write_atomic(key, &path, value)
            .await
            .map_err(|e| StoreError::io(key, e))
    }

    async fn get(&self, key: &str) -> StoreResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::not_found(key)),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![self.walk_root(prefix)];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(StoreError::io(prefix, e)),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StoreError::io(prefix, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StoreError::io(prefix, e))?;

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }

                let name = entry.file_name().to_string_lossy().into_owned();
                if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                    continue;
                }

                if let Some(key) = self.key_for(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }

        Ok(keys)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::io(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip_creates_namespace_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path()).await.unwrap();

        backend.put("session/acme/acme.alerts.record", b"{}").await.unwrap();

        assert!(tmp.path().join("session/acme/acme.alerts.record").is_file());
        assert_eq!(backend.get("session/acme/acme.alerts.record").await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_get_missing_key_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path()).await.unwrap();

        let err = backend.get("cache/nodes.slack.entry").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_filters_by_prefix_and_skips_temp_files() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path()).await.unwrap();

        backend.put("session/acme/acme.a.record", b"1").await.unwrap();
        backend.put("session/acme/acme.b.record", b"2").await.unwrap();
        backend.put("session/other/other.c.record", b"3").await.unwrap();
        backend.put("cache/nodes.slack.entry", b"4").await.unwrap();
        std::fs::write(tmp.path().join("session/acme/.acme.a.record.123.tmp"), b"x").unwrap();

        let mut keys = backend.list("session/acme/").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session/acme/acme.a.record", "session/acme/acme.b.record"]);

        let mut all_sessions = backend.list("session/").await.unwrap();
        all_sessions.sort();
        assert_eq!(all_sessions.len(), 3);

        assert!(backend.list("nothing-here/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path()).await.unwrap();

        backend.put("pending-sync/session/acme/acme.a.record", b"m").await.unwrap();
        backend.delete("pending-sync/session/acme/acme.a.record").await.unwrap();
        backend.delete("pending-sync/session/acme/acme.a.record").await.unwrap();

        assert!(backend
            .get("pending-sync/session/acme/acme.a.record")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path()).await.unwrap();

        backend.put("k/v", b"first").await.unwrap();
        backend.put("k/v", b"second").await.unwrap();

        assert_eq!(backend.get("k/v").await.unwrap(), b"second");
        assert_eq!(backend.list("k/").await.unwrap(), vec!["k/v"]);
    }

    #[tokio::test]
    async fn test_invalid_keys_never_touch_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = LocalFsBackend::new(tmp.path()).await.unwrap();

        assert!(backend.put("../escape", b"x").await.is_err());
        assert!(backend.get("a/../../b").await.is_err());
    }
}
