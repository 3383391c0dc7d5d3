/// Configuration management for flowkeep
///
/// Handles server binding, storage backends, session auto-save policy and
/// documentation cache sizing. `Config::default()` honours `FLOWKEEP_*`
/// environment variables for container deployment; the section types expose
/// plain defaults for embedding the library directly.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Remote/local backend configuration
    pub storage: StorageConfig,
    /// Session store policy
    pub session: SessionConfig,
    /// Documentation cache sizing
    pub cache: CacheConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Backend configuration for the dual-backend coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base directory of the local filesystem store
    /// Creates: session/{tenant}/..., cache/..., pending-sync/...
    pub data_dir: String,
    /// PostgreSQL URL of the remote store; `None` runs local-only
    pub database_url: Option<String>,
    /// Deadline for each remote backend call
    pub remote_timeout_ms: u64,
    /// Deadline for each local backend call
    pub local_timeout_ms: u64,
    /// Fall back to the local store when the remote fails
    pub local_fallback_enabled: bool,
    /// Cron expression (with seconds) for the background reconciliation sweep
    pub reconcile_schedule: String,
}

/// Session store policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Full write-through after this many validation events (0 disables)
    pub auto_save_every_n_validations: u32,
    /// Number of auto-save checkpoints kept per session
    pub checkpoint_retention: usize,
    /// Upper bound on the serialized size of a session's state
    pub max_state_bytes: u64,
    /// Tenant used when the caller supplies none
    pub default_tenant: String,
}

/// Documentation cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entry time-to-live in seconds
    pub ttl_secs: u64,
    /// Budget for the sum of serialized payload sizes
    pub size_budget_bytes: u64,
    /// Base URL documentation is fetched from during prefetch
    pub docs_base_url: Option<String>,
    /// Deadline for a single documentation fetch
    pub docs_timeout_ms: u64,
}

impl StorageConfig {
    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn local_timeout(&self) -> Duration {
        Duration::from_millis(self.local_timeout_ms)
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn docs_timeout(&self) -> Duration {
        Duration::from_millis(self.docs_timeout_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            database_url: None,
            remote_timeout_ms: 5_000,
            local_timeout_ms: 5_000,
            local_fallback_enabled: true,
            reconcile_schedule: "0 * * * * *".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_save_every_n_validations: 3,
            checkpoint_retention: 20,
            max_state_bytes: 8 * 1024 * 1024,
            default_tenant: "default".to_string(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 7 * 24 * 60 * 60,
            size_budget_bytes: 100 * 1024 * 1024,
            docs_base_url: None,
            docs_timeout_ms: 10_000,
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        let storage = StorageConfig::default();
        let session = SessionConfig::default();
        let cache = CacheConfig::default();

        Self {
            server: ServerConfig {
                host: std::env::var("FLOWKEEP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: env_or("FLOWKEEP_PORT", 3005),
            },
            storage: StorageConfig {
                data_dir: std::env::var("FLOWKEEP_DATA_DIR").unwrap_or(storage.data_dir),
                database_url: std::env::var("FLOWKEEP_DATABASE_URL")
                    .ok()
                    .filter(|url| !url.trim().is_empty()),
                remote_timeout_ms: env_or("FLOWKEEP_REMOTE_TIMEOUT_MS", storage.remote_timeout_ms),
                local_timeout_ms: env_or("FLOWKEEP_LOCAL_TIMEOUT_MS", storage.local_timeout_ms),
                local_fallback_enabled: env_or(
                    "FLOWKEEP_LOCAL_FALLBACK",
                    storage.local_fallback_enabled,
                ),
                reconcile_schedule: std::env::var("FLOWKEEP_RECONCILE_SCHEDULE")
                    .unwrap_or(storage.reconcile_schedule),
            },
            session: SessionConfig {
                auto_save_every_n_validations: env_or(
                    "FLOWKEEP_AUTOSAVE_EVERY",
                    session.auto_save_every_n_validations,
                ),
                checkpoint_retention: env_or(
                    "FLOWKEEP_CHECKPOINT_RETENTION",
                    session.checkpoint_retention,
                ),
                max_state_bytes: env_or("FLOWKEEP_MAX_STATE_BYTES", session.max_state_bytes),
                default_tenant: std::env::var("FLOWKEEP_DEFAULT_TENANT")
                    .unwrap_or(session.default_tenant),
            },
            cache: CacheConfig {
                ttl_secs: env_or("FLOWKEEP_CACHE_TTL_SECS", cache.ttl_secs),
                size_budget_bytes: env_or("FLOWKEEP_CACHE_BUDGET_BYTES", cache.size_budget_bytes),
                docs_base_url: std::env::var("FLOWKEEP_DOCS_BASE_URL")
                    .ok()
                    .filter(|url| !url.trim().is_empty()),
                docs_timeout_ms: env_or("FLOWKEEP_DOCS_TIMEOUT_MS", cache.docs_timeout_ms),
            },
        }
    }
}

/// Parse an environment variable, keeping `fallback` when unset or malformed
fn env_or<T: std::str::FromStr>(name: &str, fallback: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring malformed {}={:?}", name, raw);
            fallback
        }),
        Err(_) => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_defaults_match_documented_values() {
        let session = SessionConfig::default();
        assert_eq!(session.auto_save_every_n_validations, 3);
        assert_eq!(session.default_tenant, "default");

        let cache = CacheConfig::default();
        assert_eq!(cache.ttl(), Duration::from_secs(604_800));
        assert_eq!(cache.size_budget_bytes, 104_857_600);

        let storage = StorageConfig::default();
        assert_eq!(storage.remote_timeout(), Duration::from_secs(5));
        assert!(storage.local_fallback_enabled);
        assert!(storage.database_url.is_none());
    }

    #[test]
    fn test_env_or_falls_back_on_garbage() {
        std::env::set_var("FLOWKEEP_TEST_ENV_OR_GARBAGE", "not-a-number");
        assert_eq!(env_or("FLOWKEEP_TEST_ENV_OR_GARBAGE", 7u32), 7);

        std::env::set_var("FLOWKEEP_TEST_ENV_OR_VALUE", " 42 ");
        assert_eq!(env_or("FLOWKEEP_TEST_ENV_OR_VALUE", 7u32), 42);

        assert!(env_or("FLOWKEEP_TEST_ENV_OR_UNSET", true));
    }
}
