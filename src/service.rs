/// Context service
///
/// Single entry point for callers: composes the session store, the
/// documentation cache and the storage coordinator underneath them.
/// `ContextService::open` wires everything from a `Config`; `new` takes
/// pre-built collaborators.

use crate::cache::{
    CacheStats, DisabledResolver, DocCache, DocResolver, HttpDocResolver, PrefetchReport,
};
use crate::config::Config;
use crate::error::StoreResult;
use crate::session::{
    Checkpoint, SessionKey, SessionMutation, SessionRecord, SessionStore, SessionSummary,
};
use crate::storage::{
    Backend, CoordinatorOptions, LocalFsBackend, PendingMarker, PostgresBackend, ReconcileReport,
    StorageCoordinator,
};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;

/// Validation history entries kept in `state.validation.history`
pub const VALIDATION_HISTORY_LIMIT: usize = 50;

/// How serious a validation finding is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Error,
    Warning,
    Info,
}

/// One finding of an external validator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    #[serde(default)]
    pub severity: Severity,
    pub message: String,
    /// Node the finding refers to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<String>,
    /// Cache key of the documentation that explains the fix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_key: Option<String>,
}

/// Validator output recorded against a session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationResult {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    /// The validated workflow draft; replaces `state.workflow` when present
    pub workflow: Option<Value>,
    pub token_usage_delta: u64,
    pub cost_delta: f64,
}

/// Updated record plus the documentation the issues point at
#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub record: SessionRecord,
    /// docKey → cached payload
    pub documentation: BTreeMap<String, Value>,
    /// docKeys with no fresh cache entry
    pub missing_documentation: Vec<String>,
}

/// What the assistant should do next in a resumed session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextStepHint {
    pub step_index: u32,
    pub estimated_steps: u32,
    pub progress: f64,
    /// Messages of outstanding error-severity issues
    pub outstanding_errors: Vec<String>,
    pub message: String,
}

impl NextStepHint {
    pub fn for_record(record: &SessionRecord) -> Self {
        let outstanding_errors = outstanding_errors(&record.state);
        let next_step = record.step_index.saturating_add(1);

        let message = if let Some(first) = outstanding_errors.first() {
            format!(
                "Fix {} outstanding validation error(s) before continuing: {}",
                outstanding_errors.len(),
                first
            )
        } else if record.estimated_steps > 0 && record.step_index >= record.estimated_steps {
            format!(
                "All {} planned steps are done; validate and checkpoint the workflow",
                record.estimated_steps
            )
        } else if record.estimated_steps > 0 {
            format!("Continue with step {} of {}", next_step, record.estimated_steps)
        } else {
            format!("Continue with step {}", next_step)
        };

        Self {
            step_index: record.step_index,
            estimated_steps: record.estimated_steps,
            progress: record.progress(),
            outstanding_errors,
            message,
        }
    }
}

/// Error-severity issues under `state.validation.issues`; issues without a
/// severity count as errors
fn outstanding_errors(state: &Value) -> Vec<String> {
    state
        .pointer("/validation/issues")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|issue| issue.get("severity").and_then(Value::as_str).map_or(true, |s| s == "error"))
        .map(|issue| {
            let message = issue.get("message").and_then(Value::as_str).unwrap_or("unspecified error");
            match issue.get("node").and_then(Value::as_str) {
                Some(node) => format!("{node}: {message}"),
                None => message.to_string(),
            }
        })
        .collect()
}

/// A session as returned on resume
#[derive(Debug, Clone, Serialize)]
pub struct ResumedSession {
    pub record: SessionRecord,
    pub next_step: NextStepHint,
}

/// Façade over sessions, documentation cache and sync state
pub struct ContextService {
    sessions: SessionStore,
    cache: DocCache,
    resolver: Arc<dyn DocResolver>,
    /// Parent of every prefetch and reconciliation cancel token
    shutdown: CancellationToken,
}

impl ContextService {
    pub fn new(sessions: SessionStore, cache: DocCache, resolver: Arc<dyn DocResolver>) -> Self {
        Self {
            sessions,
            cache,
            resolver,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the full stack from configuration
    ///
    /// The remote store is only configured when a database URL is present;
    /// it connects lazily, so an unreachable database does not block startup.
    pub async fn open(config: &Config) -> Result<Self> {
        tracing::info!("🗄️ Opening local store at {}", config.storage.data_dir);
        let local: Arc<dyn Backend> = Arc::new(LocalFsBackend::new(&config.storage.data_dir).await?);

        let remote: Option<Arc<dyn Backend>> = match &config.storage.database_url {
            Some(url) => {
                tracing::info!("🌐 Remote store configured (PostgreSQL)");
                Some(Arc::new(PostgresBackend::connect_lazy(url, config.storage.remote_timeout())?))
            }
            None => {
                tracing::info!("📴 No remote store configured, running local-only");
                None
            }
        };

        let storage = Arc::new(StorageCoordinator::new(
            remote,
            Arc::clone(&local),
            CoordinatorOptions::from(&config.storage),
        ));
        let sessions = SessionStore::new(storage, config.session.clone());

        let cache = DocCache::new(&config.cache).with_persistence(local, config.storage.local_timeout());
        match cache.warm().await {
            Ok(count) => tracing::info!("📚 Documentation cache warmed ({} entries)", count),
            Err(e) => tracing::warn!("⚠️ Could not warm documentation cache: {}", e),
        }

        let resolver: Arc<dyn DocResolver> = match &config.cache.docs_base_url {
            Some(url) => Arc::new(HttpDocResolver::new(url, config.cache.docs_timeout())?),
            None => Arc::new(DisabledResolver),
        };

        Ok(Self::new(sessions, cache, resolver))
    }

    pub fn storage(&self) -> Arc<StorageCoordinator> {
        Arc::clone(self.sessions.storage())
    }

    pub fn cache(&self) -> &DocCache {
        &self.cache
    }

    /// Token background jobs should stop on
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel in-flight prefetches and reconciliation sweeps
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn start_session(
        &self,
        tenant: Option<&str>,
        name: &str,
        intent: &str,
        estimated_steps: u32,
    ) -> StoreResult<SessionKey> {
        self.sessions.create_session(tenant, name, intent, estimated_steps).await
    }

    pub async fn resume_session(&self, session_key: &str) -> StoreResult<ResumedSession> {
        let record = self.sessions.get_session(session_key).await?;
        let next_step = NextStepHint::for_record(&record);
        Ok(ResumedSession { record, next_step })
    }

    pub async fn update_session(&self, session_key: &str, mutation: SessionMutation) -> StoreResult<SessionRecord> {
        self.sessions.update_session(session_key, mutation).await
    }

    /// Record a validator run and gather the documentation its issues cite
    pub async fn record_validation(
        &self,
        session_key: &str,
        result: ValidationResult,
    ) -> StoreResult<ValidationOutcome> {
        let at = self.sessions.now();

        let record = self
            .sessions
            .modify(session_key, |record| {
                apply_validation(&mut record.state, &result, at);
                SessionMutation {
                    validation_event: true,
                    token_usage_delta: result.token_usage_delta,
                    cost_delta: result.cost_delta,
                    ..Default::default()
                }
                .apply_to(record);
                Ok(())
            })
            .await?;

        let mut documentation = BTreeMap::new();
        let mut missing_documentation = Vec::new();
        for doc_key in result.issues.iter().filter_map(|issue| issue.doc_key.as_deref()) {
            if documentation.contains_key(doc_key) || missing_documentation.iter().any(|k| k == doc_key) {
                continue;
            }
            match self.cache.get(doc_key).await {
                Some(payload) => {
                    documentation.insert(doc_key.to_string(), payload);
                }
                None => missing_documentation.push(doc_key.to_string()),
            }
        }

        tracing::info!(
            "🧪 Validation {} recorded for {} ({} issues, {} docs cached, {} missing)",
            record.validation_count,
            session_key,
            result.issues.len(),
            documentation.len(),
            missing_documentation.len()
        );

        Ok(ValidationOutcome {
            record,
            documentation,
            missing_documentation,
        })
    }

    pub async fn checkpoint(&self, session_key: &str, label: &str) -> StoreResult<Checkpoint> {
        self.sessions.checkpoint(session_key, label).await
    }

    pub async fn list_sessions(&self, tenant: Option<&str>) -> Vec<SessionSummary> {
        self.sessions.list_sessions(tenant).await
    }

    pub async fn delete_session(&self, session_key: &str) -> StoreResult<()> {
        self.sessions.delete_session(session_key).await
    }

    // ------------------------------------------------------------------
    // Documentation cache
    // ------------------------------------------------------------------

    pub async fn cache_get(&self, cache_key: &str) -> Option<Value> {
        self.cache.get(cache_key).await
    }

    pub async fn cache_put(&self, cache_key: &str, payload: Value) -> StoreResult<()> {
        self.cache.put(cache_key, payload).await
    }

    pub async fn cache_pin(&self, cache_key: &str) -> StoreResult<()> {
        self.cache.pin(cache_key).await
    }

    pub async fn cache_unpin(&self, cache_key: &str) -> StoreResult<()> {
        self.cache.unpin(cache_key).await
    }

    /// Number of documents fetched for the keywords
    pub async fn prefetch(&self, keywords: &[String]) -> usize {
        self.prefetch_with_report(keywords).await.prefetched
    }

    pub async fn prefetch_with_report(&self, keywords: &[String]) -> PrefetchReport {
        let cancel = self.shutdown.child_token();
        self.cache.prefetch(keywords, self.resolver.as_ref(), &cancel).await
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub async fn cache_clear(&self) {
        self.cache.clear().await
    }

    // ------------------------------------------------------------------
    // Sync inspection
    // ------------------------------------------------------------------

    pub async fn pending_sync(&self) -> StoreResult<Vec<PendingMarker>> {
        self.sessions.storage().pending().await
    }

    /// Run a reconciliation sweep; `None` when one is already running
    pub async fn reconcile(&self) -> StoreResult<Option<ReconcileReport>> {
        let cancel = self.shutdown.child_token();
        self.sessions.storage().try_reconcile(&cancel).await
    }
}

/// Fold a validator run into `state.validation`, and into
/// `state.workflow` when the run carries the validated draft
fn apply_validation(state: &mut Value, result: &ValidationResult, at: chrono::DateTime<chrono::Utc>) {
    let Some(state) = state.as_object_mut() else {
        return;
    };

    if let Some(workflow) = &result.workflow {
        state.insert("workflow".to_string(), workflow.clone());
    }

    let validation = state
        .entry("validation")
        .or_insert_with(|| Value::Object(Map::new()));
    if !validation.is_object() {
        *validation = Value::Object(Map::new());
    }
    let Some(validation) = validation.as_object_mut() else {
        return;
    };

    let count = |severity: Severity| result.issues.iter().filter(|i| i.severity == severity).count();
    let summary = json!({
        "at": at,
        "valid": result.valid,
        "errors": count(Severity::Error),
        "warnings": count(Severity::Warning),
    });

    let history = validation
        .entry("history")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !history.is_array() {
        *history = Value::Array(Vec::new());
    }
    if let Some(history) = history.as_array_mut() {
        history.push(summary);
        let excess = history.len().saturating_sub(VALIDATION_HISTORY_LIMIT);
        history.drain(..excess);
    }

    validation.insert(
        "issues".to_string(),
        serde_json::to_value(&result.issues).unwrap_or_else(|_| Value::Array(Vec::new())),
    );
}
