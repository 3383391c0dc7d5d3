/// Session type definitions
///
/// Session records are stored as JSON under
/// `session/{tenant}/{sessionKey}.record` in both backends. The `state`
/// payload is opaque to this crate apart from two well-known paths:
/// `workflow.nodes` (auto-save on node changes) and `validation.issues`
/// (outstanding issues for resume hints).

use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Current on-disk record format
pub const RECORD_VERSION: u32 = 1;

/// Stable identifier of a session: `{tenantPart}.{namePart}`
///
/// A part is the raw value itself when it already is a canonical slug
/// (`[a-z0-9]` runs joined by single dashes). Any other value becomes its
/// slug followed by `--` and a digest of the raw text, so distinct inputs
/// never share a key and the key alone names the tenant namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    tenant: String,
    name: String,
}

impl SessionKey {
    /// Derive the key for a (tenant, workflow name) pair; blank parts are
    /// rejected
    pub fn derive(tenant: &str, name: &str) -> StoreResult<Self> {
        Ok(Self {
            tenant: key_part(tenant, "tenant")?,
            name: key_part(name, "untitled")?,
        })
    }

    /// Parse an externally supplied key; malformed keys cannot exist
    pub fn parse(raw: &str) -> StoreResult<Self> {
        let (tenant, name) = raw
            .split_once('.')
            .ok_or_else(|| StoreError::not_found(raw))?;

        if !is_key_part(tenant) || !is_key_part(name) {
            return Err(StoreError::not_found(raw));
        }

        Ok(Self {
            tenant: tenant.to_string(),
            name: name.to_string(),
        })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Backend key of the record
    pub fn storage_key(&self) -> String {
        format!("session/{}/{}.record", self.tenant, self)
    }

    /// Backend prefix of every record of `tenant`
    pub fn tenant_prefix(tenant: &str) -> StoreResult<String> {
        Ok(format!("session/{}/", key_part(tenant, "tenant")?))
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tenant, self.name)
    }
}

/// Lowercase, collapse every non-alphanumeric run into a single `-`
pub fn slugify(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    let mut pending_dash = false;

    for ch in raw.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// Hex chars of the name digest kept in a key part
const DIGEST_LEN: usize = 16;

fn key_part(raw: &str, fallback: &str) -> StoreResult<String> {
    if raw.trim().is_empty() {
        return Err(StoreError::invalid_state(raw, "tenant and workflow name must not be blank"));
    }

    let slug = slugify(raw);
    if slug == raw {
        return Ok(slug);
    }

    // Canonical slugs never contain `--`, so suffixed parts cannot collide
    // with them
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, raw.as_bytes()).simple().to_string();
    let base = if slug.is_empty() { fallback } else { slug.as_str() };
    Ok(format!("{}--{}", base, &digest[..DIGEST_LEN]))
}

fn is_key_part(part: &str) -> bool {
    !part.is_empty()
        && !part.starts_with('-')
        && !part.ends_with('-')
        && part
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// One resumable workflow-authoring interaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub version: u32,
    pub session_key: String,
    pub tenant_id: String,
    /// Workflow name the session was started for
    pub name: String,
    /// Initial intent; shown as the session goal
    pub goal: String,
    /// Opaque draft, validation history and decisions
    pub state: Value,
    pub step_index: u32,
    pub estimated_steps: u32,
    pub validation_count: u32,
    /// `validation_count` at the last full write-through
    pub saved_validation_count: u32,
    pub token_usage: u64,
    pub estimated_cost: f64,
    pub checkpoints: Vec<Checkpoint>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Fresh record with the initial state scaffold
    pub fn new(
        key: &SessionKey,
        tenant_id: &str,
        name: &str,
        goal: &str,
        estimated_steps: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            version: RECORD_VERSION,
            session_key: key.to_string(),
            tenant_id: tenant_id.to_string(),
            name: name.to_string(),
            goal: goal.to_string(),
            state: serde_json::json!({
                "intent": goal,
                "workflow": { "nodes": [], "connections": {} },
                "validation": { "issues": [], "history": [] },
                "decisions": [],
            }),
            step_index: 0,
            estimated_steps,
            validation_count: 0,
            saved_validation_count: 0,
            token_usage: 0,
            estimated_cost: 0.0,
            checkpoints: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// stepIndex / estimatedSteps clamped to [0, 1]; 0 when no estimate
    pub fn progress(&self) -> f64 {
        if self.estimated_steps == 0 {
            return 0.0;
        }
        (f64::from(self.step_index) / f64::from(self.estimated_steps)).clamp(0.0, 1.0)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_key: self.session_key.clone(),
            name: self.name.clone(),
            goal: self.goal.clone(),
            progress: self.progress(),
            step_index: self.step_index,
            updated_at: self.updated_at,
        }
    }

    /// Decode stored bytes; anything malformed is `InvalidState`
    pub fn decode(storage_key: &str, bytes: &[u8]) -> StoreResult<Self> {
        let record: Self = serde_json::from_slice(bytes)
            .map_err(|e| StoreError::invalid_state(storage_key, e))?;

        if record.version > RECORD_VERSION {
            return Err(StoreError::invalid_state(
                storage_key,
                format!("unsupported record version {}", record.version),
            ));
        }
        if !record.state.is_object() {
            return Err(StoreError::invalid_state(storage_key, "state is not a JSON object"));
        }
        Ok(record)
    }

    pub fn encode(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::invalid_state(&self.session_key, e))
    }
}

/// How a checkpoint came to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Manual,
    Auto,
}

/// Immutable labeled snapshot of a session's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub label: String,
    pub kind: CheckpointKind,
    pub step_index: u32,
    pub snapshot_state: Value,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn capture(record: &SessionRecord, label: impl Into<String>, kind: CheckpointKind, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: label.into(),
            kind,
            step_index: record.step_index,
            snapshot_state: record.state.clone(),
            created_at: now,
        }
    }
}

/// Listing entry for a session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_key: String,
    pub name: String,
    pub goal: String,
    pub progress: f64,
    pub step_index: u32,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied partial update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionMutation {
    /// JSON merge patch (RFC 7396) applied to `state`
    pub state_patch: Option<Value>,
    pub step_index: Option<u32>,
    pub estimated_steps: Option<u32>,
    pub token_usage_delta: u64,
    pub cost_delta: f64,
    /// Counts as one validation event
    pub validation_event: bool,
}

impl SessionMutation {
    /// Apply to `record`; timestamps are the store's concern
    pub fn apply_to(&self, record: &mut SessionRecord) {
        if let Some(patch) = &self.state_patch {
            merge_patch(&mut record.state, patch);
        }
        if let Some(step_index) = self.step_index {
            record.step_index = step_index;
        }
        if let Some(estimated_steps) = self.estimated_steps {
            record.estimated_steps = estimated_steps;
        }

        if self.validation_event {
            record.validation_count = record.validation_count.saturating_add(1);
        }

        record.token_usage = record.token_usage.saturating_add(self.token_usage_delta);
        if self.cost_delta.is_finite() && self.cost_delta > 0.0 {
            record.estimated_cost += self.cost_delta;
        } else if self.cost_delta != 0.0 {
            tracing::warn!(
                "Ignoring non-monotonic cost delta {} for {}",
                self.cost_delta,
                record.session_key
            );
        }
    }
}

/// RFC 7396 JSON merge patch: objects merge recursively, `null` deletes,
/// anything else replaces
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };

    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// `state.workflow.nodes`, if present
pub fn workflow_nodes(state: &Value) -> Option<&Value> {
    state.get("workflow").and_then(|workflow| workflow.get("nodes"))
}
