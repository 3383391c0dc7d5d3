/// Session persistence
///
/// Resumable workflow-authoring sessions: record types, the auto-save
/// policy and the store that persists records through the storage
/// coordinator.

// Records, checkpoints, keys and mutations
pub mod types;

// Pure auto-save trigger decision
pub mod autosave;

// Keyed CRUD with auto-save and checkpoints
pub mod store;

pub use autosave::{AutoSavePolicy, AutoSaveReason};
pub use store::SessionStore;
pub use types::{
    merge_patch, Checkpoint, CheckpointKind, SessionKey, SessionMutation, SessionRecord, SessionSummary,
};
