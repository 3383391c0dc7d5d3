/// flowkeep: durable session state and documentation caching for
/// workflow-authoring assistants
///
/// Sessions survive restarts through a dual-backend store (hosted PostgreSQL
/// authoritative, local filesystem as fallback and mirror) with an explicit
/// pending-sync queue. Documentation lookups are cached with TTL expiry,
/// LRU eviction under a size budget and keyword-driven prefetch.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// Time source abstraction
pub mod clock;

// Storage layer - backend adapters, dual-backend coordinator, reconciliation
pub mod storage;

// Session layer - records, auto-save policy, checkpoints
pub mod session;

// Documentation cache - TTL/LRU index, prefetch and resolvers
pub mod cache;

// Façade over sessions, cache and sync state
pub mod service;

// HTTP API layer - REST endpoints over the service
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{ErrorKind, StoreError, StoreResult};
pub use server::start_server;
pub use service::{ContextService, NextStepHint, ValidationIssue, ValidationResult};
pub use session::{SessionKey, SessionMutation, SessionRecord};
