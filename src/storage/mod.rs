/// Storage layer
///
/// Backend adapters for each physical store, the dual-backend coordinator that
/// makes them one logical store, and the background reconciliation of keys
/// the remote has not yet confirmed.

// Backend contract and key validation
pub mod backend;

// One file per key under a base directory
pub mod local;

// Hosted PostgreSQL key/value table
pub mod remote;

// In-process store with fault injection
pub mod memory;

// Per-key critical sections
pub mod locks;

// Remote-authoritative store with local fallback and pending-sync queue
pub mod coordinator;

// Cron-driven reconciliation sweeps
pub mod reconcile;

pub use backend::Backend;
pub use coordinator::{
    CoordinatorOptions, PendingMarker, PendingOp, PendingReason, ReconcileReport, StorageCoordinator,
};
pub use local::LocalFsBackend;
pub use memory::{FaultMode, MemoryBackend};
pub use remote::PostgresBackend;
