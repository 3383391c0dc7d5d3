/// Documentation cache
///
/// Size-bounded TTL cache of documentation lookups with LRU eviction,
/// keyword-driven prefetch and best-effort persistence to the local store.

// Entry, stats and prefetch report types
pub mod entry;

// TTL + LRU index with persistence
pub mod store;

// Keyword table, resolvers and prefetch batches
pub mod prefetch;

pub use entry::{CacheEntry, CacheStats, PrefetchReport};
pub use prefetch::{DisabledResolver, DocResolver, HttpDocResolver, KeywordTable};
pub use store::DocCache;
