//! Enhanced cache layer: entry model, aggregate metadata, legacy-format
//! migration, and the manager orchestrating them over a [`KeyValueStore`].
//!
//! [`KeyValueStore`]: crate::storage::KeyValueStore

mod entry;
mod manager;
mod metadata;
mod migration;

pub use entry::{
    approximate_size, validate_raw_entry, CacheEntry, CachePriority, CacheWriteConfig,
    CACHE_ENTRY_VERSION,
};
pub use manager::{
    AlwaysOnline, CacheManager, ConnectivityProbe, CACHE_KEY_PREFIX, CACHE_METADATA_KEY,
    INTERNAL_KEYS,
};
pub use metadata::{
    CacheHealthReport, CacheMetadata, CacheMigrationOutcome, CacheRepairOutcome, CacheStatistics,
};
pub use migration::LegacyKeyKind;
