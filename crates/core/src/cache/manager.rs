//! Enhanced cache manager: TTL expiry, priority LRU eviction under quota
//! pressure, stale-while-revalidate reads, and self-healing against
//! corrupted persisted state.

use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::errors::{Error, Result, StorageError};
use crate::storage::KeyValueStore;

use super::entry::{
    approximate_size, validate_raw_entry, CacheEntry, CacheWriteConfig, CachePriority,
    CACHE_ENTRY_VERSION,
};
use super::metadata::{
    CacheHealthReport, CacheMetadata, CacheMigrationOutcome, CacheRepairOutcome, CacheStatistics,
};
use super::migration::LegacyKeyKind;

/// Namespace prefix for entry keys.
pub const CACHE_KEY_PREFIX: &str = "cache:";

/// Fixed key for the aggregate metadata blob.
pub const CACHE_METADATA_KEY: &str = "cache_metadata";

/// Keys owned by other subsystems sharing the same adapter. The legacy
/// migration must never claim these.
pub const INTERNAL_KEYS: &[&str] = &[
    CACHE_METADATA_KEY,
    "schedule_db_snapshot",
    "schedule_last_sync",
];

/// Bounded eviction-and-retry attempts before a quota failure surfaces.
const MAX_SET_ATTEMPTS: u32 = 5;
/// At most this many entries go per eviction batch.
const EVICTION_BATCH_MAX: usize = 3;
/// Fraction of evictable entries considered per batch.
const EVICTION_FRACTION: f64 = 0.25;

/// Reports whether the device currently has connectivity; consulted before
/// scheduling a background revalidation.
pub trait ConnectivityProbe: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Default probe for embedders without a platform network signal.
#[derive(Debug, Default)]
pub struct AlwaysOnline;

impl ConnectivityProbe for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Generic TTL+LRU cache over the key-value storage adapter.
///
/// The runtime here is genuinely multi-threaded, so every metadata
/// read-modify-write sequence is serialized behind one async mutex; the
/// original cooperative single-threaded design got that atomicity for free.
pub struct CacheManager {
    store: Arc<dyn KeyValueStore>,
    connectivity: Arc<dyn ConnectivityProbe>,
    meta_lock: Mutex<()>,
}

impl CacheManager {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self::with_connectivity(store, Arc::new(AlwaysOnline))
    }

    pub fn with_connectivity(
        store: Arc<dyn KeyValueStore>,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        Self {
            store,
            connectivity,
            meta_lock: Mutex::new(()),
        }
    }

    fn entry_key(key: &str) -> String {
        format!("{CACHE_KEY_PREFIX}{key}")
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Load the entry, record hit/miss accounting, bump `lastAccessed`.
    ///
    /// Returns the value regardless of staleness; callers needing strict
    /// freshness ask `is_valid`/`is_stale` explicitly. Unparseable entries
    /// and storage read failures decay to misses, never errors.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let _guard = self.meta_lock.lock().await;

        let raw = match self.store.get_item(&Self::entry_key(key)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!("cache read failed for '{key}': {e}");
                self.record_miss().await;
                return Ok(None);
            }
        };
        let Some(raw) = raw else {
            self.record_miss().await;
            return Ok(None);
        };

        let mut entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("treating unparseable cache entry '{key}' as a miss: {e}");
                self.record_miss().await;
                return Ok(None);
            }
        };
        let value: T = match serde_json::from_value(entry.data.clone()) {
            Ok(value) => value,
            Err(e) => {
                debug!("cache entry '{key}' does not match requested type: {e}");
                self.record_miss().await;
                return Ok(None);
            }
        };

        entry.last_accessed = Self::now_ms();
        if let Ok(serialized) = serde_json::to_string(&entry) {
            if let Err(e) = self.store.set_item(&Self::entry_key(key), &serialized).await {
                warn!("failed to persist lastAccessed for '{key}': {e}");
            }
        }
        self.record_hit().await;
        Ok(Some(value))
    }

    /// Like [`get`](Self::get), but when the entry is stale and the device
    /// is online, `refresh` is scheduled as a detached task that overwrites
    /// the entry under `config`. Always returns immediately with whatever
    /// is cached.
    pub async fn get_with_revalidate<T, F>(
        self: &Arc<Self>,
        key: &str,
        config: CacheWriteConfig,
        refresh: F,
    ) -> Result<Option<T>>
    where
        // `Sync` because the detached task's `set` call borrows the fresh
        // value across the metadata lock.
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> BoxFuture<'static, Result<T>> + Send + 'static,
    {
        let value = self.get::<T>(key).await?;
        if self.is_stale(key).await && self.connectivity.is_online() {
            let manager = Arc::clone(self);
            let key = key.to_string();
            tokio::spawn(async move {
                match refresh().await {
                    Ok(fresh) => {
                        if let Err(e) = manager.set(&key, &fresh, config).await {
                            warn!("background revalidation write failed for '{key}': {e}");
                        }
                    }
                    Err(e) => debug!("background revalidation failed for '{key}': {e}"),
                }
            });
        }
        Ok(value)
    }

    /// Write a value with TTL/priority metadata. On a quota failure the
    /// manager evicts a batch and retries, up to [`MAX_SET_ATTEMPTS`]; any
    /// other storage error is rethrown directly.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        config: CacheWriteConfig,
    ) -> Result<()> {
        let _guard = self.meta_lock.lock().await;
        self.set_locked(key, serde_json::to_value(value)?, config)
            .await
    }

    async fn set_locked(
        &self,
        key: &str,
        data: serde_json::Value,
        config: CacheWriteConfig,
    ) -> Result<()> {
        let now = Self::now_ms();
        let serialized_value = serde_json::to_string(&data)?;
        let entry = CacheEntry {
            key: key.to_string(),
            data,
            timestamp: now,
            ttl: config.ttl,
            last_accessed: now,
            size: approximate_size(&serialized_value),
            priority: config.priority,
            version: CACHE_ENTRY_VERSION,
        };
        let payload = serde_json::to_string(&entry)?;
        let entry_key = Self::entry_key(key);

        // Replacing an existing key adjusts totals by the delta, never by
        // double-counting. An unparseable predecessor contributes zero.
        // Eviction below skips this key, so the snapshot stays accurate
        // across retries.
        let previous = match self.store.get_item(&entry_key).await {
            Ok(Some(raw)) => serde_json::from_str::<CacheEntry>(&raw)
                .ok()
                .map(|e| e.size)
                .or(Some(0)),
            _ => None,
        };

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self.store.set_item(&entry_key, &payload).await {
                Ok(()) => {
                    let mut meta = self.load_metadata().await;
                    match previous {
                        Some(old_size) => {
                            meta.total_size =
                                meta.total_size.saturating_sub(old_size) + entry.size;
                        }
                        None => {
                            meta.total_size += entry.size;
                            meta.entry_count += 1;
                        }
                    }
                    self.store_metadata(&meta).await?;
                    return Ok(());
                }
                Err(e) if e.is_quota() => {
                    if attempts >= MAX_SET_ATTEMPTS {
                        warn!("cache write for '{key}' still over quota after {attempts} attempts");
                        return Err(Error::CacheWrite {
                            attempts: MAX_SET_ATTEMPTS,
                        });
                    }
                    let evicted = self.evict_batch_locked(&entry_key).await?;
                    debug!("quota hit writing '{key}', evicted {evicted} entries, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Remove one entry and adjust aggregates. No-op when absent.
    pub async fn invalidate(&self, key: &str) -> Result<()> {
        let _guard = self.meta_lock.lock().await;
        let entry_key = Self::entry_key(key);
        let existing = self
            .store
            .get_item(&entry_key)
            .await
            .map_err(Error::from)?
            .and_then(|raw| serde_json::from_str::<CacheEntry>(&raw).ok());
        let Some(entry) = existing else {
            return Ok(());
        };

        self.store.remove_item(&entry_key).await?;
        let mut meta = self.load_metadata().await;
        meta.total_size = meta.total_size.saturating_sub(entry.size);
        meta.entry_count = meta.entry_count.saturating_sub(1);
        self.store_metadata(&meta).await?;
        Ok(())
    }

    /// Remove every entry in the namespace; size/count reset, hit/miss
    /// counters survive.
    pub async fn clear(&self) -> Result<()> {
        let _guard = self.meta_lock.lock().await;
        self.clear_locked(false).await
    }

    /// Like [`clear`](Self::clear), but also resets hit/miss counters.
    pub async fn clear_all(&self) -> Result<()> {
        let _guard = self.meta_lock.lock().await;
        self.clear_locked(true).await
    }

    async fn clear_locked(&self, reset_counters: bool) -> Result<()> {
        for key in self.namespace_keys().await? {
            self.store.remove_item(&key).await?;
        }
        let mut meta = self.load_metadata().await;
        meta.total_size = 0;
        meta.entry_count = 0;
        if reset_counters {
            meta.hits = 0;
            meta.misses = 0;
        }
        self.store_metadata(&meta).await?;
        Ok(())
    }

    /// True when absent, unreadable, or past its TTL.
    pub async fn is_stale(&self, key: &str) -> bool {
        match self.read_entry(key).await {
            Some(entry) => entry.is_stale(Self::now_ms()),
            None => true,
        }
    }

    /// True only for a present, readable, unexpired entry. Not the
    /// complement of [`is_stale`](Self::is_stale) for missing keys.
    pub async fn is_valid(&self, key: &str) -> bool {
        match self.read_entry(key).await {
            Some(entry) => !entry.is_stale(Self::now_ms()),
            None => false,
        }
    }

    pub async fn statistics(&self) -> CacheStatistics {
        let _guard = self.meta_lock.lock().await;
        CacheStatistics::from(&self.load_metadata().await)
    }

    /// Scan and validate every entry in the namespace. Observational only.
    pub async fn health_check(&self) -> Result<CacheHealthReport> {
        let mut report = CacheHealthReport {
            healthy: true,
            ..Default::default()
        };
        for storage_key in self.namespace_keys().await? {
            report.total_entries += 1;
            let logical_key = storage_key
                .strip_prefix(CACHE_KEY_PREFIX)
                .unwrap_or(&storage_key)
                .to_string();
            let issue = match self.store.get_item(&storage_key).await {
                Ok(Some(raw)) => validate_raw_entry(&raw).err(),
                Ok(None) => Some("listed key vanished during scan".to_string()),
                Err(e) => Some(format!("unreadable: {e}")),
            };
            if let Some(issue) = issue {
                report.healthy = false;
                report.corrupted_entries += 1;
                report.issues.push(format!("{logical_key}: {issue}"));
                report.corrupted_keys.push(logical_key);
            }
        }
        Ok(report)
    }

    /// Delete every entry the health scan flags, then rebuild aggregates
    /// from a full rescan — flagged entries' recorded sizes cannot be
    /// trusted, so incremental deltas are out.
    pub async fn remove_corrupted_entries(&self) -> Result<usize> {
        let report = self.health_check().await?;
        let _guard = self.meta_lock.lock().await;
        for key in &report.corrupted_keys {
            self.store.remove_item(&Self::entry_key(key)).await?;
        }
        let meta = self.load_metadata().await;
        let rebuilt = self.recalculate_locked(meta.hits, meta.misses).await?;
        self.store_metadata(&rebuilt).await?;
        Ok(report.corrupted_entries)
    }

    /// Operator-invoked recovery: drop corrupted entries and rebuild
    /// aggregate metadata.
    pub async fn repair_cache(&self) -> Result<CacheRepairOutcome> {
        let removed = self.remove_corrupted_entries().await?;
        Ok(CacheRepairOutcome {
            removed,
            recalculated: true,
        })
    }

    /// Onboard legacy-format entries into the managed namespace.
    ///
    /// Only keys matching the legacy prefix table are claimed; internal
    /// keys and foreign keys stay untouched. Per-entry failures are
    /// counted and never abort the pass.
    pub async fn migrate_legacy_entries(&self) -> Result<CacheMigrationOutcome> {
        let _guard = self.meta_lock.lock().await;
        let mut outcome = CacheMigrationOutcome::default();

        for key in self.store.keys().await.map_err(Error::from)? {
            if key.starts_with(CACHE_KEY_PREFIX) || INTERNAL_KEYS.contains(&key.as_str()) {
                continue;
            }
            let Some(kind) = LegacyKeyKind::from_key(&key) else {
                continue;
            };
            let migrated = async {
                let raw = self
                    .store
                    .get_item(&key)
                    .await?
                    .ok_or_else(|| StorageError::backend("legacy key vanished during scan"))?;
                let data: serde_json::Value = serde_json::from_str(&raw)
                    .map_err(|e| StorageError::backend(format!("legacy value unparseable: {e}")))?;
                self.set_locked(&key, data, kind.write_config()).await?;
                self.store.remove_item(&key).await?;
                Ok::<(), Error>(())
            }
            .await;
            match migrated {
                Ok(()) => outcome.migrated += 1,
                Err(e) => {
                    warn!("failed to migrate legacy cache key '{key}': {e}");
                    outcome.failed += 1;
                }
            }
        }
        Ok(outcome)
    }

    // ── internals ───────────────────────────────────────────────────────

    async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        let raw = self.store.get_item(&Self::entry_key(key)).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    async fn namespace_keys(&self) -> Result<Vec<String>> {
        let mut keys = self
            .store
            .keys()
            .await
            .map_err(Error::from)?
            .into_iter()
            .filter(|k| k.starts_with(CACHE_KEY_PREFIX))
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    /// Callers must hold `meta_lock`.
    async fn load_metadata(&self) -> CacheMetadata {
        let raw = match self.store.get_item(CACHE_METADATA_KEY).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return CacheMetadata::default(),
            Err(e) => {
                warn!("cache metadata unreadable, assuming empty: {e}");
                return CacheMetadata::default();
            }
        };
        match CacheMetadata::parse_sanitized(&raw) {
            Some(meta) => meta,
            None => {
                warn!("cache metadata failed sanitization, recalculating from rescan");
                self.recalculate_locked(0, 0).await.unwrap_or_default()
            }
        }
    }

    async fn store_metadata(&self, meta: &CacheMetadata) -> Result<()> {
        let raw = serde_json::to_string(meta)?;
        self.store.set_item(CACHE_METADATA_KEY, &raw).await?;
        Ok(())
    }

    /// Rebuild size/count aggregates from a full namespace rescan,
    /// carrying the access counters through.
    async fn recalculate_locked(&self, hits: u64, misses: u64) -> Result<CacheMetadata> {
        let mut meta = CacheMetadata {
            hits,
            misses,
            ..Default::default()
        };
        for storage_key in self.namespace_keys().await? {
            if let Ok(Some(raw)) = self.store.get_item(&storage_key).await {
                if let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) {
                    meta.total_size += entry.size;
                    meta.entry_count += 1;
                }
            }
        }
        Ok(meta)
    }

    async fn record_hit(&self) {
        let mut meta = self.load_metadata().await;
        meta.hits += 1;
        if let Err(e) = self.store_metadata(&meta).await {
            warn!("failed to persist cache hit counter: {e}");
        }
    }

    async fn record_miss(&self) {
        let mut meta = self.load_metadata().await;
        meta.misses += 1;
        if let Err(e) = self.store_metadata(&meta).await {
            warn!("failed to persist cache miss counter: {e}");
        }
    }

    /// Evict one batch under quota pressure. Critical entries and the key
    /// currently being written are exempt; the rest go priority-ascending,
    /// LRU within a tier. Callers must hold `meta_lock`.
    async fn evict_batch_locked(&self, writing_key: &str) -> Result<usize> {
        let mut candidates = Vec::new();
        for storage_key in self.namespace_keys().await? {
            if storage_key == writing_key {
                continue;
            }
            if let Ok(Some(raw)) = self.store.get_item(&storage_key).await {
                if let Ok(entry) = serde_json::from_str::<CacheEntry>(&raw) {
                    candidates.push((storage_key, entry));
                }
            }
        }
        candidates.retain(|(_, e)| e.priority != CachePriority::Critical);
        if candidates.is_empty() {
            warn!("eviction requested but no non-critical entries exist");
            return Ok(0);
        }
        candidates.sort_by(|(_, a), (_, b)| {
            a.priority
                .cmp(&b.priority)
                .then(a.last_accessed.cmp(&b.last_accessed))
        });

        let batch = EVICTION_BATCH_MAX
            .min((candidates.len() as f64 * EVICTION_FRACTION).ceil() as usize);
        let mut meta = self.load_metadata().await;
        for (storage_key, entry) in candidates.into_iter().take(batch) {
            debug!(
                "evicting cache entry '{}' (priority {:?}, last accessed {})",
                entry.key, entry.priority, entry.last_accessed
            );
            self.store.remove_item(&storage_key).await?;
            meta.total_size = meta.total_size.saturating_sub(entry.size);
            meta.entry_count = meta.entry_count.saturating_sub(1);
        }
        meta.last_eviction = Some(Self::now_ms());
        self.store_metadata(&meta).await?;
        Ok(batch)
    }
}
