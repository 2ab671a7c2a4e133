//! Cache entry model and staleness predicate.

use serde::{Deserialize, Serialize};

/// Current entry format version. Bumped when the serialized shape changes;
/// older versions are rewritten by the legacy migration.
pub const CACHE_ENTRY_VERSION: u32 = 2;

/// Eviction tier. `Critical` entries are exempt from eviction entirely
/// (e.g. the user's selected group must survive quota pressure).
///
/// Derived ordering drives the eviction sort: lower tiers go first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    Low,
    Medium,
    High,
    Critical,
}

/// TTL and priority applied to a cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheWriteConfig {
    /// Milliseconds until the entry counts as stale. `None` never expires.
    pub ttl: Option<u64>,
    pub priority: CachePriority,
}

impl CacheWriteConfig {
    pub const fn new(ttl: Option<u64>, priority: CachePriority) -> Self {
        Self { ttl, priority }
    }
}

impl Default for CacheWriteConfig {
    fn default() -> Self {
        // One hour, medium tier.
        Self {
            ttl: Some(60 * 60 * 1000),
            priority: CachePriority::Medium,
        }
    }
}

/// A cached value with its bookkeeping metadata, stored as one JSON string
/// per key under the cache namespace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub key: String,
    pub data: serde_json::Value,
    /// Write time, epoch millis.
    pub timestamp: i64,
    /// `None` (serialized as `null`, the legacy encoding of an infinite
    /// TTL) means the entry never expires.
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Updated on every read; LRU ordering within a priority tier.
    pub last_accessed: i64,
    /// Approximate byte cost of the serialized value.
    pub size: u64,
    pub priority: CachePriority,
    pub version: u32,
}

impl CacheEntry {
    /// Stale iff `now - timestamp > ttl`. Staleness does not imply removal;
    /// stale entries remain readable for stale-while-revalidate callers.
    pub fn is_stale(&self, now_ms: i64) -> bool {
        match self.ttl {
            None => false,
            Some(ttl) => now_ms.saturating_sub(self.timestamp) > ttl as i64,
        }
    }
}

/// Approximate byte size of a serialized value. Kept as the legacy
/// approximation contract: UTF-16 code units at two bytes each.
pub fn approximate_size(serialized: &str) -> u64 {
    serialized.encode_utf16().count() as u64 * 2
}

/// Validates one raw stored entry without deserializing into [`CacheEntry`],
/// so that health checks can describe exactly which field is broken.
pub fn validate_raw_entry(raw: &str) -> std::result::Result<(), String> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| format!("unparseable JSON: {e}"))?;
    let obj = value
        .as_object()
        .ok_or_else(|| "entry is not a JSON object".to_string())?;

    for field in ["key", "data", "timestamp", "lastAccessed", "size", "priority", "version"] {
        if !obj.contains_key(field) {
            return Err(format!("missing required field '{field}'"));
        }
    }
    if obj["timestamp"].as_i64().is_none() {
        return Err("field 'timestamp' is not a valid number".to_string());
    }
    match obj.get("ttl") {
        None | Some(serde_json::Value::Null) => {}
        Some(ttl) if ttl.as_u64().is_some() => {}
        Some(_) => return Err("field 'ttl' is not a valid number".to_string()),
    }
    if obj["lastAccessed"].as_i64().is_none() {
        return Err("field 'lastAccessed' is not a valid number".to_string());
    }
    if obj["size"].as_u64().is_none() {
        return Err("field 'size' is not a valid non-negative number".to_string());
    }
    let priority = obj["priority"].as_str().unwrap_or_default();
    if !matches!(priority, "low" | "medium" | "high" | "critical") {
        return Err(format!("unrecognized priority '{priority}'"));
    }
    Ok(())
}
