//! Aggregate cache metadata with the numeric sanitization invariant.

use serde::{Deserialize, Serialize};

/// Aggregate bookkeeping persisted under a single fixed key.
///
/// All counters must be finite and non-negative. A persisted blob that
/// violates this (negative, fractional, or non-numeric values from a
/// crashed or corrupted write) must not be trusted incrementally; callers
/// recalculate from a full entry rescan instead.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub total_size: u64,
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
    #[serde(default)]
    pub last_eviction: Option<i64>,
}

impl CacheMetadata {
    /// `hits / (hits + misses)`, 0 when nothing has been accessed yet.
    pub fn hit_rate(&self) -> f64 {
        let accesses = self.hits + self.misses;
        if accesses == 0 {
            0.0
        } else {
            self.hits as f64 / accesses as f64
        }
    }

    pub fn miss_rate(&self) -> f64 {
        let accesses = self.hits + self.misses;
        if accesses == 0 {
            0.0
        } else {
            self.misses as f64 / accesses as f64
        }
    }

    /// Parse a persisted blob, enforcing the sanitization invariant.
    /// Returns `None` for anything that must trigger a rescan.
    pub fn parse_sanitized(raw: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).ok()?;
        let obj = value.as_object()?;
        // as_u64 rejects negatives, fractions, and JSON's non-numbers.
        let total_size = obj.get("totalSize")?.as_u64()?;
        let entry_count = obj.get("entryCount")?.as_u64()?;
        let hits = obj.get("hits")?.as_u64()?;
        let misses = obj.get("misses")?.as_u64()?;
        let last_eviction = match obj.get("lastEviction") {
            None | Some(serde_json::Value::Null) => None,
            Some(v) => Some(v.as_i64()?),
        };
        Some(Self {
            total_size,
            entry_count,
            hits,
            misses,
            last_eviction,
        })
    }
}

/// Point-in-time cache statistics for diagnostics surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub total_size: u64,
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub last_eviction: Option<i64>,
}

impl From<&CacheMetadata> for CacheStatistics {
    fn from(meta: &CacheMetadata) -> Self {
        Self {
            total_size: meta.total_size,
            entry_count: meta.entry_count,
            hits: meta.hits,
            misses: meta.misses,
            hit_rate: meta.hit_rate(),
            miss_rate: meta.miss_rate(),
            last_eviction: meta.last_eviction,
        }
    }
}

/// Result of a cache health scan. Purely observational; nothing is mutated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheHealthReport {
    pub healthy: bool,
    pub total_entries: usize,
    pub corrupted_entries: usize,
    pub corrupted_keys: Vec<String>,
    pub issues: Vec<String>,
}

/// Result of an operator-invoked repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRepairOutcome {
    pub removed: usize,
    pub recalculated: bool,
}

/// Result of a legacy-format migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMigrationOutcome {
    pub migrated: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rates_guard_against_zero_division() {
        let meta = CacheMetadata::default();
        assert_eq!(meta.hit_rate(), 0.0);
        assert_eq!(meta.miss_rate(), 0.0);
    }

    #[test]
    fn rates_split_accesses() {
        let meta = CacheMetadata {
            hits: 3,
            misses: 1,
            ..Default::default()
        };
        assert_eq!(meta.hit_rate(), 0.75);
        assert_eq!(meta.miss_rate(), 0.25);
    }

    #[test]
    fn sanitizer_rejects_negative_counters() {
        assert!(CacheMetadata::parse_sanitized(
            r#"{"totalSize":-5,"entryCount":1,"hits":0,"misses":0}"#
        )
        .is_none());
    }

    #[test]
    fn sanitizer_rejects_non_numeric_counters() {
        assert!(CacheMetadata::parse_sanitized(
            r#"{"totalSize":"big","entryCount":1,"hits":0,"misses":0}"#
        )
        .is_none());
        assert!(CacheMetadata::parse_sanitized("garbage").is_none());
    }

    #[test]
    fn sanitizer_accepts_valid_blob() {
        let meta = CacheMetadata::parse_sanitized(
            r#"{"totalSize":10,"entryCount":2,"hits":5,"misses":1,"lastEviction":null}"#,
        )
        .expect("valid metadata");
        assert_eq!(meta.total_size, 10);
        assert_eq!(meta.last_eviction, None);
    }
}
