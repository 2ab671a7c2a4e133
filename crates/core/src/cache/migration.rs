//! Legacy cache format onboarding.
//!
//! The previous storage layout wrote untyped JSON values under bare keys.
//! Each recognized legacy family maps to an explicit write policy; keys
//! matching no prefix are presumed foreign and left untouched.

use super::entry::{CachePriority, CacheWriteConfig};

const HOURS_24: u64 = 24 * 60 * 60 * 1000;
const HOURS_6: u64 = 6 * 60 * 60 * 1000;

/// The finite set of legacy key families, resolved by prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyKeyKind {
    /// Faculty list snapshots (`faculties...`).
    FacultyList,
    /// Per-faculty major lists (`majors:...`).
    MajorList,
    /// Per-owner schedule payloads (`schedule:...`).
    GroupSchedule,
    /// The user's selected group (`selected_group...`).
    SelectedGroup,
}

/// Prefixes established when the legacy keys were originally created.
/// Longer prefixes first so `selected_group` never falls through to a
/// shorter match.
const LEGACY_PREFIXES: &[(&str, LegacyKeyKind)] = &[
    ("selected_group", LegacyKeyKind::SelectedGroup),
    ("faculties", LegacyKeyKind::FacultyList),
    ("majors:", LegacyKeyKind::MajorList),
    ("schedule:", LegacyKeyKind::GroupSchedule),
];

impl LegacyKeyKind {
    /// Resolve a storage key against the legacy prefix table.
    pub fn from_key(key: &str) -> Option<Self> {
        LEGACY_PREFIXES
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix))
            .map(|(_, kind)| *kind)
    }

    /// TTL/priority the migrated entry is written with.
    pub fn write_config(self) -> CacheWriteConfig {
        match self {
            Self::FacultyList => CacheWriteConfig::new(Some(HOURS_24), CachePriority::High),
            Self::MajorList => CacheWriteConfig::new(Some(HOURS_24), CachePriority::Medium),
            Self::GroupSchedule => CacheWriteConfig::new(Some(HOURS_6), CachePriority::Medium),
            Self::SelectedGroup => CacheWriteConfig::new(None, CachePriority::Critical),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_prefixes() {
        assert_eq!(
            LegacyKeyKind::from_key("faculties"),
            Some(LegacyKeyKind::FacultyList)
        );
        assert_eq!(
            LegacyKeyKind::from_key("majors:informatik"),
            Some(LegacyKeyKind::MajorList)
        );
        assert_eq!(
            LegacyKeyKind::from_key("schedule:group:42"),
            Some(LegacyKeyKind::GroupSchedule)
        );
        assert_eq!(
            LegacyKeyKind::from_key("selected_group"),
            Some(LegacyKeyKind::SelectedGroup)
        );
    }

    #[test]
    fn foreign_keys_are_not_claimed() {
        assert_eq!(LegacyKeyKind::from_key("theme_preference"), None);
        assert_eq!(LegacyKeyKind::from_key("major"), None);
    }

    #[test]
    fn selected_group_survives_eviction_forever() {
        let config = LegacyKeyKind::SelectedGroup.write_config();
        assert_eq!(config.ttl, None);
        assert_eq!(config.priority, CachePriority::Critical);
    }
}
