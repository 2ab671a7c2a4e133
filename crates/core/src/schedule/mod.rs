//! Schedule domain models shared between the remote contract and the
//! embedded relational store.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Discriminator for addressable schedule owners. Numeric ids are only
/// unique within a kind, so `(id, kind)` is the composite identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    Group,
    Teacher,
    Room,
}

impl OwnerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Group => "group",
            Self::Teacher => "teacher",
            Self::Room => "room",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "group" => Some(Self::Group),
            "teacher" => Some(Self::Teacher),
            "room" => Some(Self::Room),
            _ => None,
        }
    }
}

/// Per-week schedule: day name to a list of class items. Class items stay
/// opaque JSON; domain transforms live outside this layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeekSchedule {
    pub schedule: BTreeMap<String, Vec<serde_json::Value>>,
}

/// Structured schedule payload carried by every owner row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulePayload {
    pub weeks: BTreeMap<String, WeekSchedule>,
}

/// One addressable schedule owner as served by the remote source and stored
/// in the `unified_schedules` table. Replaced wholesale on every sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOwner {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: OwnerKind,
    pub name: String,
    #[serde(default)]
    pub faculty: Option<String>,
    pub data: SchedulePayload,
    pub updated_at: String,
    #[serde(default)]
    pub weeks_count: i64,
    #[serde(default)]
    pub major: Option<String>,
    #[serde(default)]
    pub study_type: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub office: Option<String>,
}

/// Singleton semester record. Its `updated_at` is the freshness marker for
/// the whole dataset: local data is fresh iff the markers string-equal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemesterInfo {
    pub semester: String,
    pub academic_year: String,
    pub updated_at: String,
}
