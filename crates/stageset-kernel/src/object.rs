//! Object identity and per-stage projections of versioned objects.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Identity of a versioned object: base type plus numeric ID.
///
/// `object_type` is always the root of the class's inheritance chain, so an
/// object of a subclass shares its key space with its base type. The concrete
/// class travels on [`ObjectRecord::class_name`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub object_type: String,
    pub id: u64,
}

impl ObjectKey {
    pub fn new(object_type: impl Into<String>, id: u64) -> Self {
        Self {
            object_type: object_type.into(),
            id,
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.object_type, self.id)
    }
}

/// The two stages every versioned object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Draft,
    Live,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Draft => "draft",
            Stage::Live => "live",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage's view of an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub key: ObjectKey,
    pub class_name: String,
    pub revision: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

impl ObjectRecord {
    /// Read an integer link field. Absent, null, and non-integer values read as `0`.
    pub fn foreign_key(&self, field: &str) -> u64 {
        self.fields.get(field).and_then(Value::as_u64).unwrap_or(0)
    }
}

/// How an object's draft differs from its live copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
    None,
}

impl ChangeType {
    /// Classify from the draft and live revisions (`0` meaning absent).
    pub fn from_revisions(draft: u64, live: u64) -> Self {
        match (draft, live) {
            (0, 0) => ChangeType::None,
            (_, 0) => ChangeType::Created,
            (0, _) => ChangeType::Deleted,
            (d, l) if d != l => ChangeType::Modified,
            _ => ChangeType::None,
        }
    }

    pub fn is_pending(&self) -> bool {
        !matches!(self, ChangeType::None)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Modified => "modified",
            ChangeType::Deleted => "deleted",
            ChangeType::None => "none",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
