//! Stored object: one entity with its draft and live versions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stageset_kernel::object::{ObjectKey, ObjectRecord, Stage};
use std::collections::BTreeMap;

/// One stage's copy of an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub revision: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, Value>,
}

/// An object as persisted: identity, concrete class, and both stages.
///
/// `revision` is the last revision number handed out for this object. Every
/// draft write takes the next one; publishing copies the draft version (and
/// its revision) to live unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredObject {
    // ── Identity ──
    /// Base type of `class_name`.
    pub object_type: String,
    pub id: u64,
    pub class_name: String,

    // ── Versions ──
    #[serde(default)]
    pub revision: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub draft: Option<Version>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live: Option<Version>,

    // ── Timestamps ──
    #[serde(default = "default_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "default_timestamp")]
    pub updated_at: DateTime<Utc>,
}

fn default_timestamp() -> DateTime<Utc> {
    Utc::now()
}

impl StoredObject {
    /// A new object that exists only on draft, at revision 1.
    pub fn new_draft(
        object_type: impl Into<String>,
        id: u64,
        class_name: impl Into<String>,
        fields: BTreeMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            object_type: object_type.into(),
            id,
            class_name: class_name.into(),
            revision: 1,
            draft: Some(Version {
                revision: 1,
                fields,
            }),
            live: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.object_type.clone(), self.id)
    }

    pub fn version(&self, stage: Stage) -> Option<&Version> {
        match stage {
            Stage::Draft => self.draft.as_ref(),
            Stage::Live => self.live.as_ref(),
        }
    }

    pub fn version_mut(&mut self, stage: Stage) -> Option<&mut Version> {
        match stage {
            Stage::Draft => self.draft.as_mut(),
            Stage::Live => self.live.as_mut(),
        }
    }

    /// Kernel projection of one stage.
    pub fn record(&self, stage: Stage) -> Option<ObjectRecord> {
        self.version(stage).map(|version| ObjectRecord {
            key: self.key(),
            class_name: self.class_name.clone(),
            revision: version.revision,
            fields: version.fields.clone(),
        })
    }

    /// Whether the object no longer exists on either stage.
    pub fn is_vacant(&self) -> bool {
        self.draft.is_none() && self.live.is_none()
    }

    /// Replace the draft fields and take the next revision.
    pub fn write_draft(&mut self, fields: BTreeMap<String, Value>) -> u64 {
        self.revision += 1;
        self.draft = Some(Version {
            revision: self.revision,
            fields,
        });
        self.touch_updated_at();
        self.revision
    }

    pub fn touch_updated_at(&mut self) {
        self.updated_at = Utc::now();
    }
}
