//! ChangeSet and ChangeSetItem: the unit of publish and its contents.
//!
//! Items live in an arena keyed by [`ObjectKey`], so there is at most one item
//! per object and the `referenced_by` back-references are plain item IDs
//! rather than pointers. Cycles in the ownership graph therefore cannot
//! produce cyclic data structures here.

use crate::error::{ChangeSetError, Result};
use crate::object::ObjectKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state. Anything other than `Open` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeSetState {
    Open,
    Published,
    Reverted,
}

impl ChangeSetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeSetState::Open => "open",
            ChangeSetState::Published => "published",
            ChangeSetState::Reverted => "reverted",
        }
    }
}

impl fmt::Display for ChangeSetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why an item is in the changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddedMode {
    None,
    Explicit,
    Implicit,
}

impl AddedMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddedMode::None => "none",
            AddedMode::Explicit => "explicit",
            AddedMode::Implicit => "implicit",
        }
    }
}

/// One object tracked by a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSetItem {
    pub id: u64,
    pub object: ObjectKey,
    pub added: AddedMode,
    /// Live revision before publish; `0` if never live.
    #[serde(default)]
    pub version_before: u64,
    /// Live revision after publish; `0` if unpublished.
    #[serde(default)]
    pub version_after: u64,
    /// Item IDs of the explicit roots that pulled this item in.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub referenced_by: BTreeSet<u64>,
}

/// A group of draft changes published as one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: Uuid,
    pub title: String,
    pub state: ChangeSetState,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_by: Option<String>,
    #[serde(with = "item_list", default)]
    items: BTreeMap<ObjectKey, ChangeSetItem>,
    #[serde(default)]
    next_item_id: u64,
}

impl ChangeSet {
    pub fn new(title: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            state: ChangeSetState::Open,
            created_at: Utc::now(),
            created_by: created_by.into(),
            published_at: None,
            published_by: None,
            items: BTreeMap::new(),
            next_item_id: 1,
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ChangeSetState::Open
    }

    /// Fail with `InvalidStateTransition` unless the changeset is still open.
    pub fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(ChangeSetError::InvalidStateTransition {
                change_set_id: self.id,
                state: self.state,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items in object-key order.
    pub fn items(&self) -> impl Iterator<Item = &ChangeSetItem> {
        self.items.values()
    }

    pub fn item(&self, object: &ObjectKey) -> Option<&ChangeSetItem> {
        self.items.get(object)
    }

    pub fn item_by_id(&self, id: u64) -> Option<&ChangeSetItem> {
        self.items.values().find(|item| item.id == id)
    }

    pub fn explicit_items(&self) -> impl Iterator<Item = &ChangeSetItem> {
        self.items
            .values()
            .filter(|item| item.added == AddedMode::Explicit)
    }

    pub fn implicit_items(&self) -> impl Iterator<Item = &ChangeSetItem> {
        self.items
            .values()
            .filter(|item| item.added == AddedMode::Implicit)
    }

    /// Insert an explicit item, or promote an implicit one.
    ///
    /// Returns `true` when the item set changed.
    pub(crate) fn insert_explicit(&mut self, object: ObjectKey) -> bool {
        if let Some(item) = self.items.get_mut(&object) {
            if item.added == AddedMode::Explicit {
                return false;
            }
            item.added = AddedMode::Explicit;
            item.referenced_by.clear();
            return true;
        }
        let id = self.allocate_item_id();
        self.items.insert(
            object.clone(),
            ChangeSetItem {
                id,
                object,
                added: AddedMode::Explicit,
                version_before: 0,
                version_after: 0,
                referenced_by: BTreeSet::new(),
            },
        );
        true
    }

    pub(crate) fn insert_implicit(
        &mut self,
        object: ObjectKey,
        referenced_by: BTreeSet<u64>,
    ) -> u64 {
        let id = self.allocate_item_id();
        self.items.insert(
            object.clone(),
            ChangeSetItem {
                id,
                object,
                added: AddedMode::Implicit,
                version_before: 0,
                version_after: 0,
                referenced_by,
            },
        );
        id
    }

    pub(crate) fn item_mut(&mut self, object: &ObjectKey) -> Option<&mut ChangeSetItem> {
        self.items.get_mut(object)
    }

    pub(crate) fn remove(&mut self, object: &ObjectKey) -> Option<ChangeSetItem> {
        self.items.remove(object)
    }

    /// Stamp revisions and close the changeset. Only called after the store commit.
    pub(crate) fn mark_published(
        &mut self,
        stamps: &BTreeMap<ObjectKey, (u64, u64)>,
        actor_id: &str,
    ) {
        for (object, (before, after)) in stamps {
            if let Some(item) = self.items.get_mut(object) {
                item.version_before = *before;
                item.version_after = *after;
            }
        }
        self.state = ChangeSetState::Published;
        self.published_at = Some(Utc::now());
        self.published_by = Some(actor_id.to_string());
    }

    fn allocate_item_id(&mut self) -> u64 {
        // Ledgers written before item ids were tracked deserialize with 0.
        let floor = self.items.values().map(|item| item.id).max().unwrap_or(0) + 1;
        let id = self.next_item_id.max(floor);
        self.next_item_id = id + 1;
        id
    }
}

mod item_list {
    use super::ChangeSetItem;
    use crate::object::ObjectKey;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S: Serializer>(
        items: &BTreeMap<ObjectKey, ChangeSetItem>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&ChangeSetItem> = items.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ObjectKey, ChangeSetItem>, D::Error> {
        let list = Vec::<ChangeSetItem>::deserialize(deserializer)?;
        Ok(list
            .into_iter()
            .map(|item| (item.object.clone(), item))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_explicit_is_idempotent() {
        let mut cs = ChangeSet::new("campaign", "alice");
        assert!(cs.insert_explicit(ObjectKey::new("End", 1)));
        assert!(!cs.insert_explicit(ObjectKey::new("End", 1)));
        assert_eq!(cs.len(), 1);
        assert_eq!(cs.explicit_items().count(), 1);
    }

    #[test]
    fn insert_explicit_promotes_implicit_item() {
        let mut cs = ChangeSet::new("campaign", "alice");
        cs.insert_explicit(ObjectKey::new("Base", 1));
        let root_id = cs.item(&ObjectKey::new("Base", 1)).expect("root exists").id;
        let implicit_id = cs.insert_implicit(ObjectKey::new("End", 4), BTreeSet::from([root_id]));

        assert!(cs.insert_explicit(ObjectKey::new("End", 4)));

        let item = cs.item(&ObjectKey::new("End", 4)).expect("item exists");
        assert_eq!(item.id, implicit_id);
        assert_eq!(item.added, AddedMode::Explicit);
        assert!(item.referenced_by.is_empty());
        assert_eq!(cs.implicit_items().count(), 0);
    }

    #[test]
    fn item_ids_are_never_reused() {
        let mut cs = ChangeSet::new("campaign", "alice");
        cs.insert_explicit(ObjectKey::new("End", 1));
        cs.insert_explicit(ObjectKey::new("End", 2));
        cs.remove(&ObjectKey::new("End", 2));
        cs.insert_explicit(ObjectKey::new("End", 3));

        let ids: Vec<u64> = cs.items().map(|item| item.id).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn ensure_open_rejects_terminal_states() {
        let mut cs = ChangeSet::new("campaign", "alice");
        assert!(cs.ensure_open().is_ok());

        cs.mark_published(&BTreeMap::new(), "alice");
        let err = cs.ensure_open().expect_err("published changeset is terminal");
        assert!(matches!(
            err,
            ChangeSetError::InvalidStateTransition {
                state: ChangeSetState::Published,
                ..
            }
        ));
        assert_eq!(cs.published_by.as_deref(), Some("alice"));
    }

    #[test]
    fn serde_keeps_items_and_id_counter() {
        let mut cs = ChangeSet::new("campaign", "alice");
        cs.insert_explicit(ObjectKey::new("Base", 1));
        cs.insert_implicit(ObjectKey::new("Mid", 2), BTreeSet::from([1]));

        let json = serde_json::to_string(&cs).expect("changeset should serialize");
        let mut restored: ChangeSet = serde_json::from_str(&json).expect("changeset should parse");
        assert_eq!(restored, cs);

        restored.insert_explicit(ObjectKey::new("End", 3));
        assert_eq!(
            restored.item(&ObjectKey::new("End", 3)).expect("inserted").id,
            3
        );
    }

    #[test]
    fn serde_shape_lists_items() {
        let mut cs = ChangeSet::new("campaign", "");
        cs.insert_explicit(ObjectKey::new("Base", 1));
        let value = serde_json::to_value(&cs).expect("changeset should serialize");
        assert_eq!(value["state"], "open");
        assert_eq!(value["items"][0]["object"]["object_type"], "Base");
        assert_eq!(value["items"][0]["added"], "explicit");
        assert!(value.get("created_by").is_none());
    }
}
