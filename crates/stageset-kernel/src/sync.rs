//! Changeset synchronization: explicit roots plus their owned closure.
//!
//! For every explicit item the synchronizer walks owned relations on the
//! draft graph (or, for a root deleted from draft, takes its live owners).
//! Reached objects with pending draft/live differences become implicit items
//! whose `referenced_by` names the roots that reached them. Unchanged objects
//! are walked through but not recorded.
//!
//! The result depends only on the explicit roots and the current store state,
//! so `sync` is idempotent and `is_synced` can recompute it without mutating
//! anything.

use crate::changeset::{AddedMode, ChangeSet};
use crate::error::{ChangeSetError, Result};
use crate::object::{ObjectKey, ObjectRecord, Stage};
use crate::schema::OwnershipSchema;
use crate::store::VersionedStore;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Implicit candidates: object → item IDs of the explicit roots that reach it.
pub type Closure = BTreeMap<ObjectKey, BTreeSet<u64>>;

/// What one `sync` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub added: Vec<ObjectKey>,
    pub removed: Vec<ObjectKey>,
    pub updated: Vec<ObjectKey>,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Difference between recorded non-explicit items and the current closure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncDiff {
    /// In the closure but not recorded.
    pub missing: Vec<ObjectKey>,
    /// Recorded but no longer in the closure.
    pub extra: Vec<ObjectKey>,
    /// Recorded with different `referenced_by`.
    pub drifted: Vec<ObjectKey>,
}

impl SyncDiff {
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.extra.is_empty() && self.drifted.is_empty()
    }
}

pub struct Synchronizer<'a, S: VersionedStore + ?Sized> {
    schema: &'a OwnershipSchema,
    store: &'a S,
}

impl<'a, S: VersionedStore + ?Sized> Synchronizer<'a, S> {
    pub fn new(schema: &'a OwnershipSchema, store: &'a S) -> Self {
        Self { schema, store }
    }

    /// Rewrite `key` into its base-type key space.
    pub fn normalize(&self, key: &ObjectKey) -> Result<ObjectKey> {
        Ok(ObjectKey::new(
            self.schema.base_type(&key.object_type)?,
            key.id,
        ))
    }

    /// Add `key` as an explicit item, promoting an implicit one.
    ///
    /// Returns `true` when the item set changed. The object must exist on
    /// draft or live.
    pub fn add_object(&self, cs: &mut ChangeSet, key: &ObjectKey) -> Result<bool> {
        cs.ensure_open()?;
        let key = self.normalize(key)?;
        if self.store.draft(&key)?.is_none() && self.store.record(Stage::Live, &key)?.is_none() {
            return Err(ChangeSetError::ObjectNotFound(key));
        }
        let changed = cs.insert_explicit(key.clone());
        tracing::debug!(
            target: "stageset.sync",
            change_set_id = %cs.id,
            object = %key,
            changed,
            "explicit add"
        );
        Ok(changed)
    }

    /// Drop an explicit item. Its implicit descendants go on the next `sync`.
    pub fn remove_object(&self, cs: &mut ChangeSet, key: &ObjectKey) -> Result<bool> {
        cs.ensure_open()?;
        let key = self.normalize(key)?;
        match cs.item(&key).map(|item| item.added) {
            None => Ok(false),
            Some(AddedMode::Explicit) => {
                cs.remove(&key);
                tracing::debug!(
                    target: "stageset.sync",
                    change_set_id = %cs.id,
                    object = %key,
                    "explicit remove"
                );
                Ok(true)
            }
            Some(_) => Err(ChangeSetError::InvalidInput(format!(
                "{key} was included implicitly; remove the explicit item that owns it instead"
            ))),
        }
    }

    /// Compute the implicit closure of `cs` against current store state.
    pub fn closure(&self, cs: &ChangeSet) -> Result<Closure> {
        let mut closure = Closure::new();
        for root in cs.explicit_items() {
            for key in self.referenced_from(&root.object)? {
                if key == root.object || !self.store.change_type(&key)?.is_pending() {
                    continue;
                }
                closure.entry(key).or_default().insert(root.id);
            }
        }
        for explicit in cs.explicit_items() {
            closure.remove(&explicit.object);
        }
        Ok(closure)
    }

    /// Reconcile recorded items with the closure.
    pub fn sync(&self, cs: &mut ChangeSet) -> Result<SyncReport> {
        cs.ensure_open()?;
        let mut closure = self.closure(cs)?;
        let mut report = SyncReport::default();

        let recorded: Vec<ObjectKey> = cs
            .items()
            .filter(|item| item.added != AddedMode::Explicit)
            .map(|item| item.object.clone())
            .collect();
        for key in recorded {
            match closure.remove(&key) {
                None => {
                    cs.remove(&key);
                    report.removed.push(key);
                }
                Some(refs) => {
                    if let Some(item) = cs.item_mut(&key)
                        && (item.referenced_by != refs || item.added != AddedMode::Implicit)
                    {
                        item.referenced_by = refs;
                        item.added = AddedMode::Implicit;
                        report.updated.push(key);
                    }
                }
            }
        }
        for (key, refs) in closure {
            cs.insert_implicit(key.clone(), refs);
            report.added.push(key);
        }

        tracing::debug!(
            target: "stageset.sync",
            change_set_id = %cs.id,
            added = report.added.len(),
            removed = report.removed.len(),
            updated = report.updated.len(),
            items = cs.len(),
            "sync completed"
        );
        Ok(report)
    }

    /// Compare recorded items with the closure without mutating `cs`.
    pub fn diff(&self, cs: &ChangeSet) -> Result<SyncDiff> {
        let mut closure = self.closure(cs)?;
        let mut diff = SyncDiff::default();
        for item in cs.items().filter(|item| item.added != AddedMode::Explicit) {
            match closure.remove(&item.object) {
                None => diff.extra.push(item.object.clone()),
                Some(refs) if refs != item.referenced_by => {
                    diff.drifted.push(item.object.clone())
                }
                Some(_) => {}
            }
        }
        diff.missing = closure.into_keys().collect();
        Ok(diff)
    }

    pub fn is_synced(&self, cs: &ChangeSet) -> Result<bool> {
        Ok(self.diff(cs)?.is_clean())
    }

    fn referenced_from(&self, root: &ObjectKey) -> Result<Vec<ObjectKey>> {
        if let Some(record) = self.store.draft(root)? {
            return self.owned_descendants(record);
        }
        match self.store.record(Stage::Live, root)? {
            Some(record) => self.live_owners(&record),
            None => Ok(Vec::new()),
        }
    }

    /// Breadth-first walk of owned relations on draft. Cycles stop at the visited set.
    fn owned_descendants(&self, start: ObjectRecord) -> Result<Vec<ObjectKey>> {
        let mut visited = BTreeSet::from([start.key.clone()]);
        let mut queue = VecDeque::from([start]);
        let mut reached = Vec::new();

        while let Some(record) = queue.pop_front() {
            for edge in self.schema.owned_relations_of(&record.class_name)? {
                for target in self.store.related_objects(Stage::Draft, &record, &edge)? {
                    if visited.contains(&target) {
                        continue;
                    }
                    let Some(target_record) = self.store.draft(&target)? else {
                        continue;
                    };
                    if !self.schema.is_a(&target_record.class_name, &edge.target_type)? {
                        continue;
                    }
                    visited.insert(target.clone());
                    reached.push(target);
                    queue.push_back(target_record);
                }
            }
        }
        Ok(reached)
    }

    /// Direct owners on live of an object that no longer exists on draft.
    fn live_owners(&self, record: &ObjectRecord) -> Result<Vec<ObjectKey>> {
        let mut owners = BTreeSet::new();
        for edge in self.schema.owning_relations_of(&record.class_name)? {
            for owner in self.store.referencing_objects(Stage::Live, record, &edge)? {
                let Some(owner_record) = self.store.record(Stage::Live, &owner)? else {
                    continue;
                };
                if self.schema.is_a(&owner_record.class_name, &edge.owner_type)? {
                    owners.insert(owner);
                }
            }
        }
        Ok(owners.into_iter().collect())
    }
}
