//! Publish orchestration: draft → live for every item, as one transaction.
//!
//! | Step            | Effect                                                        |
//! |-----------------|---------------------------------------------------------------|
//! | guard           | state must be open, actor must pass `can_publish`, items synced |
//! | plan            | `version_before` and an action per item from its change type  |
//! | order           | referenced objects before the objects holding the reference   |
//! | apply           | publish/unpublish inside a `StoreTransaction`                 |
//! | disassociate    | clear live links from owners to objects dropped on draft      |
//! | stamp           | `version_after`, state `published`, after commit only         |
//!
//! Nothing on the changeset changes until the store has committed; any error
//! before that drops the transaction guard, which rolls the store back.

use crate::changeset::ChangeSet;
use crate::error::{ChangeSetError, Result};
use crate::object::{ChangeType, ObjectKey, Stage};
use crate::permission::{Actor, PermissionAggregator};
use crate::schema::{Cardinality, OwnershipSchema};
use crate::store::{StoreTransaction, VersionedStore};
use crate::sync::{SyncReport, Synchronizer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// What `publish` does with a changeset whose items no longer match draft.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleSyncPolicy {
    /// Fail with `StaleSync` and leave everything untouched.
    #[default]
    Reject,
    /// Sync first, then publish the refreshed item set.
    Resync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishAction {
    /// Copy draft to live.
    Publish,
    /// Remove from live.
    Unpublish,
    /// Draft and live already agree.
    Keep,
}

impl PublishAction {
    pub fn from_change_type(change: ChangeType) -> Self {
        match change {
            ChangeType::Created | ChangeType::Modified => PublishAction::Publish,
            ChangeType::Deleted => PublishAction::Unpublish,
            ChangeType::None => PublishAction::Keep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedStep {
    pub object: ObjectKey,
    pub action: PublishAction,
    pub version_before: u64,
}

/// Steps in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PublishPlan {
    pub steps: Vec<PlannedStep>,
}

/// A live link cleared because the owner no longer holds the object on draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Disassociation {
    pub object: ObjectKey,
    pub field: String,
    pub former_owner: ObjectKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishReport {
    pub change_set_id: Uuid,
    pub order: Vec<ObjectKey>,
    pub published: Vec<ObjectKey>,
    pub unpublished: Vec<ObjectKey>,
    pub unlinked: Vec<Disassociation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resync: Option<SyncReport>,
}

pub struct Publisher<'a> {
    schema: &'a OwnershipSchema,
    permissions: PermissionAggregator<'a>,
    stale_sync: StaleSyncPolicy,
}

impl<'a> Publisher<'a> {
    pub fn new(
        schema: &'a OwnershipSchema,
        permissions: PermissionAggregator<'a>,
        stale_sync: StaleSyncPolicy,
    ) -> Self {
        Self {
            schema,
            permissions,
            stale_sync,
        }
    }

    /// Publish every item of `cs` and close it.
    ///
    /// Errors leave both `store` and `cs` as they were.
    pub fn publish<S: VersionedStore + ?Sized>(
        &self,
        store: &mut S,
        cs: &mut ChangeSet,
        actor: &Actor,
    ) -> Result<PublishReport> {
        cs.ensure_open()?;

        let mut working = cs.clone();
        let resync = match self.stale_sync {
            StaleSyncPolicy::Resync => {
                Some(Synchronizer::new(self.schema, &*store).sync(&mut working)?)
            }
            StaleSyncPolicy::Reject => None,
        };

        if !self.permissions.can_publish(&*store, &working, actor)? {
            return Err(ChangeSetError::PermissionDenied {
                change_set_id: cs.id,
                actor: actor.id.clone(),
                action: "publish",
            });
        }

        if self.stale_sync == StaleSyncPolicy::Reject {
            let diff = Synchronizer::new(self.schema, &*store).diff(&working)?;
            if !diff.is_clean() {
                let mut extra = diff.extra;
                extra.extend(diff.drifted);
                return Err(ChangeSetError::StaleSync {
                    change_set_id: cs.id,
                    missing: diff.missing,
                    extra,
                });
            }
        }

        let plan = self.plan(&*store, &working)?;
        let mut report = PublishReport {
            change_set_id: cs.id,
            order: plan.steps.iter().map(|step| step.object.clone()).collect(),
            published: Vec::new(),
            unpublished: Vec::new(),
            unlinked: Vec::new(),
            resync,
        };

        let mut tx = StoreTransaction::begin(store)?;
        let mut stamps = BTreeMap::new();
        for step in &plan.steps {
            let after = match step.action {
                PublishAction::Publish => {
                    let revision = tx.write_draft_to_live(&step.object)?;
                    report.published.push(step.object.clone());
                    revision
                }
                PublishAction::Unpublish => {
                    tx.remove_from_live(&step.object)?;
                    report.unpublished.push(step.object.clone());
                    0
                }
                PublishAction::Keep => step.version_before,
            };
            stamps.insert(step.object.clone(), (step.version_before, after));
        }
        report.unlinked = self.disassociate(&mut *tx, &working)?;
        tx.commit()?;

        working.mark_published(&stamps, &actor.id);
        *cs = working;

        tracing::info!(
            target: "stageset.publish",
            change_set_id = %cs.id,
            actor = %actor.id,
            published = report.published.len(),
            unpublished = report.unpublished.len(),
            unlinked = report.unlinked.len(),
            "changeset published"
        );
        Ok(report)
    }

    /// Actions and pre-publish revisions for every item, in execution order.
    ///
    /// Publishes (and no-op keeps) run in dependency order; unpublishes run
    /// afterwards in reverse dependency order.
    pub fn plan<S: VersionedStore + ?Sized>(&self, store: &S, cs: &ChangeSet) -> Result<PublishPlan> {
        let order = self.order(store, cs)?;
        let mut writes = Vec::new();
        let mut removals = Vec::new();
        for object in order {
            let step = PlannedStep {
                version_before: store.live_revision(&object)?,
                action: PublishAction::from_change_type(store.change_type(&object)?),
                object,
            };
            if step.action == PublishAction::Unpublish {
                removals.push(step);
            } else {
                writes.push(step);
            }
        }
        removals.reverse();
        writes.extend(removals);
        Ok(PublishPlan { steps: writes })
    }

    /// Topological order over items: an object holding a foreign key to
    /// another item comes after it. Ties and cycle leftovers go in key order.
    pub fn order<S: VersionedStore + ?Sized>(
        &self,
        store: &S,
        cs: &ChangeSet,
    ) -> Result<Vec<ObjectKey>> {
        let keys: BTreeSet<ObjectKey> = cs.items().map(|item| item.object.clone()).collect();
        let mut prerequisites: BTreeMap<ObjectKey, BTreeSet<ObjectKey>> = keys
            .iter()
            .map(|key| (key.clone(), BTreeSet::new()))
            .collect();

        for key in &keys {
            let (stage, record) = match store.draft(key)? {
                Some(record) => (Stage::Draft, record),
                None => match store.record(Stage::Live, key)? {
                    Some(record) => (Stage::Live, record),
                    None => continue,
                },
            };
            for edge in self.schema.relations_of(&record.class_name)? {
                for target in store.related_objects(stage, &record, &edge)? {
                    if target == *key || !keys.contains(&target) {
                        continue;
                    }
                    let (first, then) = match edge.cardinality {
                        Cardinality::One => (target, key.clone()),
                        Cardinality::Many => (key.clone(), target),
                    };
                    if let Some(deps) = prerequisites.get_mut(&then) {
                        deps.insert(first);
                    }
                }
            }
        }

        let mut order = Vec::with_capacity(keys.len());
        let mut ready: BTreeSet<ObjectKey> = prerequisites
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &ready {
            prerequisites.remove(key);
        }

        while let Some(next) = ready.pop_first() {
            let mut unblocked = Vec::new();
            for (key, deps) in prerequisites.iter_mut() {
                if deps.remove(&next) && deps.is_empty() {
                    unblocked.push(key.clone());
                }
            }
            for key in unblocked {
                prerequisites.remove(&key);
                ready.insert(key);
            }
            order.push(next);
        }

        if !prerequisites.is_empty() {
            tracing::warn!(
                target: "stageset.publish",
                change_set_id = %cs.id,
                cyclic = prerequisites.len(),
                "reference cycle among items; publishing the rest in key order"
            );
            order.extend(prerequisites.into_keys());
        }
        Ok(order)
    }

    /// Clear live links from item owners to objects their draft no longer holds.
    fn disassociate<S: VersionedStore + ?Sized>(
        &self,
        store: &mut S,
        cs: &ChangeSet,
    ) -> Result<Vec<Disassociation>> {
        let mut unlinked = Vec::new();
        for item in cs.items() {
            let Some(owner) = store.draft(&item.object)? else {
                continue;
            };
            for edge in self.schema.owned_relations_of(&owner.class_name)? {
                if edge.cardinality != Cardinality::Many {
                    continue;
                }
                let kept: BTreeSet<ObjectKey> = store
                    .related_objects(Stage::Draft, &owner, &edge)?
                    .into_iter()
                    .collect();
                for linked in store.related_objects(Stage::Live, &owner, &edge)? {
                    if kept.contains(&linked) {
                        continue;
                    }
                    let Some(live) = store.record(Stage::Live, &linked)? else {
                        continue;
                    };
                    if !self.schema.is_a(&live.class_name, &edge.target_type)? {
                        continue;
                    }
                    store.clear_foreign_key(&linked, &edge.foreign_key)?;
                    unlinked.push(Disassociation {
                        object: linked,
                        field: edge.foreign_key.clone(),
                        former_owner: item.object.clone(),
                    });
                }
            }
        }
        Ok(unlinked)
    }
}
