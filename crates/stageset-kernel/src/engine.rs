//! The upward interface: one handle bundling schema, policies, and config.
//!
//! Every mutating call checks the coarse changeset capability before it
//! touches the changeset; publish adds the per-item check on top.

use crate::changeset::{AddedMode, ChangeSet, ChangeSetItem};
use crate::error::{ChangeSetError, Result};
use crate::object::{ChangeType, ObjectKey, ObjectRecord, Stage};
use crate::permission::{
    Actor, Capability, DEFAULT_MANAGE_PERMISSION, PermissionAggregator, PolicyRegistry,
};
use crate::publish::{PublishPlan, PublishReport, Publisher, StaleSyncPolicy};
use crate::schema::OwnershipSchema;
use crate::store::VersionedStore;
use crate::sync::{SyncDiff, SyncReport, Synchronizer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Permission code granting create/view/edit/delete on changesets.
    pub manage_permission: String,
    pub stale_sync: StaleSyncPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            manage_permission: DEFAULT_MANAGE_PERMISSION.to_string(),
            stale_sync: StaleSyncPolicy::default(),
        }
    }
}

/// An item joined with the current state of its object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemStatus {
    pub id: u64,
    pub object: ObjectKey,
    pub added: AddedMode,
    pub change_type: ChangeType,
    pub draft_revision: u64,
    pub live_revision: u64,
    pub version_before: u64,
    pub version_after: u64,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub referenced_by: BTreeSet<u64>,
}

pub struct ChangeSetEngine {
    schema: OwnershipSchema,
    policies: PolicyRegistry,
    config: EngineConfig,
}

impl ChangeSetEngine {
    pub fn new(schema: OwnershipSchema, policies: PolicyRegistry, config: EngineConfig) -> Self {
        Self {
            schema,
            policies,
            config,
        }
    }

    pub fn schema(&self) -> &OwnershipSchema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn permissions(&self) -> PermissionAggregator<'_> {
        PermissionAggregator::new(&self.schema, &self.policies, &self.config.manage_permission)
    }

    fn synchronizer<'a, S: VersionedStore + ?Sized>(&'a self, store: &'a S) -> Synchronizer<'a, S> {
        Synchronizer::new(&self.schema, store)
    }

    fn publisher(&self) -> Publisher<'_> {
        Publisher::new(&self.schema, self.permissions(), self.config.stale_sync)
    }

    pub fn create(&self, title: impl Into<String>, actor: &Actor) -> Result<ChangeSet> {
        if !self.permissions().can_create(actor) {
            return Err(denied(Uuid::nil(), actor, "create"));
        }
        let cs = ChangeSet::new(title, actor.id.clone());
        tracing::info!(
            target: "stageset.sync",
            change_set_id = %cs.id,
            actor = %actor.id,
            "changeset created"
        );
        Ok(cs)
    }

    pub fn add_object<S: VersionedStore + ?Sized>(
        &self,
        store: &S,
        cs: &mut ChangeSet,
        key: &ObjectKey,
        actor: &Actor,
    ) -> Result<bool> {
        self.require_edit(cs, actor)?;
        self.synchronizer(store).add_object(cs, key)
    }

    pub fn remove_object<S: VersionedStore + ?Sized>(
        &self,
        store: &S,
        cs: &mut ChangeSet,
        key: &ObjectKey,
        actor: &Actor,
    ) -> Result<bool> {
        self.require_edit(cs, actor)?;
        self.synchronizer(store).remove_object(cs, key)
    }

    pub fn sync<S: VersionedStore + ?Sized>(
        &self,
        store: &S,
        cs: &mut ChangeSet,
        actor: &Actor,
    ) -> Result<SyncReport> {
        self.require_edit(cs, actor)?;
        self.synchronizer(store).sync(cs)
    }

    pub fn is_synced<S: VersionedStore + ?Sized>(&self, store: &S, cs: &ChangeSet) -> Result<bool> {
        self.synchronizer(store).is_synced(cs)
    }

    pub fn diff<S: VersionedStore + ?Sized>(&self, store: &S, cs: &ChangeSet) -> Result<SyncDiff> {
        self.synchronizer(store).diff(cs)
    }

    pub fn can_create(&self, actor: &Actor) -> bool {
        self.permissions().can_create(actor)
    }

    pub fn can_view(&self, cs: &ChangeSet, actor: &Actor) -> bool {
        self.permissions().can_view(cs, actor)
    }

    pub fn can_edit(&self, cs: &ChangeSet, actor: &Actor) -> bool {
        self.permissions().can_edit(cs, actor)
    }

    pub fn can_delete(&self, cs: &ChangeSet, actor: &Actor) -> bool {
        self.permissions().can_delete(cs, actor)
    }

    pub fn can_publish<S: VersionedStore + ?Sized>(
        &self,
        store: &S,
        cs: &ChangeSet,
        actor: &Actor,
    ) -> Result<bool> {
        self.permissions().can_publish(store, cs, actor)
    }

    pub fn can_revert(&self, cs: &ChangeSet, actor: &Actor) -> Result<bool> {
        self.permissions().can_revert(cs, actor)
    }

    /// Object-level check through the registered policies.
    pub fn object_allowed(
        &self,
        record: &ObjectRecord,
        capability: Capability,
        actor: &Actor,
    ) -> Result<bool> {
        self.policies.check(&self.schema, record, capability, actor)
    }

    pub fn plan<S: VersionedStore + ?Sized>(&self, store: &S, cs: &ChangeSet) -> Result<PublishPlan> {
        self.publisher().plan(store, cs)
    }

    pub fn publish<S: VersionedStore + ?Sized>(
        &self,
        store: &mut S,
        cs: &mut ChangeSet,
        actor: &Actor,
    ) -> Result<PublishReport> {
        self.publisher().publish(store, cs, actor)
    }

    /// Items in key order, with the live/draft state of each object.
    pub fn items<S: VersionedStore + ?Sized>(
        &self,
        store: &S,
        cs: &ChangeSet,
    ) -> Result<Vec<ItemStatus>> {
        cs.items()
            .map(|item| item_status(store, item))
            .collect()
    }

    fn require_edit(&self, cs: &ChangeSet, actor: &Actor) -> Result<()> {
        if self.permissions().can_edit(cs, actor) {
            Ok(())
        } else {
            Err(denied(cs.id, actor, "edit"))
        }
    }
}

fn item_status<S: VersionedStore + ?Sized>(store: &S, item: &ChangeSetItem) -> Result<ItemStatus> {
    let draft_revision = store.revision(Stage::Draft, &item.object)?;
    let live_revision = store.live_revision(&item.object)?;
    Ok(ItemStatus {
        id: item.id,
        object: item.object.clone(),
        added: item.added,
        change_type: ChangeType::from_revisions(draft_revision, live_revision),
        draft_revision,
        live_revision,
        version_before: item.version_before,
        version_after: item.version_after,
        referenced_by: item.referenced_by.clone(),
    })
}

fn denied(change_set_id: Uuid, actor: &Actor, action: &'static str) -> ChangeSetError {
    ChangeSetError::PermissionDenied {
        change_set_id,
        actor: actor.id.clone(),
        action,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ChangeSetEngine {
        let schema = OwnershipSchema::builder()
            .declare("Base")
            .build()
            .expect("schema should build");
        ChangeSetEngine::new(schema, PolicyRegistry::new(), EngineConfig::default())
    }

    #[test]
    fn config_defaults_fill_missing_fields() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"stale_sync":"resync"}"#).expect("config should parse");
        assert_eq!(config.manage_permission, DEFAULT_MANAGE_PERMISSION);
        assert_eq!(config.stale_sync, StaleSyncPolicy::Resync);
    }

    #[test]
    fn create_requires_manage_permission() {
        let engine = engine();
        let err = engine
            .create("campaign", &Actor::new("eve", ["SomeWrongPermission"]))
            .expect_err("create should be denied");
        assert_eq!(err.kind(), "permission_denied");

        let cs = engine
            .create("campaign", &Actor::new("alice", [DEFAULT_MANAGE_PERMISSION]))
            .expect("manager may create");
        assert_eq!(cs.created_by, "alice");
        assert!(cs.is_open());
    }
}
