//! Actors, per-object permission policies, and changeset-level aggregation.
//!
//! There is no ambient session: every check takes the [`Actor`] explicitly.
//!
//! | Check                          | Rule                                             |
//! |--------------------------------|--------------------------------------------------|
//! | create / view / edit / delete  | actor holds the manage-changesets permission     |
//! | publish                        | every item's object grants `Publish` to the actor |
//! | revert                         | not supported                                    |

use crate::changeset::ChangeSet;
use crate::error::{ChangeSetError, Result};
use crate::object::{ObjectRecord, Stage};
use crate::schema::OwnershipSchema;
use crate::store::VersionedStore;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Permission code that passes every check.
pub const ADMIN_PERMISSION: &str = "ADMIN";

/// Default code for the coarse manage-changesets capability.
pub const DEFAULT_MANAGE_PERMISSION: &str = "CMS_ACCESS_CampaignAdmin";

/// Whoever is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub permissions: BTreeSet<String>,
}

impl Actor {
    pub fn new<I, P>(id: impl Into<String>, permissions: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        Self {
            id: id.into(),
            permissions: permissions.into_iter().map(Into::into).collect(),
        }
    }

    /// An actor with no permissions at all.
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            permissions: BTreeSet::new(),
        }
    }

    pub fn is_admin(&self) -> bool {
        self.permissions.contains(ADMIN_PERMISSION)
    }

    /// Whether the actor holds `code` (or is an admin).
    pub fn has_permission(&self, code: &str) -> bool {
        self.is_admin() || self.permissions.contains(code)
    }

    pub fn has_any_permission<'c>(&self, codes: impl IntoIterator<Item = &'c str>) -> bool {
        self.is_admin() || codes.into_iter().any(|code| self.permissions.contains(code))
    }
}

/// Object-level actions a policy can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    View,
    Edit,
    Create,
    Delete,
    Publish,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::View => "view",
            Capability::Edit => "edit",
            Capability::Create => "create",
            Capability::Delete => "delete",
            Capability::Publish => "publish",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-object-type permission check.
pub trait ObjectPermission: Send + Sync {
    fn check(&self, record: &ObjectRecord, capability: Capability, actor: &Actor) -> bool;
}

/// Grants a capability when the actor holds any of its listed codes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionCodePolicy {
    codes: BTreeMap<Capability, Vec<String>>,
}

impl PermissionCodePolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, capability: Capability, code: impl Into<String>) -> Self {
        self.codes.entry(capability).or_default().push(code.into());
        self
    }

    /// Same code list for every capability.
    pub fn uniform<I, P>(codes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        let codes: Vec<String> = codes.into_iter().map(Into::into).collect();
        let mut policy = Self::default();
        for capability in [
            Capability::View,
            Capability::Edit,
            Capability::Create,
            Capability::Delete,
            Capability::Publish,
        ] {
            policy.codes.insert(capability, codes.clone());
        }
        policy
    }

    pub fn codes(&self, capability: Capability) -> &[String] {
        self.codes
            .get(&capability)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl ObjectPermission for PermissionCodePolicy {
    fn check(&self, _record: &ObjectRecord, capability: Capability, actor: &Actor) -> bool {
        actor.has_any_permission(self.codes(capability).iter().map(String::as_str))
    }
}

/// Policies by type name, resolved through the inheritance chain.
#[derive(Default)]
pub struct PolicyRegistry {
    policies: BTreeMap<String, Box<dyn ObjectPermission>>,
}

impl PolicyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        type_name: impl Into<String>,
        policy: impl ObjectPermission + 'static,
    ) -> &mut Self {
        self.policies.insert(type_name.into(), Box::new(policy));
        self
    }

    /// Nearest policy on the lineage of `class_name`, if any.
    pub fn resolve(
        &self,
        schema: &OwnershipSchema,
        class_name: &str,
    ) -> Result<Option<&dyn ObjectPermission>> {
        for name in schema.lineage(class_name)? {
            if let Some(policy) = self.policies.get(name) {
                return Ok(Some(policy.as_ref()));
            }
        }
        Ok(None)
    }

    /// Run one object check. Types without a policy deny.
    pub fn check(
        &self,
        schema: &OwnershipSchema,
        record: &ObjectRecord,
        capability: Capability,
        actor: &Actor,
    ) -> Result<bool> {
        Ok(self
            .resolve(schema, &record.class_name)?
            .is_some_and(|policy| policy.check(record, capability, actor)))
    }
}

/// Changeset-level rights composed from the coarse capability and per-item checks.
pub struct PermissionAggregator<'a> {
    schema: &'a OwnershipSchema,
    policies: &'a PolicyRegistry,
    manage_permission: &'a str,
}

impl<'a> PermissionAggregator<'a> {
    pub fn new(
        schema: &'a OwnershipSchema,
        policies: &'a PolicyRegistry,
        manage_permission: &'a str,
    ) -> Self {
        Self {
            schema,
            policies,
            manage_permission,
        }
    }

    pub fn can_create(&self, actor: &Actor) -> bool {
        actor.has_permission(self.manage_permission)
    }

    pub fn can_view(&self, _cs: &ChangeSet, actor: &Actor) -> bool {
        actor.has_permission(self.manage_permission)
    }

    pub fn can_edit(&self, _cs: &ChangeSet, actor: &Actor) -> bool {
        actor.has_permission(self.manage_permission)
    }

    pub fn can_delete(&self, _cs: &ChangeSet, actor: &Actor) -> bool {
        actor.has_permission(self.manage_permission)
    }

    /// Every item's object must grant `Publish`. Vacuously true when empty.
    ///
    /// Objects are checked as they exist on draft, or on live for objects
    /// deleted from draft. An item whose object exists on neither stage has
    /// nothing to publish and is skipped.
    pub fn can_publish<S: VersionedStore + ?Sized>(
        &self,
        store: &S,
        cs: &ChangeSet,
        actor: &Actor,
    ) -> Result<bool> {
        for item in cs.items() {
            let record = match store.draft(&item.object)? {
                Some(record) => Some(record),
                None => store.record(Stage::Live, &item.object)?,
            };
            let Some(record) = record else {
                continue;
            };
            let allowed = self
                .policies
                .check(self.schema, &record, Capability::Publish, actor)?;
            if !allowed {
                tracing::debug!(
                    target: "stageset.permission",
                    change_set_id = %cs.id,
                    actor = %actor.id,
                    object = %item.object,
                    "publish denied by item"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn can_revert(&self, _cs: &ChangeSet, _actor: &Actor) -> Result<bool> {
        Err(ChangeSetError::NotSupported("changeset revert"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ObjectKey;

    fn schema() -> OwnershipSchema {
        OwnershipSchema::builder()
            .declare("Base")
            .declare("End")
            .extend("EndChild", "End")
            .build()
            .expect("schema should build")
    }

    fn record(class_name: &str, base: &str) -> ObjectRecord {
        ObjectRecord {
            key: ObjectKey::new(base, 1),
            class_name: class_name.to_string(),
            revision: 1,
            fields: BTreeMap::new(),
        }
    }

    #[test]
    fn admin_passes_every_code_check() {
        let admin = Actor::new("root", ["ADMIN"]);
        assert!(admin.has_permission("anything"));
        assert!(admin.has_any_permission([]));
        assert!(!Actor::anonymous().has_permission("anything"));
    }

    #[test]
    fn code_policy_grants_listed_capabilities_only() {
        let policy = PermissionCodePolicy::new()
            .grant(Capability::Publish, "PERM_canPublish")
            .grant(Capability::Publish, "CAN_ALL");
        let publisher = Actor::new("p", ["PERM_canPublish"]);
        let catch_all = Actor::new("c", ["CAN_ALL"]);
        let base = record("Base", "Base");

        assert!(policy.check(&base, Capability::Publish, &publisher));
        assert!(policy.check(&base, Capability::Publish, &catch_all));
        assert!(!policy.check(&base, Capability::Edit, &publisher));
    }

    #[test]
    fn registry_resolves_through_lineage_and_denies_unknown() {
        let schema = schema();
        let mut registry = PolicyRegistry::new();
        registry.register("End", PermissionCodePolicy::uniform(["END_ALL"]));
        let actor = Actor::new("a", ["END_ALL"]);

        let child = record("EndChild", "End");
        assert!(
            registry
                .check(&schema, &child, Capability::Publish, &actor)
                .expect("declared type")
        );

        let base = record("Base", "Base");
        assert!(
            !registry
                .check(&schema, &base, Capability::Publish, &actor)
                .expect("declared type")
        );
    }

    #[test]
    fn coarse_checks_use_manage_permission() {
        let schema = schema();
        let registry = PolicyRegistry::new();
        let aggregator = PermissionAggregator::new(&schema, &registry, DEFAULT_MANAGE_PERMISSION);
        let cs = ChangeSet::new("campaign", "alice");

        let manager = Actor::new("m", [DEFAULT_MANAGE_PERMISSION]);
        let stranger = Actor::new("s", ["SomeWrongPermission"]);

        assert!(aggregator.can_create(&manager));
        assert!(aggregator.can_view(&cs, &manager));
        assert!(aggregator.can_edit(&cs, &manager));
        assert!(aggregator.can_delete(&cs, &manager));
        assert!(!aggregator.can_create(&stranger));
        assert!(!aggregator.can_view(&cs, &stranger));
        assert!(!aggregator.can_edit(&cs, &Actor::anonymous()));
        assert!(!aggregator.can_delete(&cs, &Actor::anonymous()));
    }

    #[test]
    fn can_revert_is_not_supported() {
        let schema = schema();
        let registry = PolicyRegistry::new();
        let aggregator = PermissionAggregator::new(&schema, &registry, DEFAULT_MANAGE_PERMISSION);
        let cs = ChangeSet::new("campaign", "alice");
        let err = aggregator
            .can_revert(&cs, &Actor::new("root", ["ADMIN"]))
            .expect_err("revert is not implemented");
        assert!(matches!(err, ChangeSetError::NotSupported(_)));
    }
}
