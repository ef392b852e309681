//! Ownership schema: declared object types, inheritance, and typed relations.
//!
//! The schema is plain data. Relations are kept as a table of
//! [`OwnershipEdge`]s per declared type; nothing is resolved through
//! trait dispatch, so the synchronizer and the publish ordering are
//! ordinary graph walks over this table.
//!
//! Lookups are inheritance-aware: a subtype sees every relation declared on
//! its ancestors. Querying an undeclared type is a configuration error.

use crate::error::{ChangeSetError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How many targets one owner can link to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// The owner holds the foreign key.
    One,
    /// Each target holds a foreign key back to the owner.
    Many,
}

/// A declared relation from `owner_type` to `target_type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipEdge {
    pub owner_type: String,
    /// Base type of `owner_type`; the key space owners are looked up in.
    pub owner_base_type: String,
    pub relation: String,
    pub target_type: String,
    /// Base type of `target_type`; the key space targets are looked up in.
    pub target_base_type: String,
    pub cardinality: Cardinality,
    /// Changes to the target travel with changes to the owner.
    pub owned: bool,
    /// Integer link field: on the owner for `One`, on the target for `Many`.
    pub foreign_key: String,
}

/// A declared object type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub edges: Vec<OwnershipEdge>,
}

/// Validated, inheritance-aware relation table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipSchema {
    types: BTreeMap<String, TypeDecl>,
}

impl OwnershipSchema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Whether `type_name` is declared.
    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Declared types in name order.
    pub fn types(&self) -> impl Iterator<Item = &TypeDecl> {
        self.types.values()
    }

    /// The type followed by its ancestors, nearest first.
    pub fn lineage(&self, type_name: &str) -> Result<Vec<&str>> {
        let mut lineage = Vec::new();
        let mut current = Some(self.decl(type_name)?);
        while let Some(decl) = current {
            lineage.push(decl.name.as_str());
            current = match decl.extends.as_deref() {
                Some(parent) => Some(self.decl(parent)?),
                None => None,
            };
        }
        Ok(lineage)
    }

    /// Root of the inheritance chain; the key space objects of this type live in.
    pub fn base_type(&self, type_name: &str) -> Result<&str> {
        let lineage = self.lineage(type_name)?;
        lineage
            .last()
            .copied()
            .ok_or_else(|| unknown_type(type_name))
    }

    /// Whether `type_name` is `ancestor` or inherits from it.
    pub fn is_a(&self, type_name: &str, ancestor: &str) -> Result<bool> {
        Ok(self.lineage(type_name)?.contains(&ancestor))
    }

    /// Every relation visible on `type_name`, owned or not, ancestors last.
    pub fn relations_of(&self, type_name: &str) -> Result<Vec<OwnershipEdge>> {
        let mut edges = Vec::new();
        for name in self.lineage(type_name)? {
            edges.extend(self.decl(name)?.edges.iter().cloned());
        }
        Ok(edges)
    }

    /// Owned relations visible on `type_name`.
    pub fn owned_relations_of(&self, type_name: &str) -> Result<Vec<OwnershipEdge>> {
        Ok(self
            .relations_of(type_name)?
            .into_iter()
            .filter(|edge| edge.owned)
            .collect())
    }

    /// Reverse walk: owned relations, anywhere in the schema, that can target `type_name`.
    pub fn owning_relations_of(&self, type_name: &str) -> Result<Vec<OwnershipEdge>> {
        let lineage: BTreeSet<&str> = self.lineage(type_name)?.into_iter().collect();
        Ok(self
            .types
            .values()
            .flat_map(|decl| decl.edges.iter())
            .filter(|edge| edge.owned && lineage.contains(edge.target_type.as_str()))
            .cloned()
            .collect())
    }

    fn decl(&self, type_name: &str) -> Result<&TypeDecl> {
        self.types
            .get(type_name)
            .ok_or_else(|| unknown_type(type_name))
    }
}

fn unknown_type(type_name: &str) -> ChangeSetError {
    ChangeSetError::Configuration(format!("unknown object type `{type_name}`"))
}

struct PendingEdge {
    owner_type: String,
    relation: String,
    target_type: String,
    cardinality: Cardinality,
    owned: bool,
    foreign_key: Option<String>,
}

/// Collects declarations; all consistency checks run in [`SchemaBuilder::build`].
#[derive(Default)]
pub struct SchemaBuilder {
    types: Vec<(String, Option<String>)>,
    edges: Vec<PendingEdge>,
}

impl SchemaBuilder {
    /// Declare a root type.
    pub fn declare(mut self, name: impl Into<String>) -> Self {
        self.types.push((name.into(), None));
        self
    }

    /// Declare a type inheriting from `parent`.
    pub fn extend(mut self, name: impl Into<String>, parent: impl Into<String>) -> Self {
        self.types.push((name.into(), Some(parent.into())));
        self
    }

    /// Owned single link; the owner holds `{relation}_id`.
    pub fn owns_one(self, owner: &str, relation: &str, target: &str) -> Self {
        self.relation(owner, relation, target, Cardinality::One, true, None)
    }

    /// Owned collection; each target holds `foreign_key` pointing at the owner.
    pub fn owns_many(self, owner: &str, relation: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(
            owner,
            relation,
            target,
            Cardinality::Many,
            true,
            Some(foreign_key.to_string()),
        )
    }

    /// Unowned single link; participates in publish ordering only.
    pub fn has_one(self, owner: &str, relation: &str, target: &str) -> Self {
        self.relation(owner, relation, target, Cardinality::One, false, None)
    }

    /// Unowned collection; participates in publish ordering only.
    pub fn has_many(self, owner: &str, relation: &str, target: &str, foreign_key: &str) -> Self {
        self.relation(
            owner,
            relation,
            target,
            Cardinality::Many,
            false,
            Some(foreign_key.to_string()),
        )
    }

    /// General form. `foreign_key` defaults to `{relation}_id` for `One`.
    pub fn relation(
        mut self,
        owner: &str,
        relation: &str,
        target: &str,
        cardinality: Cardinality,
        owned: bool,
        foreign_key: Option<String>,
    ) -> Self {
        self.edges.push(PendingEdge {
            owner_type: owner.to_string(),
            relation: relation.to_string(),
            target_type: target.to_string(),
            cardinality,
            owned,
            foreign_key,
        });
        self
    }

    /// Validate declarations and produce the schema.
    ///
    /// Rejects duplicate types, unknown parents or targets, inheritance
    /// cycles, duplicate relation names on one type, and `Many` relations
    /// without a foreign key.
    pub fn build(self) -> Result<OwnershipSchema> {
        let mut types = BTreeMap::new();
        for (name, extends) in self.types {
            if types.contains_key(&name) {
                return Err(ChangeSetError::Configuration(format!(
                    "object type `{name}` declared twice"
                )));
            }
            types.insert(
                name.clone(),
                TypeDecl {
                    name,
                    extends,
                    edges: Vec::new(),
                },
            );
        }

        let mut schema = OwnershipSchema { types };
        for decl in schema.types.values() {
            if let Some(parent) = &decl.extends
                && !schema.contains(parent)
            {
                return Err(ChangeSetError::Configuration(format!(
                    "object type `{}` extends unknown type `{parent}`",
                    decl.name
                )));
            }
        }
        for name in schema.types.keys() {
            check_acyclic(&schema, name)?;
        }

        for pending in self.edges {
            let target_base_type = schema.base_type(&pending.target_type)?.to_string();
            let owner_base_type = schema.base_type(&pending.owner_type)?.to_string();
            let foreign_key = match (pending.cardinality, pending.foreign_key) {
                (_, Some(fk)) if !fk.is_empty() => fk,
                (Cardinality::One, _) => format!("{}_id", pending.relation),
                (Cardinality::Many, _) => {
                    return Err(ChangeSetError::Configuration(format!(
                        "relation `{}.{}` is a collection and needs a foreign key",
                        pending.owner_type, pending.relation
                    )));
                }
            };
            let visible = schema.relations_of(&pending.owner_type)?;
            if visible.iter().any(|edge| edge.relation == pending.relation) {
                return Err(ChangeSetError::Configuration(format!(
                    "relation `{}.{}` declared twice",
                    pending.owner_type, pending.relation
                )));
            }

            let edge = OwnershipEdge {
                owner_type: pending.owner_type.clone(),
                owner_base_type,
                relation: pending.relation,
                target_type: pending.target_type,
                target_base_type,
                cardinality: pending.cardinality,
                owned: pending.owned,
                foreign_key,
            };
            if let Some(decl) = schema.types.get_mut(&pending.owner_type) {
                decl.edges.push(edge);
            }
        }

        Ok(schema)
    }
}

fn check_acyclic(schema: &OwnershipSchema, start: &str) -> Result<()> {
    let mut seen = BTreeSet::new();
    let mut current = Some(start);
    while let Some(name) = current {
        if !seen.insert(name) {
            return Err(ChangeSetError::Configuration(format!(
                "inheritance cycle through `{start}`"
            )));
        }
        current = schema
            .types
            .get(name)
            .and_then(|decl| decl.extends.as_deref());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> OwnershipSchema {
        OwnershipSchema::builder()
            .declare("Base")
            .declare("Mid")
            .declare("End")
            .extend("EndChild", "End")
            .owns_many("Base", "mids", "Mid", "base_id")
            .has_one("Mid", "base", "Base")
            .owns_one("Mid", "end", "End")
            .build()
            .expect("schema should build")
    }

    #[test]
    fn owned_relations_filter_unowned_edges() {
        let schema = schema();
        let owned = schema.owned_relations_of("Mid").expect("Mid is declared");
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].relation, "end");
        assert_eq!(owned[0].foreign_key, "end_id");
        assert_eq!(schema.relations_of("Mid").expect("Mid is declared").len(), 2);
    }

    #[test]
    fn subtypes_inherit_relations() {
        let schema = OwnershipSchema::builder()
            .declare("Page")
            .extend("BlogPage", "Page")
            .declare("Image")
            .owns_one("Page", "hero", "Image")
            .owns_one("BlogPage", "thumbnail", "Image")
            .build()
            .expect("schema should build");

        let relations: Vec<String> = schema
            .owned_relations_of("BlogPage")
            .expect("BlogPage is declared")
            .into_iter()
            .map(|edge| edge.relation)
            .collect();
        assert_eq!(relations, vec!["thumbnail", "hero"]);
        assert_eq!(
            schema.owned_relations_of("Page").expect("Page is declared").len(),
            1
        );
    }

    #[test]
    fn base_type_and_is_a_follow_lineage() {
        let schema = schema();
        assert_eq!(schema.base_type("EndChild").expect("declared"), "End");
        assert_eq!(schema.base_type("Base").expect("declared"), "Base");
        assert!(schema.is_a("EndChild", "End").expect("declared"));
        assert!(!schema.is_a("End", "EndChild").expect("declared"));
    }

    #[test]
    fn owning_relations_walk_in_reverse() {
        let schema = schema();
        let owners: Vec<(String, String)> = schema
            .owning_relations_of("EndChild")
            .expect("declared")
            .into_iter()
            .map(|edge| (edge.owner_type, edge.relation))
            .collect();
        assert_eq!(owners, vec![("Mid".to_string(), "end".to_string())]);
    }

    #[test]
    fn unknown_type_is_configuration_error() {
        let err = schema()
            .owned_relations_of("Ghost")
            .expect_err("undeclared type must fail");
        assert!(matches!(err, ChangeSetError::Configuration(msg) if msg.contains("Ghost")));
    }

    #[test]
    fn build_rejects_unknown_target() {
        let err = OwnershipSchema::builder()
            .declare("Base")
            .owns_one("Base", "thing", "Missing")
            .build()
            .expect_err("unknown target must fail");
        assert!(matches!(err, ChangeSetError::Configuration(_)));
    }

    #[test]
    fn build_rejects_inheritance_cycle() {
        let err = OwnershipSchema::builder()
            .extend("A", "B")
            .extend("B", "A")
            .build()
            .expect_err("cycle must fail");
        assert!(matches!(err, ChangeSetError::Configuration(msg) if msg.contains("cycle")));
    }

    #[test]
    fn build_requires_foreign_key_for_collections() {
        let err = OwnershipSchema::builder()
            .declare("Base")
            .declare("Mid")
            .relation("Base", "mids", "Mid", Cardinality::Many, true, None)
            .build()
            .expect_err("collection without foreign key must fail");
        assert!(matches!(err, ChangeSetError::Configuration(msg) if msg.contains("foreign key")));
    }

    #[test]
    fn build_rejects_duplicate_relation_names() {
        let err = OwnershipSchema::builder()
            .declare("Page")
            .extend("BlogPage", "Page")
            .declare("Image")
            .owns_one("Page", "hero", "Image")
            .owns_one("BlogPage", "hero", "Image")
            .build()
            .expect_err("shadowed relation must fail");
        assert!(matches!(err, ChangeSetError::Configuration(msg) if msg.contains("twice")));
    }
}
