//! In-memory draft/live object store.
//!
//! This is the reference [`VersionedStore`]:
//! - load/store JSONL
//! - author draft state (create, edit, delete) and publish single objects
//! - answer relation queries by scanning integer link fields
//! - snapshot-based transactions for changeset publish

use crate::jsonl::{JsonlError, read_records_from_path, write_records_to_path};
use crate::object::StoredObject;
use serde_json::Value;
use stageset_kernel::error::StoreError;
use stageset_kernel::object::{ObjectKey, ObjectRecord, Stage};
use stageset_kernel::schema::{Cardinality, OwnershipEdge};
use stageset_kernel::store::{StoreResult, VersionedStore};
use std::collections::BTreeMap;
use std::path::Path;

/// Errors raised while loading or authoring objects.
#[derive(Debug, thiserror::Error)]
pub enum MemoryStoreError {
    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectKey),

    #[error("{key} has no {stage} version")]
    MissingStage { key: ObjectKey, stage: Stage },

    #[error("a transaction is active; commit or roll back before authoring")]
    TransactionActive,
}

type Objects = BTreeMap<ObjectKey, StoredObject>;

/// Canonical in-memory state for all objects, keyed by base-type key.
///
/// Objects gone from both stages stay behind as tombstones. They are hidden
/// from every read but hold their ID, so `create` never hands it out again.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Objects,
    snapshot: Option<Objects>,
}

impl MemoryStore {
    /// Build a store from stored objects. Duplicate keys resolve last-write-wins.
    pub fn from_objects(objects: Vec<StoredObject>) -> Self {
        let objects = objects
            .into_iter()
            .map(|object| (object.key(), object))
            .collect();
        Self {
            objects,
            snapshot: None,
        }
    }

    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, MemoryStoreError> {
        let objects = read_records_from_path(path)?;
        Ok(Self::from_objects(objects))
    }

    pub fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<(), MemoryStoreError> {
        let objects: Vec<&StoredObject> = self.objects.values().collect();
        write_records_to_path(path, &objects)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.objects().count()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().next().is_none()
    }

    pub fn object(&self, key: &ObjectKey) -> Option<&StoredObject> {
        self.objects.get(key).filter(|object| !object.is_vacant())
    }

    /// All objects in key order.
    pub fn objects(&self) -> impl Iterator<Item = &StoredObject> {
        self.objects.values().filter(|object| !object.is_vacant())
    }

    /// Create a draft-only object of `class_name` in the `base_type` key space.
    ///
    /// IDs are allocated per base type, starting at 1. Tombstones count, so
    /// an ID is never reused after its object is deleted.
    pub fn create(
        &mut self,
        base_type: &str,
        class_name: &str,
        fields: BTreeMap<String, Value>,
    ) -> Result<ObjectKey, MemoryStoreError> {
        self.ensure_idle()?;
        let id = self
            .objects
            .keys()
            .filter(|key| key.object_type == base_type)
            .map(|key| key.id)
            .max()
            .unwrap_or(0)
            + 1;
        let object = StoredObject::new_draft(base_type, id, class_name, fields);
        let key = object.key();
        self.objects.insert(key.clone(), object);
        Ok(key)
    }

    /// Merge `fields` into the draft version; returns the new draft revision.
    ///
    /// Editing an object that only exists on live restores its draft from live.
    pub fn update_draft(
        &mut self,
        key: &ObjectKey,
        fields: BTreeMap<String, Value>,
    ) -> Result<u64, MemoryStoreError> {
        self.ensure_idle()?;
        let object = self.object_mut(key)?;
        let mut merged = object
            .draft
            .as_ref()
            .or(object.live.as_ref())
            .map(|version| version.fields.clone())
            .unwrap_or_default();
        merged.extend(fields);
        Ok(object.write_draft(merged))
    }

    pub fn set_field(
        &mut self,
        key: &ObjectKey,
        field: &str,
        value: Value,
    ) -> Result<u64, MemoryStoreError> {
        self.update_draft(key, BTreeMap::from([(field.to_string(), value)]))
    }

    /// Remove the draft version. The live version stays until published.
    pub fn delete_from_draft(&mut self, key: &ObjectKey) -> Result<(), MemoryStoreError> {
        self.ensure_idle()?;
        let object = self.object_mut(key)?;
        if object.draft.take().is_none() {
            return Err(MemoryStoreError::MissingStage {
                key: key.clone(),
                stage: Stage::Draft,
            });
        }
        object.touch_updated_at();
        Ok(())
    }

    /// Remove the live version outside of any changeset.
    pub fn delete_from_live(&mut self, key: &ObjectKey) -> Result<(), MemoryStoreError> {
        self.ensure_idle()?;
        let object = self.object_mut(key)?;
        if object.live.take().is_none() {
            return Err(MemoryStoreError::MissingStage {
                key: key.clone(),
                stage: Stage::Live,
            });
        }
        object.touch_updated_at();
        Ok(())
    }

    /// Publish one object on its own; returns the new live revision.
    pub fn publish_single(&mut self, key: &ObjectKey) -> Result<u64, MemoryStoreError> {
        self.ensure_idle()?;
        let object = self.object_mut(key)?;
        let Some(draft) = object.draft.clone() else {
            return Err(MemoryStoreError::MissingStage {
                key: key.clone(),
                stage: Stage::Draft,
            });
        };
        let revision = draft.revision;
        object.live = Some(draft);
        object.touch_updated_at();
        Ok(revision)
    }

    fn ensure_idle(&self) -> Result<(), MemoryStoreError> {
        if self.snapshot.is_some() {
            return Err(MemoryStoreError::TransactionActive);
        }
        Ok(())
    }

    fn object_mut(&mut self, key: &ObjectKey) -> Result<&mut StoredObject, MemoryStoreError> {
        self.objects
            .get_mut(key)
            .filter(|object| !object.is_vacant())
            .ok_or_else(|| MemoryStoreError::ObjectNotFound(key.clone()))
    }

    /// Objects of `base_type` whose `stage` copy links to `id` through `field`.
    fn linking(&self, stage: Stage, base_type: &str, field: &str, id: u64) -> Vec<ObjectKey> {
        self.objects
            .values()
            .filter(|object| object.object_type == base_type)
            .filter_map(|object| object.record(stage))
            .filter(|record| record.foreign_key(field) == id)
            .map(|record| record.key)
            .collect()
    }

    /// `key` if it exists in `stage`.
    fn present(&self, stage: Stage, key: ObjectKey) -> Vec<ObjectKey> {
        match self.objects.get(&key).and_then(|object| object.version(stage)) {
            Some(_) => vec![key],
            None => Vec::new(),
        }
    }
}

impl VersionedStore for MemoryStore {
    fn record(&self, stage: Stage, key: &ObjectKey) -> StoreResult<Option<ObjectRecord>> {
        Ok(self.objects.get(key).and_then(|object| object.record(stage)))
    }

    fn related_objects(
        &self,
        stage: Stage,
        owner: &ObjectRecord,
        edge: &OwnershipEdge,
    ) -> StoreResult<Vec<ObjectKey>> {
        Ok(match edge.cardinality {
            Cardinality::One => match owner.foreign_key(&edge.foreign_key) {
                0 => Vec::new(),
                id => self.present(stage, ObjectKey::new(edge.target_base_type.clone(), id)),
            },
            Cardinality::Many => self.linking(
                stage,
                &edge.target_base_type,
                &edge.foreign_key,
                owner.key.id,
            ),
        })
    }

    fn referencing_objects(
        &self,
        stage: Stage,
        target: &ObjectRecord,
        edge: &OwnershipEdge,
    ) -> StoreResult<Vec<ObjectKey>> {
        Ok(match edge.cardinality {
            Cardinality::One => self.linking(
                stage,
                &edge.owner_base_type,
                &edge.foreign_key,
                target.key.id,
            ),
            Cardinality::Many => match target.foreign_key(&edge.foreign_key) {
                0 => Vec::new(),
                id => self.present(stage, ObjectKey::new(edge.owner_base_type.clone(), id)),
            },
        })
    }

    fn write_draft_to_live(&mut self, key: &ObjectKey) -> StoreResult<u64> {
        let object = self
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let draft = object
            .draft
            .clone()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let revision = draft.revision;
        object.live = Some(draft);
        object.touch_updated_at();
        Ok(revision)
    }

    fn remove_from_live(&mut self, key: &ObjectKey) -> StoreResult<()> {
        let object = self
            .objects
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        object.live = None;
        object.touch_updated_at();
        Ok(())
    }

    fn clear_foreign_key(&mut self, key: &ObjectKey, field: &str) -> StoreResult<()> {
        let live = self
            .objects
            .get_mut(key)
            .and_then(|object| object.version_mut(Stage::Live))
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        live.fields.insert(field.to_string(), Value::from(0u64));
        Ok(())
    }

    fn begin(&mut self) -> StoreResult<()> {
        if self.snapshot.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.snapshot = Some(self.objects.clone());
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        self.snapshot
            .take()
            .map(|_| ())
            .ok_or(StoreError::NoTransaction)
    }

    fn rollback(&mut self) -> StoreResult<()> {
        let snapshot = self.snapshot.take().ok_or(StoreError::NoTransaction)?;
        self.objects = snapshot;
        Ok(())
    }
}
