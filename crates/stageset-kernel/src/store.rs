//! Port to the versioned object store.
//!
//! The kernel never owns object data. Everything it reads or writes goes
//! through [`VersionedStore`]; `stageset-store` provides the in-memory/JSONL
//! implementation, and tests wrap it to inject failures.

use crate::error::StoreError;
use crate::object::{ChangeType, ObjectKey, ObjectRecord, Stage};
use crate::schema::OwnershipEdge;
use std::ops::{Deref, DerefMut};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Draft/live object storage with per-stage revisions and an all-or-nothing
/// transaction primitive.
pub trait VersionedStore {
    /// The object as it exists in `stage`, if it does.
    fn record(&self, stage: Stage, key: &ObjectKey) -> StoreResult<Option<ObjectRecord>>;

    /// Keys linked from `owner` through `edge`, as seen in `stage`.
    ///
    /// For `One` edges this reads `owner.fields[edge.foreign_key]`; for
    /// `Many` edges it finds objects of `edge.target_base_type` whose
    /// `edge.foreign_key` equals the owner's ID. Dangling links are skipped.
    fn related_objects(
        &self,
        stage: Stage,
        owner: &ObjectRecord,
        edge: &OwnershipEdge,
    ) -> StoreResult<Vec<ObjectKey>>;

    /// Reverse of [`related_objects`](Self::related_objects): keys of
    /// `edge.owner_base_type` objects that link to `target` in `stage`.
    fn referencing_objects(
        &self,
        stage: Stage,
        target: &ObjectRecord,
        edge: &OwnershipEdge,
    ) -> StoreResult<Vec<ObjectKey>>;

    /// Copy the draft state to live and return the new live revision.
    fn write_draft_to_live(&mut self, key: &ObjectKey) -> StoreResult<u64>;

    /// Remove the live copy. The draft (if any) is left alone.
    fn remove_from_live(&mut self, key: &ObjectKey) -> StoreResult<()>;

    /// Zero an integer link field on the live copy without bumping its revision.
    fn clear_foreign_key(&mut self, key: &ObjectKey, field: &str) -> StoreResult<()>;

    fn begin(&mut self) -> StoreResult<()>;

    fn commit(&mut self) -> StoreResult<()>;

    fn rollback(&mut self) -> StoreResult<()>;

    fn draft(&self, key: &ObjectKey) -> StoreResult<Option<ObjectRecord>> {
        self.record(Stage::Draft, key)
    }

    /// Revision in `stage`, `0` when absent.
    fn revision(&self, stage: Stage, key: &ObjectKey) -> StoreResult<u64> {
        Ok(self.record(stage, key)?.map_or(0, |record| record.revision))
    }

    fn live_revision(&self, key: &ObjectKey) -> StoreResult<u64> {
        self.revision(Stage::Live, key)
    }

    /// Classify the pending change for `key`.
    fn change_type(&self, key: &ObjectKey) -> StoreResult<ChangeType> {
        Ok(ChangeType::from_revisions(
            self.revision(Stage::Draft, key)?,
            self.revision(Stage::Live, key)?,
        ))
    }
}

/// Scoped transaction over a store.
///
/// Begins on construction. Dropping the guard without a successful
/// [`commit`](Self::commit) rolls the store back, so every early return
/// (permission error, storage error, panic unwind) releases the transaction.
pub struct StoreTransaction<'a, S: VersionedStore + ?Sized> {
    store: &'a mut S,
    finished: bool,
}

impl<'a, S: VersionedStore + ?Sized> StoreTransaction<'a, S> {
    pub fn begin(store: &'a mut S) -> StoreResult<Self> {
        store.begin()?;
        Ok(Self {
            store,
            finished: false,
        })
    }

    pub fn commit(mut self) -> StoreResult<()> {
        self.store.commit()?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> StoreResult<()> {
        self.finished = true;
        self.store.rollback()
    }
}

impl<S: VersionedStore + ?Sized> Deref for StoreTransaction<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.store
    }
}

impl<S: VersionedStore + ?Sized> DerefMut for StoreTransaction<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.store
    }
}

impl<S: VersionedStore + ?Sized> Drop for StoreTransaction<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.store.rollback() {
            tracing::error!(target: "stageset.store", error = %err, "rollback failed");
        }
    }
}
