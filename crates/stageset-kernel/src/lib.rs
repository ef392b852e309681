//! # Stageset Kernel
//!
//! Changesets over a draft/live object store: group draft edits, pull in
//! everything the edited objects own, and publish the whole group to live
//! in one transaction.
//!
//! This crate is **storage-agnostic**: it never holds object data. It reads
//! and writes through the [`VersionedStore`] port and keeps only the
//! changeset bookkeeping.
//!
//! ## Architecture
//!
//! ```text
//! OwnershipSchema       ← Types, inheritance, owned/unowned relations
//!     │
//! VersionedStore        ← Draft/live records, revisions, transactions
//!     │
//! Synchronizer          ← Explicit roots + owned closure → implicit items
//!     │
//! PermissionAggregator  ← Coarse manage code ∧ per-item Publish checks
//!     │
//! Publisher             ← Guard, order, apply, disassociate, stamp
//!     │
//! ChangeSetEngine       ← One handle over all of the above
//! ```

pub mod changeset;
pub mod engine;
pub mod error;
pub mod object;
pub mod permission;
pub mod publish;
pub mod schema;
pub mod store;
pub mod sync;

pub use changeset::{AddedMode, ChangeSet, ChangeSetItem, ChangeSetState};
pub use engine::{ChangeSetEngine, EngineConfig, ItemStatus};
pub use error::{ChangeSetError, Result, StoreError};
pub use object::{ChangeType, ObjectKey, ObjectRecord, Stage};
pub use permission::{
    ADMIN_PERMISSION, Actor, Capability, DEFAULT_MANAGE_PERMISSION, ObjectPermission,
    PermissionAggregator, PermissionCodePolicy, PolicyRegistry,
};
pub use publish::{
    Disassociation, PlannedStep, PublishAction, PublishPlan, PublishReport, Publisher,
    StaleSyncPolicy,
};
pub use schema::{Cardinality, OwnershipEdge, OwnershipSchema, SchemaBuilder, TypeDecl};
pub use store::{StoreResult, StoreTransaction, VersionedStore};
pub use sync::{Closure, SyncDiff, SyncReport, Synchronizer};
