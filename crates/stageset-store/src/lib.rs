//! # stageset-store
//!
//! Reference storage for stageset: draft/live objects and the changeset
//! ledger.
//!
//! This crate provides:
//! - `StoredObject` (one object with its draft and live versions)
//! - JSONL read/write (portable persistence)
//! - `MemoryStore` (the `VersionedStore` the kernel publishes through)
//! - `ChangeSetLedger` (every changeset, by id)
//! - lock-scoped mutation of both files
//!
//! ## Data model
//!
//! ```text
//! objects.jsonl ──┐                     ┌── MemoryStore ──▶ VersionedStore
//!                 ├─ mutate_jsonl_stores┤
//! changesets.jsonl┘                     └── ChangeSetLedger
//! ```

pub mod atomic_store;
pub mod jsonl;
pub mod ledger;
pub mod memory;
pub mod object;

pub use atomic_store::{
    AtomicStoreMutationError, load_jsonl_stores, mutate_jsonl_stores, store_lock_path,
};
pub use jsonl::JsonlError;
pub use ledger::{ChangeSetLedger, LedgerError};
pub use memory::{MemoryStore, MemoryStoreError};
pub use object::{StoredObject, Version};
