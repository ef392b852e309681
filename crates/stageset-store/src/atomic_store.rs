//! Lock-scoped atomic mutation of the object file and changeset ledger.
//!
//! One lock file next to the object file serializes writers: load both
//! files, run the mutator, persist both if it reports a change, release.

use crate::jsonl::JsonlError;
use crate::ledger::ChangeSetLedger;
use crate::memory::{MemoryStore, MemoryStoreError};
use chrono::Utc;
use std::error::Error as StdError;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn store_lock_path(objects_path: &Path) -> PathBuf {
    let mut path: OsString = objects_path.as_os_str().to_os_string();
    path.push(".lock");
    PathBuf::from(path)
}

#[derive(Debug)]
pub enum AtomicStoreMutationError<E> {
    LockBusy { lock_path: String },
    LockIo { lock_path: String, message: String },
    Store(MemoryStoreError),
    Mutation(E),
}

impl<E> AtomicStoreMutationError<E> {
    fn lock_busy(lock_path: &Path) -> Self {
        Self::LockBusy {
            lock_path: lock_path.display().to_string(),
        }
    }

    fn lock_io(lock_path: &Path, message: impl Into<String>) -> Self {
        Self::LockIo {
            lock_path: lock_path.display().to_string(),
            message: message.into(),
        }
    }
}

impl<E> From<JsonlError> for AtomicStoreMutationError<E> {
    fn from(err: JsonlError) -> Self {
        Self::Store(MemoryStoreError::Jsonl(err))
    }
}

impl<E: Display> Display for AtomicStoreMutationError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockBusy { lock_path } => write!(f, "store lock busy: {lock_path}"),
            Self::LockIo { lock_path, message } => {
                write!(f, "failed to acquire store lock {lock_path}: {message}")
            }
            Self::Store(err) => write!(f, "{err}"),
            Self::Mutation(err) => write!(f, "{err}"),
        }
    }
}

impl<E> StdError for AtomicStoreMutationError<E> where
    E: Display + std::fmt::Debug + StdError + 'static
{
}

/// Load objects and changesets without taking the lock.
pub fn load_jsonl_stores(
    objects_path: impl AsRef<Path>,
    changesets_path: impl AsRef<Path>,
) -> Result<(MemoryStore, ChangeSetLedger), MemoryStoreError> {
    let store = MemoryStore::load_jsonl(objects_path)?;
    let ledger = ChangeSetLedger::load_jsonl(changesets_path)?;
    Ok((store, ledger))
}

/// Execute one lock-scoped mutation against the object file and ledger.
///
/// The mutator returns `(value, changed)` where:
/// - `value` is returned to the caller
/// - `changed=true` persists both files before lock release.
///
/// A mutator error persists nothing.
pub fn mutate_jsonl_stores<T, E, F>(
    objects_path: impl AsRef<Path>,
    changesets_path: impl AsRef<Path>,
    mutator: F,
) -> Result<T, AtomicStoreMutationError<E>>
where
    F: FnOnce(&mut MemoryStore, &mut ChangeSetLedger) -> Result<(T, bool), E>,
{
    let objects_path = objects_path.as_ref();
    let changesets_path = changesets_path.as_ref();
    let _guard = StoreFileLockGuard::acquire(objects_path).map_err(|err| match err {
        AtomicStoreMutationError::LockBusy { lock_path } => {
            AtomicStoreMutationError::LockBusy { lock_path }
        }
        AtomicStoreMutationError::LockIo { lock_path, message } => {
            AtomicStoreMutationError::LockIo { lock_path, message }
        }
        AtomicStoreMutationError::Store(source) => AtomicStoreMutationError::Store(source),
        AtomicStoreMutationError::Mutation(unreachable) => match unreachable {},
    })?;

    let (mut store, mut ledger) =
        load_jsonl_stores(objects_path, changesets_path).map_err(AtomicStoreMutationError::Store)?;
    let (value, changed) =
        mutator(&mut store, &mut ledger).map_err(AtomicStoreMutationError::Mutation)?;
    if changed {
        store
            .save_jsonl(objects_path)
            .map_err(AtomicStoreMutationError::Store)?;
        ledger.save_jsonl(changesets_path)?;
        tracing::debug!(
            target: "stageset.store",
            objects = store.len(),
            changesets = ledger.len(),
            "stores persisted"
        );
    }
    Ok(value)
}

struct StoreFileLockGuard {
    lock_path: PathBuf,
    _file: File,
}

impl StoreFileLockGuard {
    fn acquire(path: &Path) -> Result<Self, AtomicStoreMutationError<std::convert::Infallible>> {
        let lock_path = store_lock_path(path);
        if let Some(parent) = lock_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .map_err(|e| AtomicStoreMutationError::lock_io(&lock_path, e.to_string()))?;
        }

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock_path)
        {
            Ok(mut file) => {
                let _ = writeln!(
                    file,
                    "pid={}\nutc={}",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                Ok(Self {
                    lock_path,
                    _file: file,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(AtomicStoreMutationError::lock_busy(&lock_path))
            }
            Err(err) => Err(AtomicStoreMutationError::lock_io(
                &lock_path,
                err.to_string(),
            )),
        }
    }
}

impl Drop for StoreFileLockGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.lock_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stageset_kernel::changeset::ChangeSet;
    use std::collections::BTreeMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    struct TempDirGuard {
        path: PathBuf,
    }

    impl TempDirGuard {
        fn new(prefix: &str) -> Self {
            let unique = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock should be after unix epoch")
                .as_nanos();
            let path = std::env::temp_dir().join(format!(
                "stageset-atomic-{prefix}-{}-{unique}",
                std::process::id()
            ));
            fs::create_dir_all(&path).expect("temp dir should be created");
            Self { path }
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn changed_mutation_persists_both_files() {
        let dir = TempDirGuard::new("persist");
        let objects = dir.path.join("objects.jsonl");
        let changesets = dir.path.join("changesets.jsonl");

        let key = mutate_jsonl_stores::<_, MemoryStoreError, _>(&objects, &changesets, |store, ledger| {
            let key = store.create("Base", "Base", BTreeMap::new())?;
            ledger.insert(ChangeSet::new("campaign", "alice"));
            Ok((key, true))
        })
        .expect("mutation should succeed");

        let (store, ledger) = load_jsonl_stores(&objects, &changesets).expect("reload");
        assert!(store.object(&key).is_some());
        assert_eq!(ledger.len(), 1);
        assert!(!store_lock_path(&objects).exists());
    }

    #[test]
    fn unchanged_or_failed_mutation_persists_nothing() {
        let dir = TempDirGuard::new("skip");
        let objects = dir.path.join("objects.jsonl");
        let changesets = dir.path.join("changesets.jsonl");

        mutate_jsonl_stores::<_, MemoryStoreError, _>(&objects, &changesets, |store, _| {
            store.create("Base", "Base", BTreeMap::new())?;
            Ok(((), false))
        })
        .expect("mutation should succeed");
        assert!(!objects.exists());

        let err = mutate_jsonl_stores::<(), MemoryStoreError, _>(&objects, &changesets, |store, _| {
            store.create("Base", "Base", BTreeMap::new())?;
            Err(MemoryStoreError::TransactionActive)
        })
        .expect_err("mutator error should surface");
        assert!(matches!(err, AtomicStoreMutationError::Mutation(_)));
        assert!(!objects.exists());
    }

    #[test]
    fn held_lock_reports_busy() {
        let dir = TempDirGuard::new("busy");
        let objects = dir.path.join("objects.jsonl");
        let changesets = dir.path.join("changesets.jsonl");
        fs::write(store_lock_path(&objects), "pid=0\n").expect("lock fixture should write");

        let err = mutate_jsonl_stores::<(), MemoryStoreError, _>(&objects, &changesets, |_, _| {
            Ok(((), true))
        })
        .expect_err("lock is held");
        assert!(matches!(err, AtomicStoreMutationError::LockBusy { .. }));
    }
}
