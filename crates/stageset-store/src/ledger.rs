//! Changeset ledger: every changeset, one JSON line each.

use crate::jsonl::{JsonlError, read_records_from_path, write_records_to_path};
use stageset_kernel::changeset::ChangeSet;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Jsonl(#[from] JsonlError),

    #[error("changeset not found: {0}")]
    NotFound(String),

    #[error("changeset reference {reference} is ambiguous ({matches} matches)")]
    Ambiguous { reference: String, matches: usize },
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSetLedger {
    changesets: BTreeMap<Uuid, ChangeSet>,
}

impl ChangeSetLedger {
    pub fn from_changesets(changesets: Vec<ChangeSet>) -> Self {
        Self {
            changesets: changesets.into_iter().map(|cs| (cs.id, cs)).collect(),
        }
    }

    pub fn load_jsonl(path: impl AsRef<Path>) -> Result<Self, JsonlError> {
        Ok(Self::from_changesets(read_records_from_path(path)?))
    }

    /// Persist in creation order.
    pub fn save_jsonl(&self, path: impl AsRef<Path>) -> Result<(), JsonlError> {
        write_records_to_path(path, &self.list())
    }

    pub fn len(&self) -> usize {
        self.changesets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changesets.is_empty()
    }

    pub fn insert(&mut self, cs: ChangeSet) -> Option<ChangeSet> {
        self.changesets.insert(cs.id, cs)
    }

    pub fn get(&self, id: &Uuid) -> Option<&ChangeSet> {
        self.changesets.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut ChangeSet> {
        self.changesets.get_mut(id)
    }

    /// All changesets, oldest first.
    pub fn list(&self) -> Vec<&ChangeSet> {
        let mut all: Vec<&ChangeSet> = self.changesets.values().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        all
    }

    /// Resolve a full id or a unique hyphen-insensitive prefix.
    pub fn resolve(&self, reference: &str) -> Result<Uuid, LedgerError> {
        if let Ok(id) = Uuid::parse_str(reference) {
            return self
                .changesets
                .contains_key(&id)
                .then_some(id)
                .ok_or_else(|| LedgerError::NotFound(reference.to_string()));
        }
        let needle = reference.replace('-', "").to_ascii_lowercase();
        if needle.is_empty() {
            return Err(LedgerError::NotFound(reference.to_string()));
        }
        let matches: Vec<Uuid> = self
            .changesets
            .keys()
            .filter(|id| id.simple().to_string().starts_with(&needle))
            .copied()
            .collect();
        match matches.as_slice() {
            [id] => Ok(*id),
            [] => Err(LedgerError::NotFound(reference.to_string())),
            _ => Err(LedgerError::Ambiguous {
                reference: reference.to_string(),
                matches: matches.len(),
            }),
        }
    }
}
