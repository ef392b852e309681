//! Error types for changeset operations and the store port.

use crate::changeset::ChangeSetState;
use crate::object::ObjectKey;
use uuid::Uuid;

/// Failures reported by a [`VersionedStore`](crate::store::VersionedStore) implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(ObjectKey),

    #[error("a store transaction is already active")]
    TransactionActive,

    #[error("no store transaction is active")]
    NoTransaction,

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Errors arising from changeset synchronization, permission checks, and publish.
#[derive(Debug, thiserror::Error)]
pub enum ChangeSetError {
    /// The ownership schema is inconsistent or does not know a type.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The actor lacks the rights for the requested action.
    #[error("permission denied: {actor} may not {action} changeset {change_set_id}")]
    PermissionDenied {
        change_set_id: Uuid,
        actor: String,
        action: &'static str,
    },

    /// The changeset is terminal and cannot be mutated or published again.
    #[error("changeset {change_set_id} is {state} and cannot be changed")]
    InvalidStateTransition {
        change_set_id: Uuid,
        state: ChangeSetState,
    },

    /// The recorded items no longer match the draft-side ownership closure.
    #[error(
        "changeset {change_set_id} is out of sync with draft: {} missing, {} stale item(s)",
        .missing.len(),
        .extra.len()
    )]
    StaleSync {
        change_set_id: Uuid,
        missing: Vec<ObjectKey>,
        extra: Vec<ObjectKey>,
    },

    /// The store aborted; any open transaction has been rolled back.
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),

    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("object not found on draft or live: {0}")]
    ObjectNotFound(ObjectKey),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ChangeSetError {
    /// Stable discriminator for machine-readable error output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::StaleSync { .. } => "stale_sync",
            Self::Storage(_) => "storage_failure",
            Self::NotSupported(_) => "not_supported",
            Self::ObjectNotFound(_) => "object_not_found",
            Self::InvalidInput(_) => "invalid_input",
        }
    }

    /// Whether retrying the same call can succeed once the cause is fixed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. } | Self::StaleSync { .. } | Self::Storage(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ChangeSetError>;
