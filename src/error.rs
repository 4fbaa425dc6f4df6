use thiserror::Error;

use crate::gate::EventKind;
use crate::persistence::{EntityId, EntityKind, PersistenceError};
use crate::transport::TransportError;
use crate::workflow::ValidationError;

/// Errors surfaced by the relay's handlers.
///
/// Only `Persistence` indicates something went wrong on our side; the rest
/// are expected outcomes that callers turn into a reply, a re-prompt or a
/// silent drop.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("{kind} #{id} not found")]
    NotFound { kind: EntityKind, id: EntityId },

    #[error("{kind} #{id} is no longer {expected}")]
    StaleReferent {
        kind: EntityKind,
        id: EntityId,
        expected: &'static str,
    },

    #[error("Malformed {kind} event: missing {field}")]
    MalformedEvent { kind: EventKind, field: &'static str },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Permission denied: requires {required}")]
    Permission { required: String },

    #[error("Storage error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl RelayError {
    /// Referent problems: the event or commit no longer makes sense and is
    /// discarded without retry.
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            RelayError::NotFound { .. }
                | RelayError::StaleReferent { .. }
                | RelayError::MalformedEvent { .. }
        )
    }
}
