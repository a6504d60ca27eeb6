//! Error types for `leaddesk-core`.
//!
//! Store failures keep the store-reported message verbatim; the workflow
//! errors add which precondition was not met.

use leaddesk_store::{LeadId, StoreError};

use crate::controller::LeadActivity;
use crate::submission::FormField;

/// Errors from the lead repository.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepositoryError {
    /// No store connection was ever established (missing credentials).
    #[error("lead store is not configured")]
    NotConfigured,

    /// An update carried no field to change.
    #[error("nothing to update for lead {id}")]
    EmptyPatch { id: LeadId },

    /// The store reported a failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RepositoryError {
    /// Whether the store refused the operation on authorization grounds.
    #[must_use]
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Store(err) if err.is_denied())
    }
}

/// Errors from the admin workflow controller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdminError {
    /// The current identity is not an admin (or nobody is signed in).
    #[error("admin access required")]
    NotAuthorized,

    /// The lead is not part of the loaded collection.
    #[error("lead {id} is not loaded")]
    UnknownLead { id: LeadId },

    /// Another save or delete for this lead is still in flight.
    #[error("lead {id} is busy ({activity})")]
    Busy { id: LeadId, activity: LeadActivity },

    /// The repository call failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors from sign-in, sign-out and profile resolution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The identity provider reported a failure.
    #[error("{0}")]
    Provider(#[from] StoreError),

    /// The linked profile could not be read or provisioned.
    #[error("profile could not be loaded: {0}")]
    Profile(StoreError),

    /// The admin workflow could not be entered (e.g. the first load failed).
    #[error(transparent)]
    Admin(#[from] AdminError),
}

/// Reasons the lead form refuses to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubmitBlocked {
    /// A required field is empty after trimming.
    #[error("{0} is required")]
    MissingField(FormField),
}
