//! Error taxonomy shared by the gate, the channel manager and the service.
//!
//! Denials (`MissingIdentifier`, `NotFound`, `NotMember`, `RoleMismatch`,
//! the three handshake failures) are classified locally. Store failures
//! pass through as `Store` so callers can tell "denied" from "backend
//! unavailable".

use thiserror::Error;
use uuid::Uuid;

use crate::model::Role;
use crate::protocol::ProtocolError;

/// Failures raised by the canonical record store or the activity log.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Backend unreachable or failing
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Record not found: {0}")]
    NotFound(Uuid),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Compression error: {0}")]
    Compression(String),
}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Failure inside the identity provider itself (not an invalid credential).
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Identity provider error: {0}")]
pub struct IdentityError(pub String);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    #[error("Missing board ID or user ID")]
    MissingIdentifier,

    /// The named entity ("Board", "List", "Task", "Member") does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("You are not a member of this board")]
    NotMember,

    #[error("Requires one of: {}", join_roles(.0))]
    RoleMismatch(Vec<Role>),

    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Invalid or expired token")]
    InvalidCredential,

    #[error("Authentication failed")]
    AuthenticationFailed,

    /// The channel manager has not been installed yet.
    #[error("Realtime channel is not initialised")]
    NotReady,

    /// Indeterminate: the store failed, nothing was decided.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(Role::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

impl SyncError {
    /// True for classified access decisions, false for indeterminate failures.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            SyncError::MissingIdentifier
                | SyncError::NotFound(_)
                | SyncError::NotMember
                | SyncError::RoleMismatch(_)
                | SyncError::AuthenticationRequired
                | SyncError::InvalidCredential
                | SyncError::AuthenticationFailed
        )
    }

    /// HTTP-equivalent status for the thin request layer.
    pub fn status_code(&self) -> u16 {
        match self {
            SyncError::MissingIdentifier => 400,
            SyncError::AuthenticationRequired
            | SyncError::InvalidCredential
            | SyncError::AuthenticationFailed => 401,
            SyncError::NotMember | SyncError::RoleMismatch(_) => 403,
            SyncError::NotFound(_) => 404,
            SyncError::NotReady => 503,
            SyncError::Store(_) | SyncError::Protocol(_) => 500,
        }
    }

    /// Message safe to show to an end user. Denials are verbatim,
    /// indeterminate failures carry no internal detail.
    pub fn public_message(&self) -> String {
        if self.is_denial() {
            self.to_string()
        } else {
            "Something went wrong, please try again".to_string()
        }
    }
}
