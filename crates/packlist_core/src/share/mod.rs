//! Record sharing: grant lifecycle, permission checks and invitations.
//!
//! # Responsibility
//! - Move aggregates between private and shared scope as grants come and go.
//! - Answer ownership and capability questions for UI gating.
//! - Register the local user as a participant from an invitation.
//!
//! # Invariants
//! - A failed remote call never deletes local aggregate data; local moves made
//!   ahead of the call are rolled back.
//! - Ownership never changes for the lifetime of a grant.

use crate::model::entity::EntityId;
use crate::model::share::{Permission, ShareGrant, ShareRecordRef, UserIdentity};
use crate::remote::RemoteError;
use crate::store::StoreError;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod acceptance;
mod coordinator;
mod guard;

pub use acceptance::{AcceptError, AcceptanceHandler};
pub use coordinator::ShareCoordinator;
pub use guard::PermissionGuard;

pub type ShareResult<T> = Result<T, ShareError>;

/// Who besides the owner may invite new participants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvitePolicy {
    #[default]
    OwnerOnly,
    /// Accepted participants with write access may invite too.
    ReadWriteParticipants,
}

impl InvitePolicy {
    pub fn may_invite(self, grant: &ShareGrant, identity: &UserIdentity) -> bool {
        match self {
            Self::OwnerOnly => grant.is_owner(identity),
            Self::ReadWriteParticipants => {
                grant.permission_for(identity) == Some(Permission::ReadWrite)
            }
        }
    }
}

/// Share lifecycle failure.
#[derive(Debug)]
pub enum ShareError {
    /// Remote sharing call failed; local data is intact and the call may be retried.
    ShareOperation(RemoteError),
    /// Caller is not the owner (or lacks the permission the policy requires).
    NotOwner,
    AlreadyShared(EntityId),
    EntityNotFound(EntityId),
    NotAggregateRoot(EntityId),
    CannotRemoveOwner,
    /// The grant no longer exists remotely.
    GrantNotFound(ShareRecordRef),
    Store(StoreError),
}

impl Display for ShareError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShareOperation(err) => write!(f, "share operation failed: {err}"),
            Self::NotOwner => write!(f, "caller does not own the share"),
            Self::AlreadyShared(root) => write!(f, "aggregate already shared: {root}"),
            Self::EntityNotFound(id) => write!(f, "entity not found: {id}"),
            Self::NotAggregateRoot(id) => write!(f, "entity {id} is not an aggregate root"),
            Self::CannotRemoveOwner => write!(f, "the owner cannot be removed from a share"),
            Self::GrantNotFound(share) => write!(f, "share not found: {share}"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ShareError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ShareOperation(err) => Some(err),
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for ShareError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl ShareError {
    /// Maps a remote failure on an existing grant.
    fn from_remote(err: RemoteError, share: &ShareRecordRef) -> Self {
        match err {
            RemoteError::NotFound(_) | RemoteError::ShareRevoked => {
                Self::GrantNotFound(share.clone())
            }
            RemoteError::AlreadyShared(root) => Self::AlreadyShared(root),
            other => Self::ShareOperation(other),
        }
    }
}
