//! Remote multi-user record database boundary.
//!
//! # Responsibility
//! - Define the push/pull, share, acceptance and capability contract the sync
//!   layer consumes.
//! - Provide an in-process multi-device implementation for tests and demos.
//!
//! # Invariants
//! - Implementations own retry/backoff; callers surface errors unchanged.
//! - Change tokens are opaque and monotonic per client.

use crate::model::entity::{Entity, EntityId};
use crate::model::scope::Scope;
use crate::model::share::{InvitationMetadata, Permission, ShareGrant, ShareRecordRef, UserIdentity};
use crate::notify::SignalSender;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod memory;

pub use memory::{InMemoryRemote, RemoteServer};

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Errors reported by the remote database client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Transport failure; the caller may retry later.
    Network(String),
    /// Service temporarily unavailable.
    Unavailable,
    /// Caller lacks the capability for the requested record or share.
    PermissionDenied(String),
    /// Record, zone or share does not exist (or is no longer visible).
    NotFound(String),
    /// A share already exists for the aggregate.
    AlreadyShared(EntityId),
    /// Invitation acceptance for an already accepted participant.
    AlreadyParticipant,
    /// Invitation does not name the caller.
    NotInvited,
    /// Share was deleted or the caller's access was revoked.
    ShareRevoked,
}

impl RemoteError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Unavailable)
    }
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network(message) => write!(f, "remote network error: {message}"),
            Self::Unavailable => write!(f, "remote database temporarily unavailable"),
            Self::PermissionDenied(message) => write!(f, "remote permission denied: {message}"),
            Self::NotFound(message) => write!(f, "remote record not found: {message}"),
            Self::AlreadyShared(root) => write!(f, "aggregate already shared: {root}"),
            Self::AlreadyParticipant => write!(f, "caller already participates in the share"),
            Self::NotInvited => write!(f, "caller is not invited to the share"),
            Self::ShareRevoked => write!(f, "share was revoked"),
        }
    }
}

impl Error for RemoteError {}

/// Opaque position in one scope's remote change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeToken(pub u64);

/// One record-level change travelling between local and remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecordChange {
    Upsert(Entity),
    Delete { id: EntityId, root: EntityId },
}

impl RecordChange {
    pub fn root(&self) -> EntityId {
        match self {
            Self::Upsert(entity) => entity.root,
            Self::Delete { root, .. } => *root,
        }
    }
}

/// Why access to a shared aggregate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    /// The owner stopped sharing; data returns to the owner's private scope.
    Unshared,
    /// The participant left or was removed.
    AccessRemoved,
    /// A writer deleted the aggregate root.
    AggregateDeleted,
}

/// Loss of access to one shared aggregate, delivered on the shared feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revocation {
    pub root: EntityId,
    pub owner: UserIdentity,
    pub reason: RevocationReason,
}

/// Result of one pull call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PullBatch {
    pub changes: Vec<RecordChange>,
    pub revocations: Vec<Revocation>,
    pub token: Option<ChangeToken>,
}

impl PullBatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.revocations.is_empty()
    }
}

/// Client contract of the remote record database, bound to one signed-in
/// user on one device.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    /// Identity of the signed-in user.
    fn current_user(&self) -> &UserIdentity;

    /// Registers the bridge that receives "remote data changed" notifications.
    async fn subscribe(&self, sender: SignalSender);

    /// Pushes changes of one aggregate to `scope`. All-or-nothing.
    async fn push(&self, scope: Scope, changes: Vec<RecordChange>) -> RemoteResult<()>;

    /// Pulls changes for `scope` newer than `since`.
    async fn pull(&self, scope: Scope, since: Option<ChangeToken>) -> RemoteResult<PullBatch>;

    /// Locates the grant for `root`, if one is visible to the caller.
    async fn fetch_share(&self, root: EntityId) -> RemoteResult<Option<ShareGrant>>;

    /// Creates a grant and moves `records` into the shared zone.
    async fn save_share(&self, grant: ShareGrant, records: Vec<Entity>) -> RemoteResult<ShareGrant>;

    async fn add_participant(
        &self,
        share: &ShareRecordRef,
        identity: &UserIdentity,
        permission: Permission,
    ) -> RemoteResult<ShareGrant>;

    async fn remove_participant(
        &self,
        share: &ShareRecordRef,
        identity: &UserIdentity,
    ) -> RemoteResult<ShareGrant>;

    /// Deletes a grant; its records return to the owner's private zone.
    async fn delete_share(&self, share: &ShareRecordRef) -> RemoteResult<()>;

    async fn accept_share(&self, invitation: &InvitationMetadata) -> RemoteResult<ShareGrant>;

    async fn can_update_record(&self, id: EntityId) -> RemoteResult<bool>;

    async fn can_delete_record(&self, id: EntityId) -> RemoteResult<bool>;
}
