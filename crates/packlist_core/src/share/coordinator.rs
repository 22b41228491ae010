//! Share lifecycle coordinator.
//!
//! # Responsibility
//! - Create, fetch, configure and delete grants for aggregate roots.
//! - Keep each aggregate in the physical store matching its grant state.
//!
//! # Invariants
//! - Local moves happen before the remote call and are undone if it fails.
//! - Superseded grants are detected by re-fetching, never by cancellation.

use super::{InvitePolicy, ShareError, ShareResult};
use crate::model::entity::EntityId;
use crate::model::scope::Scope;
use crate::model::share::{Permission, ShareGrant, UserIdentity};
use crate::remote::{RemoteDatabase, RemoteError};
use crate::store::{DualStoreManager, SyncError};
use log::{error, info, warn};
use std::sync::Arc;

pub struct ShareCoordinator<R: ?Sized> {
    remote: Arc<R>,
    policy: InvitePolicy,
}

impl<R: RemoteDatabase + ?Sized> ShareCoordinator<R> {
    pub fn new(remote: Arc<R>, policy: InvitePolicy) -> Self {
        Self { remote, policy }
    }

    pub fn policy(&self) -> InvitePolicy {
        self.policy
    }

    fn me(&self) -> &UserIdentity {
        self.remote.current_user()
    }

    /// Shares a private aggregate; the caller becomes its owner.
    ///
    /// # Errors
    /// - `AlreadyShared` when the caller already owns a grant for `root`.
    /// - `NotOwner` when the aggregate is shared by someone else.
    /// - `ShareOperation` on remote failure; the aggregate stays private.
    pub async fn create_share(
        &self,
        stores: &mut DualStoreManager,
        root: EntityId,
    ) -> ShareResult<ShareGrant> {
        let entity = stores.get(root)?.ok_or(ShareError::EntityNotFound(root))?;
        if !entity.is_root() {
            return Err(ShareError::NotAggregateRoot(root));
        }
        let scope = stores.store_for(root)?.ok_or(ShareError::EntityNotFound(root))?;

        // Another device may have shared it before this replica synced.
        let existing = self
            .remote
            .fetch_share(root)
            .await
            .map_err(ShareError::ShareOperation)?;
        match existing {
            Some(grant) if grant.is_owner(self.me()) => return Err(ShareError::AlreadyShared(root)),
            Some(_) => return Err(ShareError::NotOwner),
            None if scope == Scope::Shared => return Err(ShareError::NotOwner),
            None => {}
        }

        let moved = stores.move_aggregate(root, Scope::Shared)?;
        let records = stores.aggregate(root)?;
        let record_count = records.len();
        let proposed = ShareGrant::new(root, self.me().clone(), entity.display_name());
        match self.remote.save_share(proposed, records).await {
            Ok(grant) => {
                info!(
                    "event=share_create module=share status=ok root={} records={}",
                    root, record_count
                );
                Ok(grant)
            }
            Err(err) => {
                self.restore_scope(stores, root, moved, Scope::Private);
                warn!(
                    "event=share_create module=share status=error root={} error={}",
                    root, err
                );
                Err(match err {
                    RemoteError::AlreadyShared(root) => ShareError::AlreadyShared(root),
                    other => ShareError::ShareOperation(other),
                })
            }
        }
    }

    /// Grant of the aggregate owning `id`; `None` while it is private or has
    /// no local replica.
    pub async fn fetch_share(
        &self,
        stores: &DualStoreManager,
        id: EntityId,
    ) -> ShareResult<Option<ShareGrant>> {
        let Some(root) = stores.root_of(id)? else {
            return Ok(None);
        };
        if stores.scope_of_root(root) != Some(Scope::Shared) {
            return Ok(None);
        }
        self.remote
            .fetch_share(root)
            .await
            .map_err(ShareError::ShareOperation)
    }

    /// Invites `identity`; re-adding a present identity returns the grant unchanged.
    pub async fn add_participant(
        &self,
        grant: &ShareGrant,
        identity: &UserIdentity,
        permission: Permission,
    ) -> ShareResult<ShareGrant> {
        let current = self
            .remote
            .fetch_share(grant.root)
            .await
            .map_err(|err| ShareError::from_remote(err, &grant.reference))?
            .ok_or_else(|| ShareError::GrantNotFound(grant.reference.clone()))?;
        if !self.policy.may_invite(&current, self.me()) {
            return Err(ShareError::NotOwner);
        }
        let present = current.is_owner(identity)
            || current
                .participant(identity)
                .is_some_and(|participant| participant.is_active());
        if present {
            return Ok(current);
        }

        let updated = self
            .remote
            .add_participant(&current.reference, identity, permission)
            .await
            .map_err(|err| ShareError::from_remote(err, &current.reference))?;
        info!(
            "event=share_invite module=share status=ok share={} participants={}",
            updated.reference,
            updated.active_participants().count()
        );
        Ok(updated)
    }

    /// Owner removes anyone but themself; a participant may remove only themself.
    ///
    /// Leaving purges the local replica. The grant outlives its last participant.
    pub async fn remove_participant(
        &self,
        stores: &mut DualStoreManager,
        grant: &ShareGrant,
        identity: &UserIdentity,
    ) -> ShareResult<ShareGrant> {
        if grant.is_owner(identity) {
            return Err(ShareError::CannotRemoveOwner);
        }
        let leaving = identity == self.me();
        if !leaving && !grant.is_owner(self.me()) {
            return Err(ShareError::NotOwner);
        }

        let updated = self
            .remote
            .remove_participant(&grant.reference, identity)
            .await
            .map_err(|err| ShareError::from_remote(err, &grant.reference))?;
        if leaving {
            stores.purge_aggregate(grant.root)?;
        }
        info!(
            "event=share_remove_participant module=share status=ok share={} leaving={}",
            grant.reference, leaving
        );
        Ok(updated)
    }

    /// "Stop sharing" for the owner, "remove me" for anyone else.
    ///
    /// The owner keeps the aggregate as private data; other members lose their
    /// replicas on their next sync.
    pub async fn delete_share(
        &self,
        stores: &mut DualStoreManager,
        grant: &ShareGrant,
    ) -> ShareResult<()> {
        let me = self.me().clone();
        if !grant.is_owner(&me) {
            self.remove_participant(stores, grant, &me).await?;
            return Ok(());
        }

        let demoted = stores.move_aggregate(grant.root, Scope::Private)?;
        match self.remote.delete_share(&grant.reference).await {
            Ok(()) => {
                info!(
                    "event=share_delete module=share status=ok share={} root={}",
                    grant.reference, grant.root
                );
                Ok(())
            }
            Err(RemoteError::NotFound(_)) => {
                // Already gone remotely: either unshared elsewhere or the
                // aggregate was deleted. The revocation feed decides which.
                self.restore_scope(stores, grant.root, demoted, Scope::Shared);
                let report = stores
                    .import(&*self.remote, Scope::Shared)
                    .await
                    .map_err(|err| match err {
                        SyncError::Remote(err) => ShareError::ShareOperation(err),
                        SyncError::Store(err) => ShareError::Store(err),
                    })?;
                info!(
                    "event=share_delete module=share status=already_gone share={} root={} purged={} demoted={}",
                    grant.reference, grant.root, report.purged, report.demoted
                );
                Ok(())
            }
            Err(err) => {
                self.restore_scope(stores, grant.root, demoted, Scope::Shared);
                warn!(
                    "event=share_delete module=share status=error share={} error={}",
                    grant.reference, err
                );
                Err(ShareError::ShareOperation(err))
            }
        }
    }

    fn restore_scope(&self, stores: &mut DualStoreManager, root: EntityId, moved: bool, to: Scope) {
        if !moved {
            return;
        }
        if let Err(err) = stores.move_aggregate(root, to) {
            error!(
                "event=share_rollback module=share status=error root={} to={} error={}",
                root, to, err
            );
        }
    }
}
