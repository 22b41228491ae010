//! Ownership and permission checks for UI gating.
//!
//! Every check answers `false` when the remote cannot be asked; failures are
//! logged, never surfaced.

use crate::model::entity::EntityId;
use crate::model::scope::Scope;
use crate::model::share::ShareGrant;
use crate::remote::{RemoteDatabase, RemoteError, RemoteResult};
use crate::store::DualStoreManager;
use log::warn;
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
enum Capability {
    Update,
    Delete,
}

impl Capability {
    fn as_str(self) -> &'static str {
        match self {
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

pub struct PermissionGuard<R: ?Sized> {
    remote: Arc<R>,
}

impl<R: RemoteDatabase + ?Sized> PermissionGuard<R> {
    pub fn new(remote: Arc<R>) -> Self {
        Self { remote }
    }

    /// True when the object lives in the shared store or a grant for its root
    /// is visible remotely.
    pub async fn is_shared(&self, stores: &DualStoreManager, id: EntityId) -> bool {
        match stores.store_for(id) {
            Ok(Some(Scope::Shared)) => return true,
            Ok(_) => {}
            Err(err) => {
                warn!(
                    "event=guard_check module=share status=error check=is_shared entity={} error={}",
                    id, err
                );
                return false;
            }
        }
        self.grant_for(stores, id).await.is_some()
    }

    /// False for private objects; otherwise compares the caller to the owner.
    ///
    /// One remote grant fetch; an object with no visible grant is private.
    pub async fn is_owner(&self, stores: &DualStoreManager, id: EntityId) -> bool {
        self.grant_for(stores, id)
            .await
            .is_some_and(|grant| grant.is_owner(self.remote.current_user()))
    }

    pub async fn can_edit(&self, stores: &DualStoreManager, id: EntityId) -> bool {
        self.capability(stores, id, Capability::Update).await
    }

    pub async fn can_delete(&self, stores: &DualStoreManager, id: EntityId) -> bool {
        self.capability(stores, id, Capability::Delete).await
    }

    async fn grant_for(&self, stores: &DualStoreManager, id: EntityId) -> Option<ShareGrant> {
        let root = match stores.root_of(id) {
            Ok(root) => root.unwrap_or(id),
            Err(_) => id,
        };
        match self.remote.fetch_share(root).await {
            Ok(grant) => grant,
            Err(err) => {
                warn!(
                    "event=guard_check module=share status=error check=fetch_share root={} error={}",
                    root, err
                );
                None
            }
        }
    }

    async fn capability(&self, stores: &DualStoreManager, id: EntityId, capability: Capability) -> bool {
        let (scope, root) = match (stores.store_for(id), stores.root_of(id)) {
            (Ok(Some(scope)), Ok(Some(root))) => (scope, root),
            (Ok(_), Ok(_)) => return false,
            (Err(err), _) | (_, Err(err)) => {
                warn!(
                    "event=guard_check module=share status=error check={} entity={} error={}",
                    capability.as_str(),
                    id,
                    err
                );
                return false;
            }
        };
        if scope == Scope::Private {
            return true;
        }

        let answer = match self.ask(id, capability).await {
            // Not pushed yet; its aggregate decides.
            Err(RemoteError::NotFound(_)) if root != id => self.ask(root, capability).await,
            other => other,
        };
        match answer {
            Ok(allowed) => allowed,
            Err(err) => {
                warn!(
                    "event=guard_check module=share status=error check={} entity={} error={}",
                    capability.as_str(),
                    id,
                    err
                );
                false
            }
        }
    }

    async fn ask(&self, id: EntityId, capability: Capability) -> RemoteResult<bool> {
        match capability {
            Capability::Update => self.remote.can_update_record(id).await,
            Capability::Delete => self.remote.can_delete_record(id).await,
        }
    }
}
