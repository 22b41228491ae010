//! Persistence controller: the single entry point hosts construct at startup.
//!
//! # Responsibility
//! - Load both stores and wire the remote client, bridge and share components.
//! - Run store work and handler callbacks on the caller's task only.
//!
//! # Invariants
//! - No operation is reachable before both stores loaded.
//! - Remote results are applied to the stores only after the remote call
//!   returned.

use crate::config::CoreConfig;
use crate::model::entity::{Entity, EntityId};
use crate::model::scope::Scope;
use crate::model::share::{InvitationMetadata, Permission, ShareGrant, UserIdentity};
use crate::notify::{ChangeBridge, SubscriptionId, SyncEvent};
use crate::remote::RemoteDatabase;
use crate::share::{
    AcceptError, AcceptanceHandler, PermissionGuard, ShareCoordinator, ShareResult,
};
use crate::store::{
    configure_stores, DualStoreManager, SaveError, SaveReport, StoreLoadError, StoreResult,
    SyncError, Transaction,
};
use log::info;
use std::sync::Arc;

pub struct PersistenceController<R: RemoteDatabase + ?Sized> {
    config: CoreConfig,
    remote: Arc<R>,
    stores: DualStoreManager,
    bridge: ChangeBridge,
    coordinator: ShareCoordinator<R>,
    guard: PermissionGuard<R>,
    acceptance: AcceptanceHandler<R>,
}

impl<R: RemoteDatabase + ?Sized> PersistenceController<R> {
    /// Loads both stores and subscribes to remote notifications.
    ///
    /// # Errors
    /// - `Misconfigured` when the config is invalid or names another user
    ///   than the remote client is signed in as.
    /// - Any other `StoreLoadError` when either store cannot be opened;
    ///   nothing runs in a partially loaded state.
    pub async fn start(config: CoreConfig, remote: Arc<R>) -> Result<Self, StoreLoadError> {
        config
            .validate()
            .map_err(|err| StoreLoadError::Misconfigured(err.to_string()))?;
        if remote.current_user() != &config.identity {
            return Err(StoreLoadError::Misconfigured(format!(
                "config identity `{}` does not match remote user `{}`",
                config.identity,
                remote.current_user()
            )));
        }
        let (private, shared) = configure_stores(&config);
        let mut stores = DualStoreManager::load(private, shared, config.device_id)?;
        let bridge = ChangeBridge::new();
        stores.attach_signals(bridge.sender());
        remote.subscribe(bridge.sender()).await;

        info!(
            "event=controller_start module=controller status=ok device={} policy={:?}",
            config.device_id, config.invite_policy
        );
        Ok(Self {
            coordinator: ShareCoordinator::new(Arc::clone(&remote), config.invite_policy),
            guard: PermissionGuard::new(Arc::clone(&remote)),
            acceptance: AcceptanceHandler::new(Arc::clone(&remote), bridge.sender()),
            config,
            remote,
            stores,
            bridge,
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn current_user(&self) -> &UserIdentity {
        self.remote.current_user()
    }

    /// Read handle over both stores.
    pub fn stores(&self) -> &DualStoreManager {
        &self.stores
    }

    pub fn get(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        self.stores.get(id)
    }

    /// Aggregate roots visible locally, private first.
    pub fn lists(&self) -> StoreResult<Vec<(Scope, Entity)>> {
        let mut lists = Vec::new();
        for scope in Scope::ALL {
            lists.extend(self.stores.roots(scope)?.into_iter().map(|root| (scope, root)));
        }
        Ok(lists)
    }

    pub fn begin(&self) -> Transaction {
        self.stores.begin()
    }

    pub fn save(&mut self, transaction: Transaction) -> Result<SaveReport, SaveError> {
        self.stores.save(transaction)
    }

    /// Exports and imports both scopes, then dispatches resulting signals.
    pub async fn sync(&mut self) -> Result<(), SyncError> {
        let synced = self.stores.sync_all(&*self.remote).await;
        let processed = self.process_signals().await;
        synced.and(processed)
    }

    /// Imports every scope the remote reported as changed and runs the
    /// subscribed handlers for all queued signals.
    pub async fn process_signals(&mut self) -> Result<(), SyncError> {
        let mut first_error = None;
        loop {
            let due = self.bridge.dispatch_pending();
            if due.is_empty() {
                break;
            }
            for scope in due {
                if let Err(err) = self.stores.import(&*self.remote, scope).await {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn on_remote_change(&mut self, handler: impl FnMut() + Send + 'static) -> SubscriptionId {
        self.bridge.on_remote_change(handler)
    }

    pub fn on_sync_event_completed(
        &mut self,
        handler: impl FnMut(&SyncEvent) + Send + 'static,
    ) -> SubscriptionId {
        self.bridge.on_sync_event_completed(handler)
    }

    pub fn on_invitation_accepted(
        &mut self,
        handler: impl FnMut(EntityId) + Send + 'static,
    ) -> SubscriptionId {
        self.bridge.on_invitation_accepted(handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bridge.unsubscribe(id)
    }

    pub async fn create_share(&mut self, root: EntityId) -> ShareResult<ShareGrant> {
        let grant = self.coordinator.create_share(&mut self.stores, root).await?;
        self.bridge.sender().store_changed(Scope::Shared);
        Ok(grant)
    }

    pub async fn fetch_share(&self, id: EntityId) -> ShareResult<Option<ShareGrant>> {
        self.coordinator.fetch_share(&self.stores, id).await
    }

    pub async fn add_participant(
        &self,
        grant: &ShareGrant,
        identity: &UserIdentity,
        permission: Permission,
    ) -> ShareResult<ShareGrant> {
        self.coordinator
            .add_participant(grant, identity, permission)
            .await
    }

    pub async fn remove_participant(
        &mut self,
        grant: &ShareGrant,
        identity: &UserIdentity,
    ) -> ShareResult<ShareGrant> {
        let updated = self
            .coordinator
            .remove_participant(&mut self.stores, grant, identity)
            .await?;
        if identity == self.remote.current_user() {
            self.bridge.sender().store_changed(Scope::Shared);
        }
        Ok(updated)
    }

    pub async fn delete_share(&mut self, grant: &ShareGrant) -> ShareResult<()> {
        self.coordinator.delete_share(&mut self.stores, grant).await?;
        for scope in Scope::ALL {
            self.bridge.sender().store_changed(scope);
        }
        Ok(())
    }

    pub async fn is_shared(&self, id: EntityId) -> bool {
        self.guard.is_shared(&self.stores, id).await
    }

    pub async fn is_owner(&self, id: EntityId) -> bool {
        self.guard.is_owner(&self.stores, id).await
    }

    pub async fn can_edit(&self, id: EntityId) -> bool {
        self.guard.can_edit(&self.stores, id).await
    }

    pub async fn can_delete(&self, id: EntityId) -> bool {
        self.guard.can_delete(&self.stores, id).await
    }

    pub async fn accept_invitation(&self, invitation: &InvitationMetadata) -> Result<(), AcceptError> {
        self.acceptance.accept_invitation(invitation).await
    }

    pub async fn accept_invitation_json(&self, payload: &str) -> Result<(), AcceptError> {
        self.acceptance.accept_invitation_json(payload).await
    }
}
