//! In-process multi-user remote database.
//!
//! # Responsibility
//! - Emulate a push/pull record database with per-user private zones and
//!   per-aggregate share zones.
//! - Deliver change notifications to every subscribed device of affected users.
//!
//! # Invariants
//! - Records merge with the same per-property trump rule as local stores.
//! - Tombstones win over later upserts of the same record.
//! - Every visible mutation advances the global sequence used as change token.

use crate::merge::merge_entity;
use crate::model::entity::{Entity, EntityId};
use crate::model::scope::Scope;
use crate::model::share::{
    AcceptanceStatus, InvitationMetadata, Participant, Permission, ShareGrant, ShareRecordRef,
    UserIdentity,
};
use crate::notify::SignalSender;
use crate::remote::{
    ChangeToken, PullBatch, RecordChange, RemoteDatabase, RemoteError, RemoteResult, Revocation,
    RevocationReason,
};
use async_trait::async_trait;
use log::debug;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredRecord {
    entity: Entity,
    deleted: bool,
    seq: u64,
}

impl StoredRecord {
    fn to_change(&self) -> RecordChange {
        if self.deleted {
            RecordChange::Delete {
                id: self.entity.id,
                root: self.entity.root,
            }
        } else {
            RecordChange::Upsert(self.entity.clone())
        }
    }
}

type Zone = BTreeMap<EntityId, StoredRecord>;

#[derive(Debug)]
struct ShareZone {
    grant: ShareGrant,
    records: Zone,
    /// Sequence at which each member gained access; newer than a client's
    /// token means that client needs a full snapshot.
    joined: HashMap<UserIdentity, u64>,
    active: bool,
}

impl ShareZone {
    fn access(&self, user: &UserIdentity) -> Option<Permission> {
        if !self.active {
            return None;
        }
        self.grant.permission_for(user)
    }

    /// Owner plus every participant that has not been removed.
    fn members(&self) -> Vec<UserIdentity> {
        let mut members = vec![self.grant.owner.clone()];
        members.extend(
            self.grant
                .active_participants()
                .map(|participant| participant.identity.clone()),
        );
        members
    }
}

#[derive(Debug)]
struct RevocationEntry {
    seq: u64,
    user: UserIdentity,
    revocation: Revocation,
}

#[derive(Default)]
struct ServerState {
    seq: u64,
    private_zones: HashMap<UserIdentity, Zone>,
    shares: HashMap<EntityId, ShareZone>,
    revocations: Vec<RevocationEntry>,
    listeners: Vec<(UserIdentity, SignalSender)>,
    /// Scripted outcomes for upcoming calls; `None` lets one call through.
    injected_failures: VecDeque<Option<RemoteError>>,
}

impl ServerState {
    fn take_failure(&mut self) -> RemoteResult<()> {
        match self.injected_failures.pop_front() {
            Some(Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    fn active_root_for(&self, share: &ShareRecordRef) -> Option<EntityId> {
        self.shares
            .values()
            .find(|zone| zone.active && &zone.grant.reference == share)
            .map(|zone| zone.grant.root)
    }

    fn active_zone_mut(&mut self, share: &ShareRecordRef) -> RemoteResult<&mut ShareZone> {
        let root = self
            .active_root_for(share)
            .ok_or_else(|| RemoteError::NotFound(format!("share {share}")))?;
        self.shares
            .get_mut(&root)
            .ok_or_else(|| RemoteError::NotFound(format!("share {share}")))
    }

    fn notify(&mut self, users: &[UserIdentity], scope: Scope) {
        self.listeners.retain(|(user, sender)| {
            if users.contains(user) {
                sender.remote_notification(scope)
            } else {
                true
            }
        });
    }
}

fn apply_upsert(zone: &mut Zone, entity: &Entity, seq: &mut u64) -> bool {
    match zone.get_mut(&entity.id) {
        Some(existing) if existing.deleted => false,
        Some(existing) => {
            let outcome = merge_entity(Some(&existing.entity), entity);
            if outcome.is_noop() {
                return false;
            }
            *seq += 1;
            existing.entity = outcome.merged;
            existing.seq = *seq;
            true
        }
        None => {
            *seq += 1;
            zone.insert(
                entity.id,
                StoredRecord {
                    entity: entity.clone(),
                    deleted: false,
                    seq: *seq,
                },
            );
            true
        }
    }
}

/// Tombstones `id` and everything it transitively owns.
fn apply_delete(zone: &mut Zone, id: EntityId, seq: &mut u64) -> bool {
    let mut doomed = vec![id];
    let mut cursor = 0;
    while cursor < doomed.len() {
        let parent = doomed[cursor];
        doomed.extend(
            zone.values()
                .filter(|record| record.entity.parent == Some(parent))
                .map(|record| record.entity.id),
        );
        cursor += 1;
    }

    let mut changed = false;
    for id in doomed {
        if let Some(record) = zone.get_mut(&id) {
            if !record.deleted {
                *seq += 1;
                record.deleted = true;
                record.seq = *seq;
                changed = true;
            }
        }
    }
    changed
}

enum PushTarget {
    Private,
    Share(EntityId),
}

/// Shared state of one emulated remote database; hand out one client per
/// signed-in device with [`RemoteServer::client`].
#[derive(Clone, Default)]
pub struct RemoteServer {
    state: Arc<Mutex<ServerState>>,
}

impl RemoteServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client bound to `user`.
    pub fn client(&self, user: UserIdentity) -> InMemoryRemote {
        InMemoryRemote {
            server: self.clone(),
            user,
        }
    }

    /// Makes the next remote call (from any client) fail with `err`.
    pub async fn inject_failure(&self, err: RemoteError) {
        self.inject_failure_after(0, err).await;
    }

    /// Lets `calls` remote calls succeed, then fails the following one.
    pub async fn inject_failure_after(&self, calls: usize, err: RemoteError) {
        let mut state = self.state.lock().await;
        state
            .injected_failures
            .extend(std::iter::repeat_with(|| None).take(calls));
        state.injected_failures.push_back(Some(err));
    }

    /// Active grant for `root`, regardless of caller.
    pub async fn share_for(&self, root: EntityId) -> Option<ShareGrant> {
        let state = self.state.lock().await;
        state
            .shares
            .get(&root)
            .filter(|zone| zone.active)
            .map(|zone| zone.grant.clone())
    }

    /// Live (non-tombstoned) copy of one record in any zone.
    pub async fn record(&self, id: EntityId) -> Option<Entity> {
        let state = self.state.lock().await;
        state
            .private_zones
            .values()
            .chain(state.shares.values().filter(|zone| zone.active).map(|zone| &zone.records))
            .filter_map(|zone| zone.get(&id))
            .find(|record| !record.deleted)
            .map(|record| record.entity.clone())
    }
}

/// One device's client of a [`RemoteServer`].
#[derive(Clone)]
pub struct InMemoryRemote {
    server: RemoteServer,
    user: UserIdentity,
}

impl InMemoryRemote {
    pub fn server(&self) -> &RemoteServer {
        &self.server
    }

    fn capability(&self, state: &ServerState, id: EntityId) -> RemoteResult<bool> {
        let in_private = state
            .private_zones
            .get(&self.user)
            .and_then(|zone| zone.get(&id))
            .is_some_and(|record| !record.deleted);
        if in_private {
            return Ok(true);
        }

        for zone in state.shares.values().filter(|zone| zone.active) {
            if zone.records.get(&id).is_some_and(|record| !record.deleted) {
                return Ok(zone.access(&self.user) == Some(Permission::ReadWrite));
            }
        }
        Err(RemoteError::NotFound(format!("record {id}")))
    }
}

#[async_trait]
impl RemoteDatabase for InMemoryRemote {
    fn current_user(&self) -> &UserIdentity {
        &self.user
    }

    async fn subscribe(&self, sender: SignalSender) {
        let mut state = self.server.state.lock().await;
        state.listeners.push((self.user.clone(), sender));
    }

    async fn push(&self, scope: Scope, changes: Vec<RecordChange>) -> RemoteResult<()> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;

        let mut targets: BTreeMap<EntityId, PushTarget> = BTreeMap::new();
        for change in &changes {
            let root = change.root();
            if targets.contains_key(&root) {
                continue;
            }
            let target = match state.shares.get(&root).filter(|zone| zone.active) {
                Some(zone) => match zone.access(&self.user) {
                    Some(Permission::ReadWrite) => PushTarget::Share(root),
                    _ => {
                        return Err(RemoteError::PermissionDenied(format!(
                            "write access to shared aggregate {root}"
                        )))
                    }
                },
                None if scope == Scope::Shared => {
                    return Err(RemoteError::NotFound(format!("share zone for {root}")))
                }
                None => PushTarget::Private,
            };
            targets.insert(root, target);
        }

        let ServerState {
            seq,
            private_zones,
            shares,
            revocations,
            ..
        } = &mut *state;
        let mut notify_private = false;
        let mut notify_shared: Vec<UserIdentity> = Vec::new();

        for change in &changes {
            let root = change.root();
            match targets.get(&root) {
                Some(PushTarget::Private) => {
                    let zone = private_zones.entry(self.user.clone()).or_default();
                    notify_private |= match change {
                        RecordChange::Upsert(entity) => apply_upsert(zone, entity, seq),
                        RecordChange::Delete { id, .. } => apply_delete(zone, *id, seq),
                    };
                }
                Some(PushTarget::Share(root)) => {
                    let Some(zone) = shares.get_mut(root) else {
                        continue;
                    };
                    let changed = match change {
                        RecordChange::Upsert(entity) => apply_upsert(&mut zone.records, entity, seq),
                        RecordChange::Delete { id, .. } => {
                            apply_delete(&mut zone.records, *id, seq)
                        }
                    };
                    let members = zone.members();
                    if matches!(change, RecordChange::Delete { id, .. } if id == root) {
                        zone.active = false;
                        *seq += 1;
                        for member in &members {
                            revocations.push(RevocationEntry {
                                seq: *seq,
                                user: member.clone(),
                                revocation: Revocation {
                                    root: *root,
                                    owner: zone.grant.owner.clone(),
                                    reason: RevocationReason::AggregateDeleted,
                                },
                            });
                        }
                    }
                    if changed {
                        for member in members {
                            if !notify_shared.contains(&member) {
                                notify_shared.push(member);
                            }
                        }
                    }
                }
                None => {}
            }
        }

        debug!(
            "event=remote_push module=remote status=ok scope={} user={} changes={}",
            scope,
            self.user,
            changes.len()
        );
        if notify_private {
            state.notify(&[self.user.clone()], Scope::Private);
        }
        if !notify_shared.is_empty() {
            state.notify(&notify_shared, Scope::Shared);
        }
        Ok(())
    }

    async fn pull(&self, scope: Scope, since: Option<ChangeToken>) -> RemoteResult<PullBatch> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        let since = since.map_or(0, |token| token.0);

        let mut records: Vec<&StoredRecord> = Vec::new();
        let mut revocations = Vec::new();
        match scope {
            Scope::Private => {
                if let Some(zone) = state.private_zones.get(&self.user) {
                    records.extend(zone.values().filter(|record| record.seq > since));
                }
            }
            Scope::Shared => {
                for zone in state.shares.values() {
                    if zone.access(&self.user).is_none() {
                        continue;
                    }
                    let snapshot = zone
                        .joined
                        .get(&self.user)
                        .is_some_and(|joined| *joined > since);
                    records.extend(zone.records.values().filter(|record| {
                        if snapshot {
                            !record.deleted
                        } else {
                            record.seq > since
                        }
                    }));
                }
                revocations.extend(
                    state
                        .revocations
                        .iter()
                        .filter(|entry| entry.user == self.user && entry.seq > since)
                        .map(|entry| entry.revocation.clone()),
                );
            }
        }
        records.sort_by_key(|record| record.seq);

        Ok(PullBatch {
            changes: records.into_iter().map(StoredRecord::to_change).collect(),
            revocations,
            token: Some(ChangeToken(state.seq)),
        })
    }

    async fn fetch_share(&self, root: EntityId) -> RemoteResult<Option<ShareGrant>> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        Ok(state
            .shares
            .get(&root)
            .filter(|zone| zone.access(&self.user).is_some())
            .map(|zone| zone.grant.clone()))
    }

    async fn save_share(&self, grant: ShareGrant, records: Vec<Entity>) -> RemoteResult<ShareGrant> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        if grant.owner != self.user {
            return Err(RemoteError::PermissionDenied(format!(
                "only {} may share {}",
                grant.owner, grant.root
            )));
        }
        let root = grant.root;
        if state.shares.get(&root).is_some_and(|zone| zone.active) {
            return Err(RemoteError::AlreadyShared(root));
        }

        let ServerState {
            seq,
            private_zones,
            shares,
            ..
        } = &mut *state;
        let mut zone_records = Zone::new();
        if let Some(private) = private_zones.get_mut(&self.user) {
            let moving: Vec<EntityId> = private
                .values()
                .filter(|record| record.entity.root == root)
                .map(|record| record.entity.id)
                .collect();
            for id in moving {
                if let Some(mut record) = private.remove(&id) {
                    if record.deleted {
                        continue;
                    }
                    *seq += 1;
                    record.seq = *seq;
                    zone_records.insert(id, record);
                }
            }
        }
        for entity in records.iter().filter(|entity| entity.root == root) {
            apply_upsert(&mut zone_records, entity, seq);
        }
        *seq += 1;

        let created = ShareGrant::new(root, self.user.clone(), grant.title);
        shares.insert(
            root,
            ShareZone {
                grant: created.clone(),
                records: zone_records,
                joined: HashMap::from([(self.user.clone(), *seq)]),
                active: true,
            },
        );
        state.notify(&[self.user.clone()], Scope::Shared);
        Ok(created)
    }

    async fn add_participant(
        &self,
        share: &ShareRecordRef,
        identity: &UserIdentity,
        permission: Permission,
    ) -> RemoteResult<ShareGrant> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        let zone = state.active_zone_mut(share)?;
        if zone.access(&self.user) != Some(Permission::ReadWrite) {
            return Err(RemoteError::PermissionDenied(format!(
                "{} may not invite to {share}",
                self.user
            )));
        }
        if zone.grant.is_owner(identity) {
            return Ok(zone.grant.clone());
        }
        match zone.grant.participant_mut(identity) {
            Some(participant) if participant.is_active() => {}
            Some(participant) => {
                participant.status = AcceptanceStatus::Pending;
                participant.permission = permission;
            }
            None => zone.grant.participants.push(Participant {
                identity: identity.clone(),
                permission,
                status: AcceptanceStatus::Pending,
            }),
        }
        Ok(zone.grant.clone())
    }

    async fn remove_participant(
        &self,
        share: &ShareRecordRef,
        identity: &UserIdentity,
    ) -> RemoteResult<ShareGrant> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        let user = self.user.clone();
        let zone = state.active_zone_mut(share)?;
        if zone.grant.is_owner(identity) {
            return Err(RemoteError::PermissionDenied(
                "the owner cannot be removed from a share".to_string(),
            ));
        }
        if !zone.grant.is_owner(&user) && &user != identity {
            return Err(RemoteError::PermissionDenied(format!(
                "{user} may not remove {identity}"
            )));
        }
        let removed = match zone.grant.participant_mut(identity) {
            Some(participant) if participant.is_active() => {
                participant.status = AcceptanceStatus::Removed;
                true
            }
            _ => false,
        };
        zone.joined.remove(identity);
        let grant = zone.grant.clone();

        if removed {
            state.seq += 1;
            let seq = state.seq;
            state.revocations.push(RevocationEntry {
                seq,
                user: identity.clone(),
                revocation: Revocation {
                    root: grant.root,
                    owner: grant.owner.clone(),
                    reason: RevocationReason::AccessRemoved,
                },
            });
            state.notify(&[identity.clone()], Scope::Shared);
        }
        Ok(grant)
    }

    async fn delete_share(&self, share: &ShareRecordRef) -> RemoteResult<()> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        let zone = state.active_zone_mut(share)?;
        if !zone.grant.is_owner(&self.user) {
            return Err(RemoteError::PermissionDenied(format!(
                "only the owner may delete {share}"
            )));
        }
        zone.active = false;
        let members = zone.members();
        let root = zone.grant.root;
        let owner = zone.grant.owner.clone();
        let records: Vec<StoredRecord> = std::mem::take(&mut zone.records)
            .into_values()
            .filter(|record| !record.deleted)
            .collect();

        let ServerState {
            seq,
            private_zones,
            revocations,
            ..
        } = &mut *state;
        let private = private_zones.entry(owner.clone()).or_default();
        for mut record in records {
            *seq += 1;
            record.seq = *seq;
            private.insert(record.entity.id, record);
        }
        *seq += 1;
        for member in &members {
            revocations.push(RevocationEntry {
                seq: *seq,
                user: member.clone(),
                revocation: Revocation {
                    root,
                    owner: owner.clone(),
                    reason: RevocationReason::Unshared,
                },
            });
        }

        state.notify(&[owner], Scope::Private);
        state.notify(&members, Scope::Shared);
        Ok(())
    }

    async fn accept_share(&self, invitation: &InvitationMetadata) -> RemoteResult<ShareGrant> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        if invitation.invitee != self.user {
            return Err(RemoteError::NotInvited);
        }
        let user = self.user.clone();
        let zone = state
            .active_zone_mut(&invitation.share)
            .map_err(|_| RemoteError::ShareRevoked)?;
        if zone.grant.is_owner(&user) {
            return Err(RemoteError::AlreadyParticipant);
        }
        match zone.grant.participant_mut(&user) {
            None => return Err(RemoteError::NotInvited),
            Some(participant) => match participant.status {
                AcceptanceStatus::Removed => return Err(RemoteError::ShareRevoked),
                AcceptanceStatus::Accepted => return Err(RemoteError::AlreadyParticipant),
                AcceptanceStatus::Pending => participant.status = AcceptanceStatus::Accepted,
            },
        }
        let grant = zone.grant.clone();

        state.seq += 1;
        let seq = state.seq;
        if let Some(zone) = state.shares.get_mut(&grant.root) {
            zone.joined.insert(user.clone(), seq);
        }
        state.notify(&[user], Scope::Shared);
        Ok(grant)
    }

    async fn can_update_record(&self, id: EntityId) -> RemoteResult<bool> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        self.capability(&state, id)
    }

    async fn can_delete_record(&self, id: EntityId) -> RemoteResult<bool> {
        let mut state = self.server.state.lock().await;
        state.take_failure()?;
        self.capability(&state, id)
    }
}

#[cfg(test)]
mod tests {
    use super::RemoteServer;
    use crate::model::entity::{Entity, EntityKind, FieldStamp};
    use crate::model::scope::Scope;
    use crate::model::share::{Permission, ShareGrant, UserIdentity};
    use crate::remote::{RecordChange, RemoteDatabase, RemoteError, RevocationReason};
    use uuid::Uuid;

    fn identity(value: &str) -> UserIdentity {
        UserIdentity::parse(value).expect("valid identity")
    }

    fn list(title: &str) -> Entity {
        let mut entity = Entity::new_root(EntityKind::PackingList);
        entity.set("title", title, FieldStamp::new(1, Uuid::from_u128(1)));
        entity
    }

    #[tokio::test]
    async fn private_pull_returns_only_changes_after_token() {
        let server = RemoteServer::new();
        let alice = server.client(identity("alice@example.com"));
        let first = list("A");
        alice
            .push(Scope::Private, vec![RecordChange::Upsert(first.clone())])
            .await
            .expect("push first");
        let batch = alice.pull(Scope::Private, None).await.expect("pull all");
        assert_eq!(batch.changes.len(), 1);

        let second = list("B");
        alice
            .push(Scope::Private, vec![RecordChange::Upsert(second.clone())])
            .await
            .expect("push second");
        let delta = alice
            .pull(Scope::Private, batch.token)
            .await
            .expect("pull delta");
        assert_eq!(delta.changes, vec![RecordChange::Upsert(second)]);
    }

    #[tokio::test]
    async fn read_only_participant_cannot_push_into_share() {
        let server = RemoteServer::new();
        let alice = server.client(identity("alice@example.com"));
        let bob = server.client(identity("bob@example.com"));
        let root = list("Trip");
        let grant = alice
            .save_share(
                ShareGrant::new(root.id, identity("alice@example.com"), "Trip"),
                vec![root.clone()],
            )
            .await
            .expect("share");
        let grant = alice
            .add_participant(&grant.reference, &identity("bob@example.com"), Permission::ReadOnly)
            .await
            .expect("invite");
        let invitation = grant
            .invitation_for(&identity("bob@example.com"))
            .expect("invitation");
        bob.accept_share(&invitation).await.expect("accept");

        let err = bob
            .push(Scope::Shared, vec![RecordChange::Upsert(root.clone())])
            .await
            .expect_err("read-only push must fail");
        assert!(matches!(err, RemoteError::PermissionDenied(_)));
        assert!(!bob.can_update_record(root.id).await.expect("capability"));
        assert!(alice.can_delete_record(root.id).await.expect("capability"));
    }

    #[tokio::test]
    async fn deleting_shared_root_revokes_every_member() {
        let server = RemoteServer::new();
        let alice = server.client(identity("alice@example.com"));
        let root = list("Trip");
        alice
            .save_share(
                ShareGrant::new(root.id, identity("alice@example.com"), "Trip"),
                vec![root.clone()],
            )
            .await
            .expect("share");

        alice
            .push(
                Scope::Shared,
                vec![RecordChange::Delete {
                    id: root.id,
                    root: root.id,
                }],
            )
            .await
            .expect("delete root");

        assert!(server.share_for(root.id).await.is_none());
        let batch = alice.pull(Scope::Shared, None).await.expect("pull");
        assert_eq!(batch.revocations.len(), 1);
        assert_eq!(batch.revocations[0].reason, RevocationReason::AggregateDeleted);
    }

    #[tokio::test]
    async fn injected_failure_is_consumed_once() {
        let server = RemoteServer::new();
        let alice = server.client(identity("alice@example.com"));
        server.inject_failure(RemoteError::Unavailable).await;

        assert_eq!(
            alice.pull(Scope::Private, None).await,
            Err(RemoteError::Unavailable)
        );
        assert!(alice.pull(Scope::Private, None).await.is_ok());
    }
}
