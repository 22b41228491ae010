//! Dual remote-backed store manager.
//!
//! # Responsibility
//! - Load both physical stores before any read/write is permitted.
//! - Commit local transactions atomically across both stores.
//! - Export each store's outbox to its remote scope and import remote changes
//!   with the per-property trump merge.
//!
//! # Invariants
//! - The scope index maps every local aggregate root to the store that holds
//!   it and is rebuilt from physical membership after every import.
//! - A remote upsert never resurrects an entity with a pending local delete.
//! - Every import, even an empty one, emits a store-changed signal.

use crate::clock::{now_epoch_ms, WriteClock};
use crate::config::CoreConfig;
use crate::db::{attach_store, open_primary_store, StoreLocation};
use crate::merge::merge_entity;
use crate::model::entity::{
    is_valid_field_name, DeviceId, Entity, EntityId, EntityKind, FieldStamp, StampedValue,
};
use crate::model::scope::Scope;
use crate::model::share::UserIdentity;
use crate::notify::{SignalSender, SyncEvent, SyncEventKind, SyncOutcome};
use crate::remote::{
    ChangeToken, PullBatch, RecordChange, RemoteDatabase, RemoteError, Revocation,
    RevocationReason,
};
use crate::store::entity_repo::{self, EntityRepo, PendingChange, PendingOp};
use crate::store::transaction::{StagedChange, Transaction};
use crate::store::{SaveError, StoreError, StoreLoadError, StoreResult, SyncError};
use log::{error, info, warn};
use rusqlite::Connection;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

const CHANGE_TOKEN_KEY: &str = "remote_change_token";

/// Binding of one physical store to one remote scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreDescription {
    pub scope: Scope,
    pub location: StoreLocation,
}

/// Describes the private and shared stores for `config`.
pub fn configure_stores(config: &CoreConfig) -> (StoreDescription, StoreDescription) {
    let (private, shared) = config.store_locations();
    (
        StoreDescription {
            scope: Scope::Private,
            location: private,
        },
        StoreDescription {
            scope: Scope::Shared,
            location: shared,
        },
    )
}

/// Counts of one committed local transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub inserted: usize,
    pub fields_written: usize,
    pub deleted: usize,
}

/// Counts of one export batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportReport {
    pub scope: Scope,
    pub pushed: usize,
    /// Entries the remote refused permanently. Their aggregate is discarded
    /// locally until a pull restores the remote copy.
    pub rejected: usize,
}

/// Counts of one import batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportReport {
    pub scope: Scope,
    pub upserted: usize,
    pub deleted: usize,
    pub purged: usize,
    pub demoted: usize,
    pub moved: usize,
    pub skipped: usize,
}

impl ImportReport {
    fn new(scope: Scope) -> Self {
        Self {
            scope,
            upserted: 0,
            deleted: 0,
            purged: 0,
            demoted: 0,
            moved: 0,
            skipped: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Located {
    scope: Scope,
    root: EntityId,
    kind: EntityKind,
}

/// Owner of the process-wide transactional context over both stores.
pub struct DualStoreManager {
    conn: Connection,
    device: DeviceId,
    clock: WriteClock,
    scope_index: HashMap<EntityId, Scope>,
    signals: Option<SignalSender>,
}

impl DualStoreManager {
    /// Opens, attaches and migrates both stores, then indexes their roots.
    ///
    /// # Errors
    /// - `Misconfigured` when descriptions are not one private + one shared
    ///   store at distinct locations.
    /// - `Open` naming the scope whose store failed.
    pub fn load(
        private: StoreDescription,
        shared: StoreDescription,
        device: DeviceId,
    ) -> Result<Self, StoreLoadError> {
        if private.scope != Scope::Private || shared.scope != Scope::Shared {
            return Err(StoreLoadError::Misconfigured(format!(
                "expected private+shared descriptions, got {}+{}",
                private.scope, shared.scope
            )));
        }
        if matches!(private.location, StoreLocation::File(_)) && private.location == shared.location
        {
            return Err(StoreLoadError::Misconfigured(format!(
                "private and shared stores share one file `{}`",
                private.location
            )));
        }

        let started_at = Instant::now();
        let mut conn =
            open_primary_store(&private.location).map_err(|source| StoreLoadError::Open {
                scope: Scope::Private,
                source,
            })?;
        attach_store(&mut conn, &shared.location).map_err(|source| StoreLoadError::Open {
            scope: Scope::Shared,
            source,
        })?;

        let mut manager = Self {
            conn,
            device,
            clock: WriteClock::new(device),
            scope_index: HashMap::new(),
            signals: None,
        };
        manager
            .rebuild_scope_index()
            .map_err(StoreLoadError::Index)?;

        info!(
            "event=stores_load module=store status=ok roots={} duration_ms={}",
            manager.scope_index.len(),
            started_at.elapsed().as_millis()
        );
        Ok(manager)
    }

    /// Routes store-changed and sync-completed signals to a bridge.
    pub fn attach_signals(&mut self, sender: SignalSender) {
        self.signals = Some(sender);
    }

    pub fn device_id(&self) -> DeviceId {
        self.device
    }

    fn repo(&self, scope: Scope) -> EntityRepo<'_> {
        EntityRepo::new(&self.conn, scope)
    }

    /// Scope of the store currently holding `id`'s aggregate.
    pub fn store_for(&self, id: EntityId) -> StoreResult<Option<Scope>> {
        Ok(locate(&self.conn, id)?.map(|located| {
            self.scope_index
                .get(&located.root)
                .copied()
                .unwrap_or(located.scope)
        }))
    }

    /// Indexed scope of one aggregate root.
    pub fn scope_of_root(&self, root: EntityId) -> Option<Scope> {
        self.scope_index.get(&root).copied()
    }

    pub fn root_of(&self, id: EntityId) -> StoreResult<Option<EntityId>> {
        Ok(locate(&self.conn, id)?.map(|located| located.root))
    }

    pub fn get(&self, id: EntityId) -> StoreResult<Option<Entity>> {
        match locate(&self.conn, id)? {
            Some(located) => self.repo(located.scope).get(id),
            None => Ok(None),
        }
    }

    pub fn children(&self, id: EntityId) -> StoreResult<Vec<Entity>> {
        match locate(&self.conn, id)? {
            Some(located) => self.repo(located.scope).children(id),
            None => Ok(Vec::new()),
        }
    }

    /// Aggregate roots held by one store.
    pub fn roots(&self, scope: Scope) -> StoreResult<Vec<Entity>> {
        self.repo(scope).roots()
    }

    /// Every entity of one aggregate, parent-first.
    pub fn aggregate(&self, root: EntityId) -> StoreResult<Vec<Entity>> {
        match locate(&self.conn, root)? {
            Some(located) => self.repo(located.scope).aggregate(root),
            None => Ok(Vec::new()),
        }
    }

    pub fn pending_changes(&self, scope: Scope) -> StoreResult<Vec<PendingChange>> {
        self.repo(scope).pending_changes()
    }

    pub fn change_token(&self, scope: Scope) -> StoreResult<Option<ChangeToken>> {
        match self.repo(scope).state(CHANGE_TOKEN_KEY)? {
            Some(value) => value
                .parse::<u64>()
                .map(|seq| Some(ChangeToken(seq)))
                .map_err(|_| StoreError::InvalidData(format!("invalid change token `{value}`"))),
            None => Ok(None),
        }
    }

    /// Starts a new unit of local work.
    pub fn begin(&self) -> Transaction {
        Transaction::new()
    }

    /// Commits staged changes in one local transaction and queues their
    /// remote pushes in the store that owns each aggregate.
    ///
    /// # Errors
    /// Any invalid staged change rolls back the whole transaction.
    pub fn save(&mut self, transaction: Transaction) -> Result<SaveReport, SaveError> {
        if transaction.is_empty() {
            return Ok(SaveReport::default());
        }
        let started_at = Instant::now();
        let stamp = self.clock.stamp();
        let mut report = SaveReport::default();
        let mut new_roots = Vec::new();
        let mut removed_roots = Vec::new();

        let tx = self.conn.transaction()?;
        if let Err(err) = apply_staged(
            &tx,
            transaction.into_changes(),
            stamp,
            &mut report,
            &mut new_roots,
            &mut removed_roots,
        ) {
            warn!(
                "event=store_save module=store status=error duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }
        tx.commit()?;

        for root in new_roots {
            self.scope_index.insert(root, Scope::Private);
        }
        for root in removed_roots {
            self.scope_index.remove(&root);
        }
        info!(
            "event=store_save module=store status=ok inserted={} fields={} deleted={} duration_ms={}",
            report.inserted,
            report.fields_written,
            report.deleted,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    /// Moves one aggregate into the store for `to`. Returns whether it moved.
    pub(crate) fn move_aggregate(&mut self, root: EntityId, to: Scope) -> StoreResult<bool> {
        let Some(located) = locate(&self.conn, root)? else {
            return Ok(false);
        };
        if located.root != root {
            return Err(StoreError::InvalidData(format!(
                "entity {root} is not an aggregate root"
            )));
        }
        if located.scope == to {
            return Ok(false);
        }

        let tx = self.conn.transaction()?;
        let rows = entity_repo::move_aggregate(&tx, root, located.scope, to)?;
        tx.commit()?;
        self.scope_index.insert(root, to);
        info!(
            "event=aggregate_move module=store status=ok root={} from={} to={} rows={}",
            root, located.scope, to, rows
        );
        Ok(true)
    }

    /// Deletes a local replica and its outbox without queuing remote deletes.
    pub(crate) fn purge_aggregate(&mut self, root: EntityId) -> StoreResult<bool> {
        let tx = self.conn.transaction()?;
        let purged = purge(&tx, root)?;
        tx.commit()?;
        if purged {
            self.scope_index.remove(&root);
            info!(
                "event=aggregate_purge module=store status=ok root={}",
                root
            );
        }
        Ok(purged)
    }

    /// Rebuilds the root-to-scope index from physical store membership.
    pub fn rebuild_scope_index(&mut self) -> StoreResult<()> {
        let mut index = HashMap::new();
        for scope in Scope::ALL {
            for root in self.repo(scope).root_ids()? {
                index.insert(root, scope);
            }
        }
        self.scope_index = index;
        Ok(())
    }

    /// Pushes the outbox of `scope`, one aggregate per remote call.
    pub async fn export<R>(&mut self, remote: &R, scope: Scope) -> Result<ExportReport, SyncError>
    where
        R: RemoteDatabase + ?Sized,
    {
        let started_ms = now_epoch_ms();
        let result = self.export_batches(remote, scope).await;
        self.emit_sync_event(scope, SyncEventKind::Export, started_ms, result.as_ref().err());
        result
    }

    async fn export_batches<R>(&mut self, remote: &R, scope: Scope) -> Result<ExportReport, SyncError>
    where
        R: RemoteDatabase + ?Sized,
    {
        let mut by_root: BTreeMap<EntityId, Vec<PendingChange>> = BTreeMap::new();
        for entry in self.repo(scope).pending_changes()? {
            by_root.entry(entry.root).or_default().push(entry);
        }

        let mut report = ExportReport {
            scope,
            pushed: 0,
            rejected: 0,
        };
        for (root, entries) in by_root {
            let mut changes = Vec::with_capacity(entries.len());
            for entry in &entries {
                match entry.op {
                    PendingOp::Upsert => {
                        if let Some(entity) = self.repo(scope).get(entry.entity_id)? {
                            changes.push(RecordChange::Upsert(entity));
                        }
                    }
                    PendingOp::Delete => changes.push(RecordChange::Delete {
                        id: entry.entity_id,
                        root,
                    }),
                }
            }
            if changes.is_empty() {
                self.clear_entries(scope, &entries)?;
                continue;
            }

            match remote.push(scope, changes).await {
                Ok(()) => {
                    self.clear_entries(scope, &entries)?;
                    report.pushed += entries.len();
                }
                Err(err @ (RemoteError::PermissionDenied(_) | RemoteError::NotFound(_))) => {
                    warn!(
                        "event=store_export module=store status=rejected scope={} root={} entries={} error={}",
                        scope,
                        root,
                        entries.len(),
                        err
                    );
                    self.discard_rejected(scope, root)?;
                    report.rejected += entries.len();
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(report)
    }

    /// Drops a refused aggregate with its outbox and forgets both change
    /// tokens, so the following pulls restore the remote copy.
    fn discard_rejected(&mut self, scope: Scope, root: EntityId) -> StoreResult<()> {
        let tx = self.conn.transaction()?;
        let repo = EntityRepo::new(&tx, scope);
        repo.clear_pending_for_root(root)?;
        repo.delete(root)?;
        for token_scope in Scope::ALL {
            EntityRepo::new(&tx, token_scope).clear_state(CHANGE_TOKEN_KEY)?;
        }
        tx.commit()?;
        self.scope_index.remove(&root);
        info!(
            "event=aggregate_discard module=store status=ok scope={} root={}",
            scope, root
        );
        Ok(())
    }

    fn clear_entries(&self, scope: Scope, entries: &[PendingChange]) -> StoreResult<()> {
        let repo = self.repo(scope);
        for entry in entries {
            repo.clear_pending(entry.entity_id)?;
        }
        Ok(())
    }

    /// Pulls and applies remote changes for `scope`.
    pub async fn import<R>(&mut self, remote: &R, scope: Scope) -> Result<ImportReport, SyncError>
    where
        R: RemoteDatabase + ?Sized,
    {
        let started_ms = now_epoch_ms();
        let result = self.pull_and_apply(remote, scope).await;
        if result.is_ok() {
            if let Some(signals) = &self.signals {
                signals.store_changed(scope);
            }
        }
        self.emit_sync_event(scope, SyncEventKind::Import, started_ms, result.as_ref().err());
        result
    }

    async fn pull_and_apply<R>(&mut self, remote: &R, scope: Scope) -> Result<ImportReport, SyncError>
    where
        R: RemoteDatabase + ?Sized,
    {
        let since = self.change_token(scope)?;
        let batch = remote.pull(scope, since).await?;
        let me = remote.current_user().clone();
        self.apply_pull_batch(scope, &me, batch)
    }

    /// Applies one pulled batch in a single local transaction.
    ///
    /// Revocations apply before record changes; records whose owner has not
    /// arrived yet are retried after the rest of the batch.
    pub fn apply_pull_batch(
        &mut self,
        scope: Scope,
        me: &UserIdentity,
        batch: PullBatch,
    ) -> Result<ImportReport, SyncError> {
        for change in &batch.changes {
            if let RecordChange::Upsert(entity) = change {
                for stamped in entity.fields.values() {
                    self.clock.observe(&stamped.stamp);
                }
            }
        }

        let mut report = ImportReport::new(scope);
        let tx = self.conn.transaction()?;
        for revocation in &batch.revocations {
            apply_revocation(&tx, me, revocation, &mut report)?;
        }

        let mut deferred: Vec<&Entity> = Vec::new();
        for change in &batch.changes {
            match change {
                RecordChange::Upsert(entity) => {
                    if !apply_remote_upsert(&tx, scope, entity, &mut report)? {
                        deferred.push(entity);
                    }
                }
                RecordChange::Delete { id, .. } => apply_remote_delete(&tx, *id, &mut report)?,
            }
        }
        while !deferred.is_empty() {
            let before = deferred.len();
            let mut waiting = Vec::new();
            for entity in deferred {
                if !apply_remote_upsert(&tx, scope, entity, &mut report)? {
                    waiting.push(entity);
                }
            }
            deferred = waiting;
            if deferred.len() == before {
                break;
            }
        }
        if !deferred.is_empty() {
            warn!(
                "event=store_import module=store status=partial scope={} orphaned_records={}",
                scope,
                deferred.len()
            );
            report.skipped += deferred.len();
        }

        if let Some(token) = batch.token {
            EntityRepo::new(&tx, scope).set_state(CHANGE_TOKEN_KEY, &token.0.to_string())?;
        }
        tx.commit()?;
        self.rebuild_scope_index()?;

        info!(
            "event=store_import module=store status=ok scope={} upserted={} deleted={} purged={} demoted={} moved={} skipped={}",
            scope,
            report.upserted,
            report.deleted,
            report.purged,
            report.demoted,
            report.moved,
            report.skipped
        );
        Ok(report)
    }

    /// Exports then imports one scope.
    pub async fn sync_scope<R>(&mut self, remote: &R, scope: Scope) -> Result<ImportReport, SyncError>
    where
        R: RemoteDatabase + ?Sized,
    {
        self.export(remote, scope).await?;
        self.import(remote, scope).await
    }

    /// Syncs both scopes; a failing scope does not stop the other one.
    ///
    /// Returns the first failure after both scopes were attempted.
    pub async fn sync_all<R>(&mut self, remote: &R) -> Result<(), SyncError>
    where
        R: RemoteDatabase + ?Sized,
    {
        let mut first_error = None;
        for scope in Scope::ALL {
            if let Err(err) = self.sync_scope(remote, scope).await {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn emit_sync_event(
        &self,
        scope: Scope,
        kind: SyncEventKind,
        started_at_ms: i64,
        failure: Option<&SyncError>,
    ) {
        let outcome = match failure {
            Some(err) => {
                error!(
                    "event=sync_batch module=store status=error scope={} kind={} error={}",
                    scope,
                    kind.as_str(),
                    err
                );
                SyncOutcome::Failed(err.to_string())
            }
            None => SyncOutcome::Succeeded,
        };
        if let Some(signals) = &self.signals {
            signals.sync_completed(SyncEvent {
                scope,
                kind,
                outcome,
                started_at_ms,
                ended_at_ms: now_epoch_ms(),
            });
        }
    }
}

fn locate(conn: &Connection, id: EntityId) -> StoreResult<Option<Located>> {
    for scope in Scope::ALL {
        if let Some((root, kind)) = EntityRepo::new(conn, scope).locate(id)? {
            return Ok(Some(Located { scope, root, kind }));
        }
    }
    Ok(None)
}

fn apply_staged(
    conn: &Connection,
    changes: Vec<StagedChange>,
    stamp: FieldStamp,
    report: &mut SaveReport,
    new_roots: &mut Vec<EntityId>,
    removed_roots: &mut Vec<EntityId>,
) -> Result<(), SaveError> {
    for change in changes {
        match change {
            StagedChange::InsertRoot { id, kind, fields } => {
                let mut entity = Entity {
                    id,
                    kind,
                    parent: None,
                    root: id,
                    fields: BTreeMap::new(),
                };
                for (name, value) in fields {
                    entity.set(name, value, stamp);
                }
                entity.validate().map_err(SaveError::Validation)?;

                let repo = EntityRepo::new(conn, Scope::Private);
                repo.insert(&entity)?;
                repo.queue_change(id, id, PendingOp::Upsert, stamp.epoch_ms())?;
                new_roots.push(id);
                report.inserted += 1;
                report.fields_written += entity.fields.len();
            }
            StagedChange::InsertChild {
                id,
                parent,
                kind,
                fields,
            } => {
                let owner = locate(conn, parent)?.ok_or(SaveError::EntityNotFound(parent))?;
                if !kind.can_be_child_of(owner.kind) {
                    return Err(SaveError::Validation(format!(
                        "`{}` cannot be owned by `{}`",
                        kind.as_str(),
                        owner.kind.as_str()
                    )));
                }
                let mut entity = Entity {
                    id,
                    kind,
                    parent: Some(parent),
                    root: owner.root,
                    fields: BTreeMap::new(),
                };
                for (name, value) in fields {
                    entity.set(name, value, stamp);
                }
                entity.validate().map_err(SaveError::Validation)?;

                // The owner's store decides; an aggregate never spans stores.
                let repo = EntityRepo::new(conn, owner.scope);
                repo.insert(&entity)?;
                repo.queue_change(id, owner.root, PendingOp::Upsert, stamp.epoch_ms())?;
                report.inserted += 1;
                report.fields_written += entity.fields.len();
            }
            StagedChange::SetField { id, field, value } => {
                let located = locate(conn, id)?.ok_or(SaveError::EntityNotFound(id))?;
                if !is_valid_field_name(&field) {
                    return Err(SaveError::Validation(format!("invalid field name `{field}`")));
                }
                let repo = EntityRepo::new(conn, located.scope);
                repo.write_field(id, &field, &StampedValue::new(value, stamp))?;
                repo.queue_change(id, located.root, PendingOp::Upsert, stamp.epoch_ms())?;
                report.fields_written += 1;
            }
            StagedChange::Delete { id } => {
                let located = locate(conn, id)?.ok_or(SaveError::EntityNotFound(id))?;
                let repo = EntityRepo::new(conn, located.scope);
                let doomed = repo.subtree_ids(id)?;
                for entity_id in &doomed {
                    repo.clear_pending(*entity_id)?;
                }
                repo.delete(id)?;
                repo.queue_change(id, located.root, PendingOp::Delete, stamp.epoch_ms())?;
                report.deleted += doomed.len();
                if id == located.root {
                    removed_roots.push(id);
                }
            }
        }
    }
    Ok(())
}

fn purge(conn: &Connection, root: EntityId) -> StoreResult<bool> {
    let Some(located) = locate(conn, root)? else {
        return Ok(false);
    };
    let repo = EntityRepo::new(conn, located.scope);
    repo.clear_pending_for_root(located.root)?;
    repo.delete(located.root)
}

fn apply_revocation(
    conn: &Connection,
    me: &UserIdentity,
    revocation: &Revocation,
    report: &mut ImportReport,
) -> StoreResult<()> {
    let Some(located) = locate(conn, revocation.root)? else {
        return Ok(());
    };
    // A deleted aggregate is gone everywhere, including a replica an owner
    // already demoted to Private.
    if revocation.reason == RevocationReason::AggregateDeleted {
        if purge(conn, revocation.root)? {
            report.purged += 1;
        }
        return Ok(());
    }
    if located.scope != Scope::Shared {
        return Ok(());
    }

    if &revocation.owner == me {
        entity_repo::move_aggregate(conn, revocation.root, Scope::Shared, Scope::Private)?;
        report.demoted += 1;
    } else if purge(conn, revocation.root)? {
        report.purged += 1;
    }
    Ok(())
}

/// Returns `false` when the record's owner is not present yet.
fn apply_remote_upsert(
    conn: &Connection,
    scope: Scope,
    entity: &Entity,
    report: &mut ImportReport,
) -> StoreResult<bool> {
    for local_scope in Scope::ALL {
        let repo = EntityRepo::new(conn, local_scope);
        let tombstoned = repo.pending_op(entity.id)? == Some(PendingOp::Delete)
            || repo.pending_op(entity.root)? == Some(PendingOp::Delete);
        if tombstoned {
            report.skipped += 1;
            return Ok(true);
        }
    }

    if let Some(root) = locate(conn, entity.root)? {
        if root.scope != scope {
            entity_repo::move_aggregate(conn, entity.root, root.scope, scope)?;
            report.moved += 1;
        }
    }

    let repo = EntityRepo::new(conn, scope);
    match repo.get(entity.id)? {
        Some(local) => {
            let outcome = merge_entity(Some(&local), entity);
            for name in &outcome.changed_fields {
                if let Some(stamped) = outcome.merged.fields.get(name) {
                    repo.write_field(entity.id, name, stamped)?;
                }
            }
            if !outcome.changed_fields.is_empty() {
                report.upserted += 1;
            }
            Ok(true)
        }
        None => {
            if let Some(parent) = entity.parent {
                if !repo.contains(parent)? {
                    return Ok(false);
                }
            }
            if let Err(reason) = entity.validate() {
                warn!(
                    "event=store_import module=store status=skipped scope={} entity={} reason={}",
                    scope, entity.id, reason
                );
                report.skipped += 1;
                return Ok(true);
            }
            repo.insert(entity)?;
            report.upserted += 1;
            Ok(true)
        }
    }
}

fn apply_remote_delete(conn: &Connection, id: EntityId, report: &mut ImportReport) -> StoreResult<()> {
    let Some(located) = locate(conn, id)? else {
        return Ok(());
    };
    let repo = EntityRepo::new(conn, located.scope);
    for entity_id in repo.subtree_ids(id)? {
        repo.clear_pending(entity_id)?;
    }
    if repo.delete(id)? {
        report.deleted += 1;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{DualStoreManager, StoreDescription};
    use crate::db::StoreLocation;
    use crate::model::entity::EntityKind;
    use crate::model::scope::Scope;
    use crate::store::{SaveError, StoreLoadError};
    use uuid::Uuid;

    fn in_memory() -> DualStoreManager {
        DualStoreManager::load(
            StoreDescription {
                scope: Scope::Private,
                location: StoreLocation::InMemory,
            },
            StoreDescription {
                scope: Scope::Shared,
                location: StoreLocation::InMemory,
            },
            Uuid::new_v4(),
        )
        .expect("in-memory stores load")
    }

    #[test]
    fn swapped_descriptions_are_rejected() {
        let err = DualStoreManager::load(
            StoreDescription {
                scope: Scope::Shared,
                location: StoreLocation::InMemory,
            },
            StoreDescription {
                scope: Scope::Private,
                location: StoreLocation::InMemory,
            },
            Uuid::new_v4(),
        )
        .err()
        .expect("swapped scopes must fail");
        assert!(matches!(err, StoreLoadError::Misconfigured(_)));
    }

    #[test]
    fn failed_save_leaves_stores_unchanged() {
        let mut stores = in_memory();
        let mut tx = stores.begin();
        let list = tx.insert_root(EntityKind::PackingList, [("title", "Trip")]);
        tx.insert_child(Uuid::new_v4(), EntityKind::Item, [("name", "tent")]);

        let err = stores.save(tx).expect_err("missing parent must fail");
        assert!(matches!(err, SaveError::EntityNotFound(_)));
        assert!(stores.get(list).expect("read").is_none());
        assert!(stores
            .pending_changes(Scope::Private)
            .expect("outbox")
            .is_empty());
    }

    #[test]
    fn children_follow_their_root_into_its_store() {
        let mut stores = in_memory();
        let mut tx = stores.begin();
        let list = tx.insert_root(EntityKind::PackingList, [("title", "Trip")]);
        let category = tx.insert_child(list, EntityKind::Category, [("name", "Camp")]);
        let item = tx.insert_child(category, EntityKind::Item, [("name", "tent")]);
        stores.save(tx).expect("save aggregate");

        assert!(stores.move_aggregate(list, Scope::Shared).expect("move"));
        assert_eq!(stores.store_for(item).expect("route"), Some(Scope::Shared));
        assert_eq!(stores.aggregate(list).expect("aggregate").len(), 3);
        assert_eq!(stores.pending_changes(Scope::Shared).expect("outbox").len(), 3);
        assert!(stores
            .pending_changes(Scope::Private)
            .expect("outbox")
            .is_empty());

        let mut tx = stores.begin();
        tx.insert_child(item, EntityKind::RestockEntry, [("note", "buy stakes")]);
        stores.save(tx).expect("save child of shared aggregate");
        assert_eq!(stores.aggregate(list).expect("aggregate").len(), 4);
        assert!(stores.roots(Scope::Private).expect("roots").is_empty());
    }
}
