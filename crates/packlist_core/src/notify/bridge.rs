//! Callback registry and signal queue behind the change notification bridge.

use crate::model::entity::EntityId;
use crate::model::scope::Scope;
use crate::model::share::ShareRecordRef;
use log::{debug, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Direction of one completed sync batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncEventKind {
    /// Local outbox pushed to the remote scope.
    Export,
    /// Remote changes pulled into the local store.
    Import,
}

impl SyncEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::Import => "import",
        }
    }
}

/// Outcome carried by a sync-completed signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Succeeded,
    Failed(String),
}

/// One finished sync batch for one scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncEvent {
    pub scope: Scope,
    pub kind: SyncEventKind,
    pub outcome: SyncOutcome,
    pub started_at_ms: i64,
    pub ended_at_ms: i64,
}

impl SyncEvent {
    pub fn succeeded(&self) -> bool {
        self.outcome == SyncOutcome::Succeeded
    }
}

/// Signals queued onto the bridge by producers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeSignal {
    /// The remote database reports new data for `scope`; a fetch is due.
    RemoteNotification { scope: Scope },
    /// A physical store changed underneath readers. Carries no payload.
    StoreChanged { scope: Scope },
    /// A sync batch finished.
    SyncCompleted(SyncEvent),
    /// The local user joined a share; it appears after the next import.
    InvitationAccepted {
        root: EntityId,
        share: ShareRecordRef,
    },
}

/// Cloneable, thread-safe producer handle.
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: UnboundedSender<BridgeSignal>,
}

impl SignalSender {
    /// Enqueues one signal. Returns `false` once the bridge is gone.
    pub fn send(&self, signal: BridgeSignal) -> bool {
        match self.tx.send(signal) {
            Ok(()) => true,
            Err(err) => {
                warn!(
                    "event=bridge_send module=notify status=error error_code=bridge_closed signal={:?}",
                    err.0
                );
                false
            }
        }
    }

    pub fn remote_notification(&self, scope: Scope) -> bool {
        self.send(BridgeSignal::RemoteNotification { scope })
    }

    pub fn store_changed(&self, scope: Scope) -> bool {
        self.send(BridgeSignal::StoreChanged { scope })
    }

    pub fn sync_completed(&self, event: SyncEvent) -> bool {
        self.send(BridgeSignal::SyncCompleted(event))
    }

    pub fn invitation_accepted(&self, root: EntityId, share: ShareRecordRef) -> bool {
        self.send(BridgeSignal::InvitationAccepted { root, share })
    }
}

/// Handle returned by every subscription; pass to `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type RefetchHandler = Box<dyn FnMut() + Send>;
type SyncHandler = Box<dyn FnMut(&SyncEvent) + Send>;
type AcceptHandler = Box<dyn FnMut(EntityId) + Send>;

/// Typed replacement for a string-keyed global notification bus.
pub struct ChangeBridge {
    tx: UnboundedSender<BridgeSignal>,
    rx: UnboundedReceiver<BridgeSignal>,
    next_id: u64,
    remote_change: Vec<(SubscriptionId, RefetchHandler)>,
    sync_completed: Vec<(SubscriptionId, SyncHandler)>,
    invitation_accepted: Vec<(SubscriptionId, AcceptHandler)>,
}

impl Default for ChangeBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBridge {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx,
            next_id: 1,
            remote_change: Vec::new(),
            sync_completed: Vec::new(),
            invitation_accepted: Vec::new(),
        }
    }

    /// Producer handle for background tasks and the remote client.
    pub fn sender(&self) -> SignalSender {
        SignalSender {
            tx: self.tx.clone(),
        }
    }

    /// Registers a refetch callback for "store changed" signals.
    pub fn on_remote_change(&mut self, handler: impl FnMut() + Send + 'static) -> SubscriptionId {
        let id = self.allocate_id();
        self.remote_change.push((id, Box::new(handler)));
        id
    }

    /// Registers a callback for finished sync batches.
    pub fn on_sync_event_completed(
        &mut self,
        handler: impl FnMut(&SyncEvent) + Send + 'static,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.sync_completed.push((id, Box::new(handler)));
        id
    }

    /// Registers a callback for accepted invitations.
    pub fn on_invitation_accepted(
        &mut self,
        handler: impl FnMut(EntityId) + Send + 'static,
    ) -> SubscriptionId {
        let id = self.allocate_id();
        self.invitation_accepted.push((id, Box::new(handler)));
        id
    }

    /// Removes one subscription. Returns whether it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriber_count();
        self.remote_change.retain(|(entry, _)| *entry != id);
        self.sync_completed.retain(|(entry, _)| *entry != id);
        self.invitation_accepted.retain(|(entry, _)| *entry != id);
        self.subscriber_count() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.remote_change.len() + self.sync_completed.len() + self.invitation_accepted.len()
    }

    /// Pops one queued signal without waiting.
    pub fn try_next(&mut self) -> Option<BridgeSignal> {
        self.rx.try_recv().ok()
    }

    /// Waits for the next queued signal.
    pub async fn next(&mut self) -> Option<BridgeSignal> {
        self.rx.recv().await
    }

    /// Invokes the handlers subscribed to `signal`.
    ///
    /// `RemoteNotification` has no subscribers: the owner of the store reacts
    /// to it by importing, which in turn produces `StoreChanged`.
    pub fn dispatch(&mut self, signal: &BridgeSignal) -> usize {
        match signal {
            BridgeSignal::RemoteNotification { .. } => 0,
            BridgeSignal::StoreChanged { scope } => {
                debug!(
                    "event=bridge_dispatch module=notify status=ok signal=store_changed scope={} handlers={}",
                    scope,
                    self.remote_change.len()
                );
                for (_, handler) in self.remote_change.iter_mut() {
                    handler();
                }
                self.remote_change.len()
            }
            BridgeSignal::SyncCompleted(event) => {
                debug!(
                    "event=bridge_dispatch module=notify status=ok signal=sync_completed scope={} kind={} handlers={}",
                    event.scope,
                    event.kind.as_str(),
                    self.sync_completed.len()
                );
                for (_, handler) in self.sync_completed.iter_mut() {
                    handler(event);
                }
                self.sync_completed.len()
            }
            BridgeSignal::InvitationAccepted { root, .. } => {
                for (_, handler) in self.invitation_accepted.iter_mut() {
                    handler(*root);
                }
                self.invitation_accepted.len()
            }
        }
    }

    /// Drains and dispatches every queued signal, returning the remote
    /// notifications that still need an import.
    pub fn dispatch_pending(&mut self) -> Vec<Scope> {
        let mut fetch_due = Vec::new();
        while let Some(signal) = self.try_next() {
            if let BridgeSignal::RemoteNotification { scope } = signal {
                if !fetch_due.contains(&scope) {
                    fetch_due.push(scope);
                }
                continue;
            }
            self.dispatch(&signal);
        }
        fetch_due
    }

    fn allocate_id(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }
}
