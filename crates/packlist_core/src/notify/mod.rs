//! Change notification bridge.
//!
//! # Responsibility
//! - Own the typed event channel between remote/sync producers and read-side
//!   consumers.
//! - Invoke subscriber callbacks on the store's confined context only.
//!
//! # Invariants
//! - Producers never call handlers directly; they enqueue signals.
//! - A store-changed signal always fans out to refetch handlers, even when the
//!   underlying import carried no record changes.
//! - The bridge reports sync failures; it never retries them.

mod bridge;

pub use bridge::{
    BridgeSignal, ChangeBridge, SignalSender, SubscriptionId, SyncEvent, SyncEventKind,
    SyncOutcome,
};
