//! Sync and sharing core for packing lists.
//! Owns the private/shared stores, their remote mirroring and record sharing.

pub mod clock;
pub mod config;
pub mod controller;
pub mod db;
pub mod logging;
pub mod merge;
pub mod model;
pub mod notify;
pub mod remote;
pub mod share;
pub mod store;

pub use config::{ConfigError, CoreConfig, LogSettings};
pub use controller::PersistenceController;
pub use logging::{default_log_level, init_from_settings, init_logging, logging_status, LoggingError};
pub use model::entity::{DeviceId, Entity, EntityId, EntityKind, FieldStamp, FieldValue};
pub use model::scope::Scope;
pub use model::share::{
    AcceptanceStatus, InvitationMetadata, Participant, Permission, ShareGrant, ShareRecordRef,
    UserIdentity,
};
pub use notify::{ChangeBridge, SyncEvent, SyncEventKind, SyncOutcome};
pub use remote::{InMemoryRemote, RemoteDatabase, RemoteError, RemoteServer};
pub use share::{AcceptError, InvitePolicy, ShareError};
pub use store::{DualStoreManager, SaveError, StoreLoadError, SyncError, Transaction};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
