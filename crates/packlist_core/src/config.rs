//! Core configuration.
//!
//! # Responsibility
//! - Describe where both physical stores live and who the local user is.
//! - Load that description from JSON and reject unusable values early.
//!
//! # Invariants
//! - The private and shared store file names are distinct plain file names.
//! - Without a `store_dir` both stores run in memory.

use crate::db::StoreLocation;
use crate::model::entity::DeviceId;
use crate::model::share::UserIdentity;
use crate::share::InvitePolicy;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const DEFAULT_PRIVATE_STORE_FILE: &str = "private.sqlite3";
const DEFAULT_SHARED_STORE_FILE: &str = "shared.sqlite3";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read config `{}`: {source}", path.display())
            }
            Self::Parse(err) => write!(f, "invalid config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Optional logging section; applied by the host through `init_from_settings`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String,
    pub dir: PathBuf,
}

fn default_level() -> String {
    crate::logging::default_log_level().to_string()
}

fn default_private_store_file() -> String {
    DEFAULT_PRIVATE_STORE_FILE.to_string()
}

fn default_shared_store_file() -> String {
    DEFAULT_SHARED_STORE_FILE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Directory holding both store files; `None` keeps them in memory.
    #[serde(default)]
    pub store_dir: Option<PathBuf>,
    #[serde(default = "default_private_store_file")]
    pub private_store_file: String,
    #[serde(default = "default_shared_store_file")]
    pub shared_store_file: String,
    /// Remote identity of the signed-in user; must match the remote client.
    pub identity: UserIdentity,
    /// Field-stamp tie-breaker. Hosts should persist it; a missing value is
    /// generated per load.
    #[serde(default = "Uuid::new_v4")]
    pub device_id: DeviceId,
    #[serde(default)]
    pub invite_policy: InvitePolicy,
    #[serde(default)]
    pub log: Option<LogSettings>,
}

impl CoreConfig {
    /// Both stores in memory; used by tests and demos.
    pub fn in_memory(identity: UserIdentity) -> Self {
        Self {
            store_dir: None,
            private_store_file: default_private_store_file(),
            shared_store_file: default_shared_store_file(),
            identity,
            device_id: Uuid::new_v4(),
            invite_policy: InvitePolicy::default(),
            log: None,
        }
    }

    pub fn on_disk(store_dir: impl Into<PathBuf>, identity: UserIdentity) -> Self {
        Self {
            store_dir: Some(store_dir.into()),
            ..Self::in_memory(identity)
        }
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, name) in [
            ("private_store_file", &self.private_store_file),
            ("shared_store_file", &self.shared_store_file),
        ] {
            let trimmed = name.trim();
            if trimmed.is_empty() {
                return Err(ConfigError::Invalid(format!("{key} cannot be empty")));
            }
            if trimmed.contains(['/', '\\']) {
                return Err(ConfigError::Invalid(format!(
                    "{key} must be a file name, got `{trimmed}`"
                )));
            }
        }
        if self.private_store_file.trim() == self.shared_store_file.trim() {
            return Err(ConfigError::Invalid(
                "private and shared stores need distinct files".to_string(),
            ));
        }
        Ok(())
    }

    /// Physical locations of the private and shared store.
    pub fn store_locations(&self) -> (StoreLocation, StoreLocation) {
        match &self.store_dir {
            Some(dir) => (
                StoreLocation::File(dir.join(self.private_store_file.trim())),
                StoreLocation::File(dir.join(self.shared_store_file.trim())),
            ),
            None => (StoreLocation::InMemory, StoreLocation::InMemory),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, CoreConfig};
    use crate::db::StoreLocation;
    use crate::share::InvitePolicy;
    use std::path::PathBuf;

    #[test]
    fn json_defaults_fill_optional_fields() {
        let config = CoreConfig::from_json_str(
            r#"{"store_dir": "/var/lib/packlist", "identity": "Ada@Example.com"}"#,
        )
        .expect("minimal config parses");

        assert_eq!(config.identity.as_str(), "ada@example.com");
        assert_eq!(config.invite_policy, InvitePolicy::OwnerOnly);
        assert_eq!(
            config.store_locations(),
            (
                StoreLocation::File(PathBuf::from("/var/lib/packlist/private.sqlite3")),
                StoreLocation::File(PathBuf::from("/var/lib/packlist/shared.sqlite3")),
            )
        );
    }

    #[test]
    fn invite_policy_and_device_are_read_from_json() {
        let config = CoreConfig::from_json_str(
            r#"{
                "identity": "bo@example.com",
                "device_id": "00000000-0000-0000-0000-000000000007",
                "invite_policy": "read_write_participants"
            }"#,
        )
        .expect("config parses");
        assert_eq!(config.invite_policy, InvitePolicy::ReadWriteParticipants);
        assert_eq!(config.device_id.as_u128(), 7);
        assert_eq!(
            config.store_locations(),
            (StoreLocation::InMemory, StoreLocation::InMemory)
        );
    }

    #[test]
    fn invalid_identity_and_clashing_files_are_rejected() {
        let err = CoreConfig::from_json_str(r#"{"identity": "not-an-email"}"#)
            .expect_err("identity must be validated");
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = CoreConfig::from_json_str(
            r#"{"identity": "bo@example.com", "private_store_file": "a.db", "shared_store_file": "a.db"}"#,
        )
        .expect_err("same file for both stores must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
