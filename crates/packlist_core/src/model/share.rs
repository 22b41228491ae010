//! Share grant model.
//!
//! # Responsibility
//! - Describe one sharing relationship for one aggregate root.
//! - Describe the invitation payload delivered out-of-band to invitees.
//!
//! # Invariants
//! - `owner` is fixed for the lifetime of a grant; it never appears in
//!   `participants`.
//! - An identity appears at most once in `participants`.

use crate::model::entity::EntityId;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

static IDENTITY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}$").expect("identity pattern is valid")
});

/// Remote account identity of one user (normalized lowercase email form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserIdentity(String);

impl UserIdentity {
    /// Parses and normalizes one identity.
    pub fn parse(value: &str) -> Result<Self, IdentityError> {
        let normalized = value.trim().to_ascii_lowercase();
        if normalized.is_empty() {
            return Err(IdentityError::Empty);
        }
        if !IDENTITY_PATTERN.is_match(&normalized) {
            return Err(IdentityError::Malformed(normalized));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for UserIdentity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for UserIdentity {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<UserIdentity> for String {
    fn from(value: UserIdentity) -> Self {
        value.0
    }
}

/// Identity parse errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    Empty,
    Malformed(String),
}

impl Display for IdentityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "user identity must not be empty"),
            Self::Malformed(value) => write!(f, "user identity is malformed: {value}"),
        }
    }
}

impl Error for IdentityError {}

/// Access level granted to one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ReadOnly,
    ReadWrite,
}

/// Invitation state of one participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcceptanceStatus {
    Pending,
    Accepted,
    Removed,
}

/// Non-owner identity with access to a shared aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub identity: UserIdentity,
    pub permission: Permission,
    pub status: AcceptanceStatus,
}

impl Participant {
    pub fn is_active(&self) -> bool {
        self.status != AcceptanceStatus::Removed
    }
}

/// Stable remote reference used to locate a grant later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShareRecordRef(pub String);

impl ShareRecordRef {
    /// Reference the remote database assigns to the grant of `root`.
    pub fn for_root(root: EntityId) -> Self {
        Self(format!("share-{root}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ShareRecordRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sharing relationship for one aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareGrant {
    pub reference: ShareRecordRef,
    pub root: EntityId,
    pub owner: UserIdentity,
    pub title: String,
    pub participants: Vec<Participant>,
}

impl ShareGrant {
    /// Grant for a freshly shared aggregate: caller is owner, nobody invited.
    pub fn new(root: EntityId, owner: UserIdentity, title: impl Into<String>) -> Self {
        Self {
            reference: ShareRecordRef::for_root(root),
            root,
            owner,
            title: title.into(),
            participants: Vec::new(),
        }
    }

    pub fn is_owner(&self, identity: &UserIdentity) -> bool {
        &self.owner == identity
    }

    pub fn participant(&self, identity: &UserIdentity) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| &participant.identity == identity)
    }

    pub(crate) fn participant_mut(&mut self, identity: &UserIdentity) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|participant| &participant.identity == identity)
    }

    /// Participants that have not been removed.
    pub fn active_participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_active())
    }

    /// Effective access for `identity`. Pending invitees have none yet.
    pub fn permission_for(&self, identity: &UserIdentity) -> Option<Permission> {
        if self.is_owner(identity) {
            return Some(Permission::ReadWrite);
        }
        self.participant(identity)
            .filter(|p| p.status == AcceptanceStatus::Accepted)
            .map(|p| p.permission)
    }

    /// Builds the out-of-band invitation for a listed, non-removed invitee.
    pub fn invitation_for(&self, identity: &UserIdentity) -> Option<InvitationMetadata> {
        let participant = self.participant(identity).filter(|p| p.is_active())?;
        Some(InvitationMetadata {
            share: self.reference.clone(),
            root: self.root,
            owner: self.owner.clone(),
            title: self.title.clone(),
            invitee: participant.identity.clone(),
            permission: participant.permission,
        })
    }
}

/// Payload of an invitation link opened on the invitee's device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvitationMetadata {
    pub share: ShareRecordRef,
    pub root: EntityId,
    pub owner: UserIdentity,
    pub title: String,
    pub invitee: UserIdentity,
    pub permission: Permission,
}

impl InvitationMetadata {
    /// Decodes a JSON invitation payload.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Encodes the invitation as JSON for link delivery.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
