//! Invitation acceptance.
//!
//! Acceptance touches no local state; the shared aggregate arrives with the
//! next shared-scope import.

use crate::model::share::{InvitationMetadata, UserIdentity};
use crate::notify::SignalSender;
use crate::remote::{RemoteDatabase, RemoteError};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

#[derive(Debug)]
pub enum AcceptError {
    /// Invitation payload could not be decoded.
    InvalidInvitation(String),
    AlreadyParticipant,
    /// Share was deleted or the invitation withdrawn.
    GrantRevoked,
    /// Invitation names someone else.
    NotInvited,
    Remote(RemoteError),
}

impl Display for AcceptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInvitation(message) => write!(f, "invalid invitation: {message}"),
            Self::AlreadyParticipant => write!(f, "you already participate in this list"),
            Self::GrantRevoked => write!(f, "this invitation is no longer valid"),
            Self::NotInvited => write!(f, "this invitation was sent to someone else"),
            Self::Remote(err) => write!(f, "{err}"),
        }
    }
}

impl Error for AcceptError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Remote(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RemoteError> for AcceptError {
    fn from(value: RemoteError) -> Self {
        match value {
            RemoteError::AlreadyParticipant => Self::AlreadyParticipant,
            RemoteError::ShareRevoked | RemoteError::NotFound(_) => Self::GrantRevoked,
            RemoteError::NotInvited => Self::NotInvited,
            other => Self::Remote(other),
        }
    }
}

pub struct AcceptanceHandler<R: ?Sized> {
    remote: Arc<R>,
    signals: SignalSender,
}

impl<R: RemoteDatabase + ?Sized> AcceptanceHandler<R> {
    pub fn new(remote: Arc<R>, signals: SignalSender) -> Self {
        Self { remote, signals }
    }

    /// Registers the current user as participant of the invited grant and
    /// emits an invitation-accepted signal.
    pub async fn accept_invitation(&self, invitation: &InvitationMetadata) -> Result<(), AcceptError> {
        let me: &UserIdentity = self.remote.current_user();
        if &invitation.invitee != me {
            warn!(
                "event=invitation_accept module=share status=error share={} error_code=not_invited",
                invitation.share
            );
            return Err(AcceptError::NotInvited);
        }

        match self.remote.accept_share(invitation).await {
            Ok(grant) => {
                info!(
                    "event=invitation_accept module=share status=ok share={} root={}",
                    grant.reference, grant.root
                );
                self.signals
                    .invitation_accepted(grant.root, grant.reference.clone());
                Ok(())
            }
            Err(err) => {
                let err = AcceptError::from(err);
                warn!(
                    "event=invitation_accept module=share status=error share={} error={}",
                    invitation.share, err
                );
                Err(err)
            }
        }
    }

    /// Decodes a JSON invitation payload from a deep link and accepts it.
    pub async fn accept_invitation_json(&self, payload: &str) -> Result<(), AcceptError> {
        let invitation = InvitationMetadata::from_json(payload)
            .map_err(|err| AcceptError::InvalidInvitation(err.to_string()))?;
        self.accept_invitation(&invitation).await
    }
}
