use crate::store::StoreError;

/// Failures surfaced by the session components
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    #[error("no user identity; sign in before using sessions")]
    AuthRequired,

    #[error("session {0} is full")]
    SessionFull(String),

    #[error("session {0} has already started")]
    AlreadyStarted(String),

    #[error("session {0} does not exist")]
    SessionNotFound(String),

    #[error("no joinable game available")]
    NoGameAvailable,

    #[error("write failed: {0}")]
    WriteFailed(String),

    #[error("read failed: {0}")]
    ReadFailed(String),

    #[error("subscription on '{0}' was cancelled")]
    SubscriptionCancelled(String),

    #[error("malformed record: {0}")]
    ParseFailed(String),

    #[error("could not count active players for the rematch vote")]
    VoteCountUnavailable,

    #[error("session creation could not be verified: {0}")]
    CreationUnverified(String),
}

impl SessionError {
    /// Whether a random-discovery join should move on to the next candidate
    /// instead of giving up.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SessionError::AuthRequired)
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::WriteFailed { .. } => SessionError::WriteFailed(err.to_string()),
            StoreError::ReadFailed { .. } | StoreError::Unsupported(_) => {
                SessionError::ReadFailed(err.to_string())
            }
            StoreError::SubscriptionCancelled(path) => SessionError::SubscriptionCancelled(path),
            StoreError::ParseFailed { .. } => SessionError::ParseFailed(err.to_string()),
        }
    }
}
