use std::fmt;
use std::sync::RwLock;

use tracing::info;
use uuid::Uuid;

use crate::error::SessionError;

/// Stable user identifier handed out by the identity provider
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        UserId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub trait IdentityProvider: Send + Sync {
    fn current_user(&self) -> Option<UserId>;
}

/// Anonymous sign-in: a random id per sign-in, kept until sign-out
#[derive(Debug, Default)]
pub struct AnonymousIdentity {
    user: RwLock<Option<UserId>>,
}

impl AnonymousIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signs in if needed and returns the current id
    pub fn sign_in_anonymously(&self) -> UserId {
        let mut user = self.user.write().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = user.as_ref() {
            return existing.clone();
        }
        let id = UserId(Uuid::new_v4().to_string());
        info!("Signed in anonymously as {}", id);
        *user = Some(id.clone());
        id
    }

    pub fn sign_out(&self) {
        *self.user.write().unwrap_or_else(|p| p.into_inner()) = None;
    }
}

impl IdentityProvider for AnonymousIdentity {
    fn current_user(&self) -> Option<UserId> {
        self.user.read().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

pub fn require_user(identity: &dyn IdentityProvider) -> Result<UserId, SessionError> {
    identity.current_user().ok_or(SessionError::AuthRequired)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_in_is_stable_until_sign_out() {
        let identity = AnonymousIdentity::new();
        assert_eq!(require_user(&identity), Err(SessionError::AuthRequired));

        let first = identity.sign_in_anonymously();
        assert_eq!(identity.sign_in_anonymously(), first);
        assert_eq!(require_user(&identity).unwrap(), first);

        identity.sign_out();
        assert!(identity.current_user().is_none());
        assert_ne!(identity.sign_in_anonymously(), first);
    }
}
