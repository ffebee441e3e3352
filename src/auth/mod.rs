mod file;

pub use file::FileAuthProvider;

use crate::models::User;

/// Credentials as seen at one instant. A token without a user is enough for
/// reads; sending needs both.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuthSession {
    pub token: Option<String>,
    pub user: Option<User>,
}

impl AuthSession {
    pub fn bearer(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    pub fn can_send(&self) -> bool {
        self.user.is_some() && self.bearer().is_some()
    }
}

/// Source of the current identity. Consulted on every request so a token
/// refreshed elsewhere is picked up without restarting the sync.
pub trait AuthProvider: Send + Sync {
    fn current(&self) -> Option<AuthSession>;
}

#[derive(Clone, Debug, Default)]
pub struct StaticAuthProvider {
    session: Option<AuthSession>,
}

impl StaticAuthProvider {
    pub fn new(token: Option<String>, username: Option<String>) -> Self {
        let token = token.filter(|t| !t.trim().is_empty());
        let user = username
            .filter(|u| !u.trim().is_empty())
            .map(|username| User { id: None, username });

        if token.is_none() && user.is_none() {
            return Self::anonymous();
        }
        Self { session: Some(AuthSession { token, user }) }
    }

    pub fn anonymous() -> Self {
        Self { session: None }
    }
}

impl AuthProvider for StaticAuthProvider {
    fn current(&self) -> Option<AuthSession> {
        self.session.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_collapse_to_anonymous() {
        let provider = StaticAuthProvider::new(Some("  ".into()), Some("".into()));
        assert_eq!(provider.current(), None);
    }

    #[test]
    fn token_only_session_reads_but_cannot_send() {
        let provider = StaticAuthProvider::new(Some("abc".into()), None);
        let session = provider.current().unwrap();
        assert_eq!(session.bearer(), Some("abc"));
        assert!(!session.can_send());
    }

    #[test]
    fn user_and_token_can_send() {
        let provider = StaticAuthProvider::new(Some("abc".into()), Some("maria".into()));
        let session = provider.current().unwrap();
        assert!(session.can_send());
        assert_eq!(session.user.unwrap().username, "maria");
    }
}
