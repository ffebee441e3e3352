use super::{ AuthProvider, AuthSession };
use crate::models::User;
use log::warn;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Deserialize)]
struct StoredCredentials {
    #[serde(default)]
    access: Option<String>,
    #[serde(default)]
    user: Option<User>,
}

/// Reads `{"access": "<jwt>", "user": {...}}` from disk on every call, so a
/// login flow that rewrites the file takes effect on the next request.
#[derive(Clone, Debug)]
pub struct FileAuthProvider {
    path: PathBuf,
}

impl FileAuthProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Option<StoredCredentials> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cannot read credentials from {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_str::<StoredCredentials>(&raw) {
            Ok(creds) => Some(creds),
            Err(e) => {
                warn!("Ignoring malformed credentials file {}: {}", self.path.display(), e);
                None
            }
        }
    }
}

impl AuthProvider for FileAuthProvider {
    fn current(&self) -> Option<AuthSession> {
        let creds = self.load()?;
        let token = creds.access.filter(|t| !t.is_empty());
        if token.is_none() && creds.user.is_none() {
            return None;
        }
        Some(AuthSession { token, user: creds.user })
    }
}
