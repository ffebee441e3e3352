use thiserror::Error;

/// Conditions surfaced to the view. `Display` is the banner text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("Failed to fetch messages ({0})")]
    FetchFailed(String),
    #[error("You must be signed in to send messages")]
    Unauthenticated,
    #[error("{0}")]
    SendFailed(String),
    #[error("No conversation is being synced")]
    NotStarted,
}

pub(crate) const GENERIC_SEND_FAILURE: &str = "Failed to send message";
