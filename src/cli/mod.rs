use clap::Parser;
use crate::sync::{ RefreshOrdering, SyncConfig };
use std::time::Duration;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Remote API Args ---
    /// Base URL of the events API (the `/events/{id}/messages/` routes live under it)
    #[arg(long, env = "CHAT_API_BASE_URL", default_value = "http://127.0.0.1:8000/api")]
    pub base_url: String,

    /// Identifier of the event whose group chat to follow
    #[arg(long, env = "CHAT_EVENT_ID")]
    pub event_id: String,

    // --- Identity Args ---
    /// JSON credentials file with `access` and `user` keys, re-read on every request
    #[arg(long, env = "CHAT_CREDENTIALS_PATH")]
    pub credentials: Option<String>,

    /// Bearer token, used when no credentials file is given
    #[arg(long, env = "CHAT_ACCESS_TOKEN")]
    pub access_token: Option<String>,

    /// Display name of the signed-in user; sending is disabled without it
    #[arg(long, env = "CHAT_USERNAME")]
    pub username: Option<String>,

    // --- Sync Args ---
    /// Milliseconds between refreshes.
    #[arg(long, env = "CHAT_POLL_INTERVAL_MS", default_value = "3000", value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: u64,

    /// Milliseconds a send error stays on screen.
    #[arg(long, env = "CHAT_ERROR_CLEAR_MS", default_value = "3000")]
    pub error_clear_ms: u64,

    /// Drop refresh results that complete after a newer refresh was applied
    #[arg(long, env = "CHAT_STRICT_ORDERING", default_value = "false")]
    pub strict_ordering: bool,

    /// Enable debug logging/output
    #[arg(long, env = "DEBUG", default_value = "false")]
    pub debug: bool,
}

impl Args {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            error_clear_after: Duration::from_millis(self.error_clear_ms),
            ordering: if self.strict_ordering {
                RefreshOrdering::IssuanceOrder
            } else {
                RefreshOrdering::CompletionOrder
            },
        }
    }
}
