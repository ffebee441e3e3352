mod http;

pub use http::HttpMessageStore;

use async_trait::async_trait;
use crate::models::Message;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("server returned {status}")]
    Status {
        status: u16,
        /// Display message pulled from the error body, when it had one.
        message: Option<String>,
    },
    #[error("invalid response body: {0}")]
    Decode(String),
    #[error("invalid endpoint: {0}")]
    Endpoint(String),
}

impl StoreError {
    pub fn server_message(&self) -> Option<&str> {
        match self {
            StoreError::Status { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

/// Remote owner of a conversation's message log.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn list_messages(
        &self,
        conversation_id: &str,
        token: Option<&str>
    ) -> Result<Vec<Message>, StoreError>;

    async fn create_message(
        &self,
        conversation_id: &str,
        token: &str,
        content: &str
    ) -> Result<Message, StoreError>;
}
