pub mod message;

pub use message::{
    extract_error_message,
    CreateMessageRequest,
    Message,
    MessageId,
    MessageListResponse,
    User,
};
