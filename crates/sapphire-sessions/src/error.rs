use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Chat not found: {name}")]
    NotFound { name: String },

    #[error("Chat already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Invalid chat name: {raw}")]
    InvalidName { raw: String },

    #[error("The default chat cannot be deleted")]
    ReservedChat,

    #[error("Message not found for timestamp {timestamp}")]
    MessageNotFound { timestamp: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
