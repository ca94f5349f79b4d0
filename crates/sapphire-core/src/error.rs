use thiserror::Error;

/// Top-level error surfaced at the API boundary.
///
/// Component crates keep their own error enums; the gateway converts them to
/// this type to pick a status code and a `{error: ...}` body.
#[derive(Debug, Error)]
pub enum SapphireError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    Input(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("External service error: {0}")]
    External(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Fatal: {0}")]
    Fatal(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SapphireError {
    /// HTTP status code equivalent for this error class.
    pub fn status(&self) -> u16 {
        match self {
            SapphireError::Input(_) | SapphireError::Validation(_) => 400,
            SapphireError::NotFound(_) => 404,
            SapphireError::Conflict(_) => 409,
            SapphireError::External(_) => 502,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, SapphireError>;
