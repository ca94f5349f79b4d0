use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Preset not found: {name}")]
    PresetNotFound { name: String },

    #[error("Malformed preset '{name}': {reason}")]
    MalformedPreset { name: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StateError>;
