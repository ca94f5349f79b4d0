use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Toolset not found: {name}")]
    ToolsetNotFound { name: String },

    #[error("Toolset '{name}' is protected and cannot be modified")]
    ProtectedToolset { name: String },

    #[error("Unknown function in toolset: {name}")]
    UnknownFunction { name: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ToolError>;
