use async_trait::async_trait;
use sapphire_tools::ToolDefinition;
use tokio::sync::mpsc;

/// Request to an LLM provider. Messages are wire-format JSON objects so the
/// tool loop can carry structured tool-call and tool-result turns.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<serde_json::Value>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
}

/// Events emitted while streaming a completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental text content from the model.
    TextDelta { text: String },

    /// A complete tool call. Providers accumulate streamed argument
    /// fragments and emit the call once its arguments are whole.
    ToolCall {
        id: String,
        name: String,
        arguments: String,
    },

    /// Stream completed.
    Done {
        stop_reason: String,
        /// Backend-flagged preview responses: streamed but never persisted.
        ephemeral: bool,
    },

    /// Error during streaming.
    Error { message: String },
}

/// Common interface for LLM backends.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Stream response events through a channel.
    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("operation cancelled")]
    Cancelled,
}
