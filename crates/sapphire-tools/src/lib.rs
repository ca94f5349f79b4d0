//! Tool system for AI tool calling.
//!
//! Tools are registered at init time (no runtime module discovery); the
//! registry exposes named toolsets ("abilities"), classifies tools as
//! network or local, and filters by the active prompt mode.

pub mod args;
pub mod builtin;
mod error;
pub mod privacy;
pub mod registry;

pub use args::ToolArgs;
pub use error::{Result, ToolError};
pub use privacy::PrivacyGate;
pub use registry::{ToolRegistry, RESERVED_TOOLSETS};

use async_trait::async_trait;
use sapphire_core::types::PromptMode;
use serde::{Deserialize, Serialize};

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

pub const ALL_MODES: &[PromptMode] = &[PromptMode::Monolith, PromptMode::Assembled];

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name (e.g. "time_date").
    fn name(&self) -> &str;
    /// Human-readable description shown to the LLM.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Whether the tool makes outbound network calls (gated by privacy mode).
    fn network(&self) -> bool {
        false
    }
    /// Prompt modes this tool is available under.
    fn modes(&self) -> &[PromptMode] {
        ALL_MODES
    }
    /// Execute with the parsed argument bag.
    async fn execute(&self, args: ToolArgs) -> ToolResult;
}

/// API-level descriptor for a tool, as sent to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

pub fn to_definitions(tools: &[std::sync::Arc<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            parameters: t.input_schema(),
        })
        .collect()
}
