use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the chat that always exists and cannot be deleted.
pub const DEFAULT_CHAT: &str = "default";

/// Sanitized, case-insensitive chat identifier.
///
/// Raw names are lowercased, spaces become underscores, and anything outside
/// `[a-z0-9_]` is dropped. Two raw names that sanitize to the same string
/// refer to the same chat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatName(String);

impl ChatName {
    /// Sanitize a raw name. Returns `None` if nothing survives sanitization.
    pub fn sanitize(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
            .collect();
        if cleaned.is_empty() {
            None
        } else {
            Some(Self(cleaned))
        }
    }

    pub fn default_chat() -> Self {
        Self(DEFAULT_CHAT.to_string())
    }

    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_CHAT
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message role within a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
            Role::System => write!(f, "system"),
        }
    }
}

/// A tool call recorded on an assistant message. Arguments stay as the raw
/// JSON string the model produced; parsing happens at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One message in a chat. The string timestamp is the message's identity key
/// and is strictly monotonic within a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Binds a tool result back to the triggering assistant tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Original arguments the tool ran with, echoed for the display view.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_inputs: Option<serde_json::Value>,
}

impl Message {
    pub fn user(content: impl Into<String>, timestamp: String) -> Self {
        Self::plain(Role::User, content, timestamp)
    }

    pub fn assistant(content: impl Into<String>, timestamp: String) -> Self {
        Self::plain(Role::Assistant, content, timestamp)
    }

    fn plain(role: Role, content: impl Into<String>, timestamp: String) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp,
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
            tool_inputs: None,
        }
    }
}

/// How the active system prompt is composed. Tools may restrict themselves to
/// one mode via their descriptor's mode filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    #[default]
    Monolith,
    Assembled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_strips() {
        assert_eq!(ChatName::sanitize("My Chat!").unwrap().as_str(), "my_chat");
        assert_eq!(ChatName::sanitize("Diary-2024").unwrap().as_str(), "diary_2024");
        assert_eq!(ChatName::sanitize("  default ").unwrap().as_str(), "default");
    }

    #[test]
    fn sanitize_rejects_empty_results() {
        assert!(ChatName::sanitize("").is_none());
        assert!(ChatName::sanitize("!!!").is_none());
    }

    #[test]
    fn message_roundtrips_without_optional_fields() {
        let msg = Message::user("hello", "2026-01-01T00:00:00.000001Z".into());
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("tool_calls").is_none());
        assert!(json.get("tool_call_id").is_none());
        let back: Message = serde_json::from_value(json).unwrap();
        assert_eq!(back.content, "hello");
        assert!(back.tool_calls.is_empty());
    }
}
