use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::{Tool, ToolArgs, ToolResult};

/// Simple named notes on local disk. Local tool — never leaves the machine.
pub struct Notepad {
    dir: PathBuf,
}

impl Notepad {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn note_path(&self, name: &str) -> Option<PathBuf> {
        // Note names are flattened to a safe charset; path traversal is not a thing.
        let safe: String = name
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' { '_' } else { c })
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        if safe.is_empty() {
            None
        } else {
            Some(self.dir.join(format!("{safe}.txt")))
        }
    }
}

#[async_trait]
impl Tool for Notepad {
    fn name(&self) -> &str {
        "notepad"
    }

    fn description(&self) -> &str {
        "Read, write, append, or list persistent notes. Actions: read, write, append, list."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["read", "write", "append", "list"],
                    "description": "What to do"
                },
                "name": {"type": "string", "description": "Note name (required except for list)"},
                "content": {"type": "string", "description": "Text for write/append"}
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, args: ToolArgs) -> ToolResult {
        let action = args.arg_string_or("action", "");
        debug!(action, "notepad");

        if action == "list" {
            let mut names = Vec::new();
            if let Ok(entries) = std::fs::read_dir(&self.dir) {
                for entry in entries.flatten() {
                    if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                        names.push(stem.to_string());
                    }
                }
            }
            names.sort();
            return if names.is_empty() {
                ToolResult::success("No notes yet.")
            } else {
                ToolResult::success(format!("Notes: {}", names.join(", ")))
            };
        }

        let Some(name) = args.arg_str("name") else {
            return ToolResult::error("Error: name is required");
        };
        let Some(path) = self.note_path(name) else {
            return ToolResult::error(format!("Invalid note name: {name}"));
        };

        match action.as_str() {
            "read" => match std::fs::read_to_string(&path) {
                Ok(content) => ToolResult::success(content),
                Err(_) => ToolResult::error(format!("Note '{name}' not found")),
            },
            "write" | "append" => {
                let Some(content) = args.arg_str("content") else {
                    return ToolResult::error("Error: content is required");
                };
                if let Err(e) = std::fs::create_dir_all(&self.dir) {
                    return ToolResult::error(format!("Cannot create notes directory: {e}"));
                }
                let body = if action == "append" && path.exists() {
                    match std::fs::read_to_string(&path) {
                        Ok(existing) => format!("{existing}\n{content}"),
                        Err(e) => return ToolResult::error(format!("Cannot read note: {e}")),
                    }
                } else {
                    content.to_string()
                };
                match std::fs::write(&path, body) {
                    Ok(()) => ToolResult::success(format!("Saved note '{name}'")),
                    Err(e) => ToolResult::error(format!("Cannot write note: {e}")),
                }
            }
            other => ToolResult::error(format!("Unknown action: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let pad = Notepad::new(dir.path().join("notes"));
        let write = pad
            .execute(ToolArgs::parse(
                r#"{"action": "write", "name": "Shopping List", "content": "milk"}"#,
            ))
            .await;
        assert!(!write.is_error);
        let read = pad
            .execute(ToolArgs::parse(
                r#"{"action": "read", "name": "shopping_list"}"#,
            ))
            .await;
        assert_eq!(read.content, "milk");
    }

    #[tokio::test]
    async fn missing_name_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let pad = Notepad::new(dir.path().join("notes"));
        let result = pad.execute(ToolArgs::parse(r#"{"action": "read"}"#)).await;
        assert!(result.is_error);
    }
}
