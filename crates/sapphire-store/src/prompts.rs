use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::write_atomic;

const DEFAULT_PROMPT: &str =
    "You are Sapphire, a helpful voice assistant. Keep replies short and natural to speak aloud.";

#[derive(Debug, Serialize, Deserialize)]
struct PromptFile {
    content: String,
}

/// Content-agnostic named prompt storage plus the active-prompt pointer.
pub struct PromptStore {
    dir: PathBuf,
    active: Mutex<String>,
}

impl PromptStore {
    pub fn open(dir: PathBuf) -> Self {
        Self {
            dir,
            active: Mutex::new("default".to_string()),
        }
    }

    /// Fetch a prompt's content. The built-in `default` always resolves.
    pub fn get(&self, name: &str) -> Option<String> {
        let path = self.path_for(name);
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<PromptFile>(&raw) {
                    Ok(p) => return Some(p.content),
                    Err(e) => warn!(prompt = name, "malformed prompt file: {e}"),
                },
                Err(e) => warn!(prompt = name, "failed to read prompt: {e}"),
            }
        }
        (name == "default").then(|| DEFAULT_PROMPT.to_string())
    }

    pub fn set(&self, name: &str, content: &str) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let bytes = serde_json::to_vec_pretty(&PromptFile {
            content: content.to_string(),
        })?;
        write_atomic(&self.path_for(name), &bytes)?;
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        let mut names = vec!["default".to_string()];
        if let Ok(entries) = std::fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                    if entry.path().extension().and_then(|e| e.to_str()) == Some("json")
                        && stem != "default"
                    {
                        names.push(stem.to_string());
                    }
                }
            }
        }
        names.sort();
        names
    }

    pub fn active_name(&self) -> String {
        self.active.lock().unwrap().clone()
    }

    pub fn set_active_name(&self, name: &str) {
        *self.active.lock().unwrap() = name.to_string();
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt_always_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::open(dir.path().join("prompts"));
        assert!(store.get("default").is_some());
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn set_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PromptStore::open(dir.path().join("prompts"));
        store.set("storyteller", "You narrate adventures.").unwrap();
        assert_eq!(
            store.get("storyteller").unwrap(),
            "You narrate adventures."
        );
        assert!(store.list().contains(&"storyteller".to_string()));
    }
}
