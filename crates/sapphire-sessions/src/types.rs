use sapphire_core::types::Message;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-chat settings bundle. The key set is closed; unknown keys in a delta
/// are ignored by the shallow merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    pub prompt: String,
    pub toolset: String,
    pub provider: String,
    pub model: String,
    pub voice: String,
    pub pitch: f64,
    pub speed: f64,
    pub spice_set: String,
    pub spice_enabled: bool,
    pub spice_turns: u32,
    pub inject_datetime: bool,
    pub custom_context: String,
    pub memory_scope: String,
    pub trim_color: String,
    pub state_engine_enabled: bool,
    pub state_preset: String,
    pub state_vars_in_prompt: bool,
    pub state_story_in_prompt: bool,
    /// Read-only in deltas: derived from the active prompt, not user-set.
    pub privacy_required: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            prompt: "default".to_string(),
            toolset: "none".to_string(),
            provider: String::new(),
            model: String::new(),
            voice: String::new(),
            pitch: 1.0,
            speed: 1.0,
            spice_set: String::new(),
            spice_enabled: false,
            spice_turns: 5,
            inject_datetime: false,
            custom_context: String::new(),
            memory_scope: "default".to_string(),
            trim_color: String::new(),
            state_engine_enabled: false,
            state_preset: String::new(),
            state_vars_in_prompt: true,
            state_story_in_prompt: true,
            privacy_required: false,
        }
    }
}

impl ChatSettings {
    /// Shallow-merge a delta into these settings. Unknown keys are dropped;
    /// mistyped values leave the field untouched.
    pub fn merged(&self, delta: &Map<String, Value>) -> Self {
        let mut as_map = match serde_json::to_value(self) {
            Ok(Value::Object(m)) => m,
            _ => return self.clone(),
        };
        for (k, v) in delta {
            if as_map.contains_key(k) {
                as_map.insert(k.clone(), v.clone());
            }
        }
        serde_json::from_value(Value::Object(as_map)).unwrap_or_else(|_| self.clone())
    }
}

/// On-disk shape of a chat.
#[derive(Debug, Clone, Serialize)]
pub struct ChatFile {
    pub settings: ChatSettings,
    pub messages: Vec<Message>,
}

impl ChatFile {
    pub fn empty() -> Self {
        Self {
            settings: ChatSettings::default(),
            messages: Vec::new(),
        }
    }
}

impl<'de> Deserialize<'de> for ChatFile {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Current shape is an object; legacy files are a bare message array.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Shape {
            Current {
                #[serde(default)]
                settings: ChatSettings,
                #[serde(default)]
                messages: Vec<Message>,
            },
            Legacy(Vec<Message>),
        }

        Ok(match Shape::deserialize(deserializer)? {
            Shape::Current { settings, messages } => ChatFile { settings, messages },
            Shape::Legacy(messages) => ChatFile {
                settings: ChatSettings::default(),
                messages,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_ignores_unknown_keys() {
        let settings = ChatSettings::default();
        let delta = json!({"prompt": "storyteller", "bogus": true})
            .as_object()
            .unwrap()
            .clone();
        let merged = settings.merged(&delta);
        assert_eq!(merged.prompt, "storyteller");
        assert_eq!(merged.toolset, "none");
    }

    #[test]
    fn merge_is_idempotent() {
        let delta = json!({"spice_enabled": true, "spice_turns": 3})
            .as_object()
            .unwrap()
            .clone();
        let once = ChatSettings::default().merged(&delta);
        let twice = once.merged(&delta);
        assert_eq!(once, twice);
    }

    #[test]
    fn legacy_array_reads_as_chat_file() {
        let raw = r#"[{"role": "user", "content": "hi", "timestamp": "t1"}]"#;
        let chat: ChatFile = serde_json::from_str(raw).unwrap();
        assert_eq!(chat.messages.len(), 1);
        assert_eq!(chat.settings, ChatSettings::default());
    }
}
