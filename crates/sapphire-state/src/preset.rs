use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, StateError};

/// A loaded state preset: initial keys, the progressive prompt config, and
/// the optional feature sections.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Preset {
    /// key → spec object. `value`, `type`, and `label` are lifted out; every
    /// remaining field of the spec becomes that key's constraint object.
    #[serde(default)]
    pub initial_state: Map<String, Value>,
    #[serde(default)]
    pub progressive_prompt: Option<ProgressiveConfig>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub riddles: Vec<Riddle>,
}

impl Preset {
    /// Load `<dir>/<name>.json`.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{name}.json"));
        if !path.exists() {
            return Err(StateError::PresetNotFound {
                name: name.to_string(),
            });
        }
        let raw = std::fs::read_to_string(&path)?;
        serde_json::from_str(&raw).map_err(|e| StateError::MalformedPreset {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    /// Rooms when navigation connections are configured, linear otherwise.
    pub fn game_type(&self) -> GameType {
        let has_rooms = self
            .progressive_prompt
            .as_ref()
            .and_then(|p| p.navigation.as_ref())
            .map(|n| !n.connections.is_empty())
            .unwrap_or(false);
        if has_rooms {
            GameType::Rooms
        } else {
            GameType::Linear
        }
    }

    pub fn navigation(&self) -> Option<&NavigationConfig> {
        self.progressive_prompt
            .as_ref()
            .and_then(|p| p.navigation.as_ref())
            .filter(|n| !n.connections.is_empty())
    }

    pub fn choice_by_id(&self, id: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == id)
    }

    pub fn choice_for_key(&self, key: &str) -> Option<&Choice> {
        self.choices.iter().find(|c| c.state_key() == key)
    }

    pub fn riddle_by_id(&self, id: &str) -> Option<&Riddle> {
        self.riddles.iter().find(|r| r.id == id)
    }

    pub fn riddle_for_key(&self, key: &str) -> Option<&Riddle> {
        self.riddles.iter().find(|r| r.state_key() == key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    Linear,
    Rooms,
}

impl GameType {
    pub fn name(&self) -> &'static str {
        match self {
            GameType::Linear => "linear",
            GameType::Rooms => "rooms",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ProgressiveConfig {
    #[serde(default)]
    pub base: String,
    pub iterator: Option<String>,
    #[serde(default)]
    pub mode: ProgressiveMode,
    #[serde(default)]
    pub segments: Map<String, Value>,
    #[serde(default)]
    pub navigation: Option<NavigationConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProgressiveMode {
    #[default]
    Cumulative,
    CurrentOnly,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NavigationConfig {
    #[serde(default = "default_position_key")]
    pub position_key: String,
    /// room → {direction → destination room}.
    #[serde(default)]
    pub connections: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub room_names: HashMap<String, String>,
}

fn default_position_key() -> String {
    "player_room".to_string()
}

/// A binary choice that may gate scene advancement until resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub id: String,
    #[serde(default)]
    pub prompt: String,
    /// option → config (free-form; `description` is displayed when present).
    #[serde(default)]
    pub options: Map<String, Value>,
    state_key: Option<String>,
    #[serde(default)]
    pub required_for_scene: Option<i64>,
}

impl Choice {
    pub fn state_key(&self) -> &str {
        self.state_key.as_deref().unwrap_or(&self.id)
    }

    pub fn option_names(&self) -> Vec<String> {
        self.options.keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RiddleKind {
    #[default]
    Fixed,
    Numeric,
    Word,
}

/// A collaborative puzzle whose answer is derived at preset load and stored
/// only as a SHA-256 hash.
#[derive(Debug, Clone, Deserialize)]
pub struct Riddle {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: RiddleKind,
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub seed_from: Option<String>,
    #[serde(default = "default_digits")]
    pub digits: usize,
    #[serde(default = "default_wordlist")]
    pub wordlist: Vec<String>,
    /// clue order key (optionally condition-suffixed) → clue text.
    #[serde(default)]
    pub clues: Map<String, Value>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default)]
    pub success_sets: Map<String, Value>,
    #[serde(default)]
    pub lockout_sets: Map<String, Value>,
    #[serde(default)]
    pub success_message: Option<String>,
    #[serde(default)]
    pub fail_message: Option<String>,
    #[serde(default)]
    pub lockout_message: Option<String>,
    #[serde(default)]
    pub visible_from_scene: Option<i64>,
    state_key: Option<String>,
}

impl Riddle {
    pub fn state_key(&self) -> String {
        self.state_key
            .clone()
            .unwrap_or_else(|| format!("riddle_{}", self.id))
    }
}

fn default_digits() -> usize {
    4
}

fn default_wordlist() -> Vec<String> {
    ["XYZZY", "PLUGH", "PLOVER"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_max_attempts() -> u32 {
    999
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn minimal_preset_parses() {
        let preset: Preset = serde_json::from_value(json!({
            "initial_state": {
                "scene": {"value": 1, "type": "integer", "min": 1, "max": 5}
            },
            "progressive_prompt": {
                "base": "A story.",
                "iterator": "scene",
                "segments": {"1": "The beginning."}
            }
        }))
        .unwrap();
        assert_eq!(preset.game_type(), GameType::Linear);
        assert_eq!(
            preset.progressive_prompt.unwrap().iterator.as_deref(),
            Some("scene")
        );
    }

    #[test]
    fn navigation_makes_rooms() {
        let preset: Preset = serde_json::from_value(json!({
            "progressive_prompt": {
                "iterator": "player_room",
                "navigation": {
                    "position_key": "player_room",
                    "connections": {"hall": {"north": "study"}}
                }
            }
        }))
        .unwrap();
        assert_eq!(preset.game_type(), GameType::Rooms);
        assert_eq!(preset.navigation().unwrap().position_key, "player_room");
    }

    #[test]
    fn choice_defaults_state_key_to_id() {
        let choice: Choice = serde_json::from_value(json!({
            "id": "C1",
            "options": {"a": {}, "b": {}}
        }))
        .unwrap();
        assert_eq!(choice.state_key(), "C1");
        assert_eq!(choice.option_names(), vec!["a", "b"]);
    }
}
