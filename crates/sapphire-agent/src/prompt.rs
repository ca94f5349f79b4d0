//! System-prompt assembly for a turn.
//!
//! Order: active prompt content, custom context, datetime injection, spice
//! alert, then state-engine content when the chat has the engine enabled.

use std::sync::{Arc, Mutex};

use sapphire_sessions::ChatSettings;
use sapphire_state::StateStore;
use sapphire_store::{PromptStore, SpiceStore};
use tracing::debug;

pub struct PromptBuilder {
    prompts: Arc<PromptStore>,
    spices: Arc<SpiceStore>,
    states: Arc<StateStore>,
    /// Spice held until `spice_turns` elapse, then re-rolled.
    current_spice: Mutex<Option<(String, u64)>>,
}

impl PromptBuilder {
    pub fn new(prompts: Arc<PromptStore>, spices: Arc<SpiceStore>, states: Arc<StateStore>) -> Self {
        Self {
            prompts,
            spices,
            states,
            current_spice: Mutex::new(None),
        }
    }

    /// Assemble the system prompt for one turn of `chat_name`.
    pub fn build(&self, chat_name: &str, settings: &ChatSettings, turn_number: u64) -> String {
        let mut parts: Vec<String> = Vec::new();

        let prompt_name = if settings.prompt.is_empty() {
            "default"
        } else {
            &settings.prompt
        };
        match self.prompts.get(prompt_name) {
            Some(content) => parts.push(content),
            None => {
                debug!(prompt = prompt_name, "prompt not found, using default");
                if let Some(content) = self.prompts.get("default") {
                    parts.push(content);
                }
            }
        }

        if !settings.custom_context.is_empty() {
            parts.push(settings.custom_context.clone());
        }

        if settings.inject_datetime {
            let now = chrono::Local::now();
            parts.push(format!(
                "Current date and time: {}",
                now.format("%A, %B %-d, %Y %-I:%M %p")
            ));
        }

        if settings.spice_enabled && !settings.spice_set.is_empty() {
            if let Some(spice) = self.pick_spice(settings, turn_number) {
                parts.push(format!("⚠️ URGENT ALERT: {spice}"));
            }
        }

        if settings.state_engine_enabled {
            let engine = self.states.engine(chat_name);
            let engine = engine.lock().unwrap();
            if !engine.is_empty() || engine.preset_name().is_some() {
                parts.push(format!(
                    "## Current state\n{}",
                    engine.format_for_prompt(
                        settings.state_vars_in_prompt,
                        settings.state_story_in_prompt,
                        turn_number,
                    )
                ));
            }
        }

        parts.join("\n\n")
    }

    /// A spice sticks for `spice_turns` turns, then a new one is drawn.
    fn pick_spice(&self, settings: &ChatSettings, turn_number: u64) -> Option<String> {
        let period = settings.spice_turns.max(1) as u64;
        let mut current = self.current_spice.lock().unwrap();
        if let Some((spice, chosen_at)) = current.as_ref() {
            if turn_number.saturating_sub(*chosen_at) < period {
                return Some(spice.clone());
            }
        }
        let fresh = self.spices.pick(&settings.spice_set)?;
        *current = Some((fresh.clone(), turn_number));
        Some(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(dir: &tempfile::TempDir) -> PromptBuilder {
        let prompts = Arc::new(PromptStore::open(dir.path().join("prompts")));
        let spices = Arc::new(SpiceStore::open(dir.path().join("spice_sets.json")));
        let states = Arc::new(
            StateStore::open(&dir.path().join("state.db"), dir.path().join("presets")).unwrap(),
        );
        PromptBuilder::new(prompts, spices, states)
    }

    #[test]
    fn base_prompt_plus_custom_context() {
        let dir = tempfile::tempdir().unwrap();
        let b = builder(&dir);
        let settings = ChatSettings {
            custom_context: "The user is named Alex.".to_string(),
            ..ChatSettings::default()
        };
        let prompt = b.build("default", &settings, 1);
        assert!(prompt.contains("Sapphire"));
        assert!(prompt.contains("Alex"));
    }

    #[test]
    fn datetime_injection_is_optional() {
        let dir = tempfile::tempdir().unwrap();
        let b = builder(&dir);
        let plain = b.build("default", &ChatSettings::default(), 1);
        assert!(!plain.contains("Current date and time"));

        let settings = ChatSettings {
            inject_datetime: true,
            ..ChatSettings::default()
        };
        assert!(b.build("default", &settings, 1).contains("Current date and time"));
    }

    #[test]
    fn spice_sticks_for_its_period() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("spice_sets.json"),
            r#"{"moods": ["only_entry"]}"#,
        )
        .unwrap();
        let b = builder(&dir);
        let settings = ChatSettings {
            spice_enabled: true,
            spice_set: "moods".to_string(),
            spice_turns: 3,
            ..ChatSettings::default()
        };
        let p1 = b.build("default", &settings, 1);
        assert!(p1.contains("URGENT ALERT: only_entry"));
        let p2 = b.build("default", &settings, 2);
        assert!(p2.contains("only_entry"));
    }
}
