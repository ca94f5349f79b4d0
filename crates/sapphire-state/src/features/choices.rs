use serde_json::Value;

use crate::engine::{SetOutcome, StateEngine};
use crate::preset::Choice;
use crate::types::ChangedBy;

impl StateEngine {
    /// Choices whose state key has no resolved value yet.
    pub fn pending_choices(&self) -> Vec<&Choice> {
        let Some(preset) = self.preset.as_ref() else {
            return Vec::new();
        };
        preset
            .choices
            .iter()
            .filter(|c| self.choice_is_pending(c))
            .collect()
    }

    fn choice_is_pending(&self, choice: &Choice) -> bool {
        match self.get_state(choice.state_key()) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        }
    }

    /// Refuse iterator writes that would enter a scene a pending choice
    /// gates. The message names the unresolved choice.
    pub(crate) fn check_choice_blockers(
        &self,
        key: &str,
        value: &Value,
    ) -> std::result::Result<(), String> {
        let Some(preset) = self.preset.as_ref() else {
            return Ok(());
        };
        if self.iterator_key() != Some(key) {
            return Ok(());
        }
        let Some(attempted) = value.as_i64() else {
            return Ok(());
        };

        for choice in &preset.choices {
            let Some(required) = choice.required_for_scene else {
                continue;
            };
            if attempted >= required && self.choice_is_pending(choice) {
                return Err(format!(
                    "Cannot advance to scene {attempted}: choice '{}' must be resolved first. {}",
                    choice.id, choice.prompt
                ));
            }
        }
        Ok(())
    }

    /// Resolve a pending choice by id. The write goes through `set_state` so
    /// option validation and logging apply uniformly.
    pub fn make_choice(
        &mut self,
        choice_id: &str,
        option: &str,
        turn_number: u64,
        reason: &str,
    ) -> SetOutcome {
        let Some(choice) = self.preset.as_ref().and_then(|p| p.choice_by_id(choice_id)) else {
            return SetOutcome::refused(format!("Unknown choice: {choice_id}"));
        };
        let state_key = choice.state_key().to_string();
        let reason = if reason.is_empty() {
            format!("choice {choice_id}")
        } else {
            reason.to_string()
        };
        self.set_state(
            &state_key,
            Value::String(option.to_string()),
            ChangedBy::Ai,
            turn_number,
            &reason,
        )
    }
}
