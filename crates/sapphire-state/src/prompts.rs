//! Progressive prompt assembly.
//!
//! The iterator key's value determines which segments are revealed:
//! cumulative mode includes every numeric segment up to the value, while
//! current_only and rooms mode include just the matching one. Segment keys
//! may carry `?cond` suffixes; all matching variants stack after the
//! unconditional base, ascending by their scene_turns threshold.

use serde_json::Value;

use crate::conditions::{match_conditions, parse_segment_key, scene_turns_priority};
use crate::engine::StateEngine;
use crate::preset::ProgressiveMode;

const BASE_INSTRUCTIONS: &str = "You are running an interactive scenario. Track the world \
through the state tools: read with get_state, change values with set_state, and always give \
a short reason for writes. Never invent state keys that are not listed.";

/// Stack every matching variant of one base key: the unconditional segment
/// first, then each satisfied conditional variant in ascending threshold
/// order. Content controls its own separators.
fn select_segment(
    base_key: &str,
    segments: &serde_json::Map<String, Value>,
    state_getter: &dyn Fn(&str) -> Option<Value>,
    scene_turns: u64,
) -> String {
    let mut fallback: Option<&str> = None;
    let mut variants: Vec<(i64, Vec<crate::conditions::Condition>, &str)> = Vec::new();

    for (seg_key, content) in segments {
        let Some(content) = content.as_str() else {
            continue;
        };
        let (parsed_base, conditions) = parse_segment_key(seg_key);
        if parsed_base != base_key {
            continue;
        }
        if conditions.is_empty() {
            fallback = Some(content);
        } else {
            variants.push((scene_turns_priority(&conditions), conditions, content));
        }
    }

    variants.sort_by_key(|(priority, _, _)| *priority);

    let mut parts: Vec<&str> = Vec::new();
    if let Some(base) = fallback {
        parts.push(base);
    }
    for (_, conditions, content) in &variants {
        if match_conditions(conditions, state_getter, scene_turns) {
            parts.push(content);
        }
    }
    parts.concat()
}

impl StateEngine {
    /// Build the progressive prompt for the current iterator value, with the
    /// feature sections (pending choices, unsolved riddles, exits) appended.
    pub fn build_progressive_prompt(&self, current_turn: u64) -> String {
        let Some(config) = self.progressive_config() else {
            return String::new();
        };
        let scene_turns = self.scene_turns(current_turn);
        let getter = |k: &str| self.get_state(k);

        let mut parts: Vec<String> = vec![BASE_INSTRUCTIONS.to_string()];
        if !config.base.is_empty() {
            parts.push(config.base.clone());
        }

        if let (Some(_iterator), false) = (config.iterator.as_deref(), config.segments.is_empty())
        {
            if let Some(iterator_value) = self.iterator_value() {
                parts.extend(collect_segments(
                    &config.segments,
                    &iterator_value,
                    config.mode,
                    &getter,
                    scene_turns,
                ));
            }
        }

        if let Some(section) = self.choices_section() {
            parts.push(section);
        }
        if let Some(section) = self.riddles_section(current_turn) {
            parts.push(section);
        }
        if self.navigation_enabled() {
            let exits = self.available_exits();
            if !exits.is_empty() {
                parts.push(format!("Exits: {}", exits.join(", ")));
            }
        }

        parts.join("\n\n")
    }

    /// Format state for system-prompt injection: visible variables, a tools
    /// hint, then the progressive story content.
    pub fn format_for_prompt(
        &self,
        include_vars: bool,
        include_story: bool,
        current_turn: u64,
    ) -> String {
        let mut parts: Vec<String> = Vec::new();

        if include_vars && !self.cache.is_empty() {
            let mut lines: Vec<String> = Vec::new();
            for (key, value) in self.visible_state(None) {
                let label = self.get_entry(&key).and_then(|e| e.label.clone());
                let value_str = crate::validation::render(&value);
                match label {
                    Some(label) if label != key => lines.push(format!("{key} ({label}): {value_str}")),
                    _ => lines.push(format!("{key}: {value_str}")),
                }
            }
            if !lines.is_empty() {
                parts.push(lines.join("\n"));
            }
        }

        let mut tools = vec![
            "get_state()",
            "set_state(key, value, reason)",
            "roll_dice(count, sides)",
            "increment_counter(key, amount)",
        ];
        if self.navigation_enabled() {
            tools.insert(2, "move(direction, reason)");
        }
        if self.preset.as_ref().is_some_and(|p| !p.choices.is_empty()) {
            tools.push("make_choice(choice_id, option, reason)");
        }
        if self.preset.as_ref().is_some_and(|p| !p.riddles.is_empty()) {
            tools.push("attempt_riddle(riddle_id, answer)");
        }
        parts.push(format!("Tools: {}", tools.join(", ")));

        if include_story {
            let story = self.build_progressive_prompt(current_turn);
            if !story.is_empty() {
                parts.push(story);
            }
        }

        if parts.is_empty() {
            "(state engine active - use get_state())".to_string()
        } else {
            parts.join("\n\n")
        }
    }

    fn choices_section(&self) -> Option<String> {
        let pending = self.pending_choices();
        if pending.is_empty() {
            return None;
        }

        let mut lines = vec!["⚠️ DECISION REQUIRED:".to_string()];
        for choice in pending {
            lines.push(format!("\n**{}**", choice.prompt));
            lines.push(format!("Set: {}", choice.state_key()));
            lines.push("Options:".to_string());
            for (option, config) in &choice.options {
                let desc = config
                    .get("description")
                    .and_then(|d| d.as_str())
                    .unwrap_or(option);
                lines.push(format!("  • \"{option}\": {desc}"));
            }
            lines.push(format!(
                "Use: set_state(\"{}\", \"<option>\", \"reason\")",
                choice.state_key()
            ));
            if let Some(scene) = choice.required_for_scene {
                lines.push(format!("(Must choose before advancing to scene {scene})"));
            }
        }
        Some(lines.join("\n"))
    }

    fn riddles_section(&self, current_turn: u64) -> Option<String> {
        let preset = self.preset.as_ref()?;
        if preset.riddles.is_empty() {
            return None;
        }
        let iterator_value = self.iterator_value_int();
        let scene_turns = self.scene_turns(current_turn);

        let mut sections: Vec<String> = Vec::new();
        for riddle in &preset.riddles {
            if let (Some(visible_from), Some(iter)) = (riddle.visible_from_scene, iterator_value) {
                if iter < visible_from {
                    continue;
                }
            }
            let Some(status) = self.riddle_status(&riddle.id) else {
                continue;
            };
            if status.solved || status.locked {
                continue;
            }
            let clues = self.riddle_clues(&riddle.id, scene_turns);
            if clues.is_empty() {
                continue;
            }

            let mut lines = vec![format!(
                "🔐 RIDDLE: {}",
                riddle.name.as_deref().unwrap_or(&riddle.id)
            )];
            if riddle.digits > 0 && matches!(riddle.kind, crate::preset::RiddleKind::Numeric) {
                lines.push(format!("Format: {} digits", riddle.digits));
            }
            lines.push(format!(
                "Attempts: {}/{}",
                status.attempts, status.max_attempts
            ));
            lines.push("Clues revealed:".to_string());
            for (i, clue) in clues.iter().enumerate() {
                lines.push(format!("  {}. {clue}", i + 1));
            }
            lines.push(format!(
                "Use: attempt_riddle(\"{}\", \"<answer>\")",
                riddle.id
            ));
            sections.push(lines.join("\n"));
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }
}

/// Collect the revealed segments for the iterator value.
fn collect_segments(
    segments: &serde_json::Map<String, Value>,
    iterator_value: &Value,
    mode: ProgressiveMode,
    state_getter: &dyn Fn(&str) -> Option<Value>,
    scene_turns: u64,
) -> Vec<String> {
    let mut base_keys: Vec<String> = Vec::new();
    for seg_key in segments.keys() {
        let (base, _) = parse_segment_key(seg_key);
        if !base_keys.contains(&base) {
            base_keys.push(base);
        }
    }

    let mut revealed = Vec::new();

    if let Some(iter) = iterator_value.as_i64().or_else(|| iterator_value.as_f64().map(|f| f as i64)) {
        let mut numeric_keys: Vec<i64> = base_keys
            .iter()
            .filter_map(|k| k.parse::<i64>().ok())
            .collect();
        numeric_keys.sort_unstable();

        for key in numeric_keys {
            let include = match mode {
                ProgressiveMode::Cumulative => key <= iter,
                ProgressiveMode::CurrentOnly => key == iter,
            };
            if include {
                let content =
                    select_segment(&key.to_string(), segments, state_getter, scene_turns);
                if !content.is_empty() {
                    revealed.push(content);
                }
            }
            if mode == ProgressiveMode::CurrentOnly && key == iter {
                break;
            }
        }
    } else if let Some(room) = iterator_value.as_str() {
        // Rooms mode: only the current room's segment.
        let content = select_segment(room, segments, state_getter, scene_turns);
        if !content.is_empty() {
            revealed.push(content);
        }
    }

    revealed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn segments(pairs: &[(&str, &str)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn cumulative_reveals_up_to_iterator() {
        let segs = segments(&[("1", "one."), ("2", "two."), ("3", "three.")]);
        let revealed = collect_segments(&segs, &json!(2), ProgressiveMode::Cumulative, &|_| None, 0);
        assert_eq!(revealed, vec!["one.".to_string(), "two.".to_string()]);
    }

    #[test]
    fn current_only_reveals_exactly_one() {
        let segs = segments(&[("1", "one."), ("2", "two."), ("3", "three.")]);
        let revealed =
            collect_segments(&segs, &json!(2), ProgressiveMode::CurrentOnly, &|_| None, 0);
        assert_eq!(revealed, vec!["two.".to_string()]);
    }

    #[test]
    fn string_iterator_selects_room_segment() {
        let segs = segments(&[("hall", "A dusty hall."), ("study", "Shelves everywhere.")]);
        let revealed = collect_segments(
            &segs,
            &json!("study"),
            ProgressiveMode::Cumulative,
            &|_| None,
            0,
        );
        assert_eq!(revealed, vec!["Shelves everywhere.".to_string()]);
    }

    #[test]
    fn conditional_variants_stack_in_threshold_order() {
        let segs = segments(&[
            ("1", "Base."),
            ("1?scene_turns>=5", " Later."),
            ("1?scene_turns>=2", " Soon."),
        ]);
        let content = select_segment("1", &segs, &|_| None, 6);
        assert_eq!(content, "Base. Soon. Later.");
        let content = select_segment("1", &segs, &|_| None, 3);
        assert_eq!(content, "Base. Soon.");
        let content = select_segment("1", &segs, &|_| None, 0);
        assert_eq!(content, "Base.");
    }

    #[test]
    fn state_conditions_gate_variants() {
        let segs = segments(&[("2", "Room."), ("2?door_open", " The door stands open.")]);
        let open = |k: &str| (k == "door_open").then(|| json!(true));
        let closed = |k: &str| (k == "door_open").then(|| json!(false));
        assert_eq!(
            select_segment("2", &segs, &open, 0),
            "Room. The door stands open."
        );
        assert_eq!(select_segment("2", &segs, &closed, 0), "Room.");
    }
}
