//! State tools exposed to the model when the state engine is enabled.
//!
//! These are not part of the regular tool registry — the orchestrator injects
//! them when the active chat has `state_engine_enabled` and dispatches them
//! here by name.

use rand::Rng;
use sapphire_tools::{ToolArgs, ToolDefinition};
use serde_json::{json, Value};
use tracing::info;

use crate::engine::StateEngine;
use crate::types::ChangedBy;
use crate::validation::{clamp_to_bounds, render};

/// Names the orchestrator uses to classify a tool call as a state tool.
pub const STATE_TOOL_NAMES: &[&str] = &[
    "get_state",
    "set_state",
    "roll_dice",
    "increment_counter",
    "move",
    "make_choice",
    "attempt_riddle",
];

pub fn definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "get_state".to_string(),
            description: "Get current game/simulation state. Call with no key to see all state, or specify a key for one value.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Optional: specific state key to retrieve. Omit for all state."}
                },
                "required": []
            }),
        },
        ToolDefinition {
            name: "set_state".to_string(),
            description: "Set a game/simulation state value. Always provide a reason for the change.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "State key to set"},
                    "value": {"description": "New value (string, number, boolean, or array)"},
                    "reason": {"type": "string", "description": "Brief reason for this change (logged for history)"}
                },
                "required": ["key", "value"]
            }),
        },
        ToolDefinition {
            name: "roll_dice".to_string(),
            description: "Roll dice for random outcomes. Returns individual rolls and total.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "count": {"type": "integer", "description": "Number of dice to roll", "minimum": 1, "maximum": 20},
                    "sides": {"type": "integer", "description": "Number of sides per die (e.g., 6 for d6, 20 for d20)", "minimum": 2, "maximum": 100}
                },
                "required": ["count", "sides"]
            }),
        },
        ToolDefinition {
            name: "increment_counter".to_string(),
            description: "Atomically increment (or decrement) a numeric state value. Safer than get+set for counters.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "State key to increment (must be numeric)"},
                    "amount": {"type": "integer", "description": "Amount to add (negative to subtract)", "default": 1},
                    "reason": {"type": "string", "description": "Brief reason for this change"}
                },
                "required": ["key"]
            }),
        },
        ToolDefinition {
            name: "move".to_string(),
            description: "Move in a direction (for room-based navigation). Use compass directions (north, south, east, west) or positional (up, down). The system validates that the exit exists.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "direction": {"type": "string", "description": "Direction to move: north/n, south/s, east/e, west/w, up/u, down/d, etc."},
                    "reason": {"type": "string", "description": "Brief reason for movement (for history)"}
                },
                "required": ["direction"]
            }),
        },
        ToolDefinition {
            name: "make_choice".to_string(),
            description: "Make a binary choice when presented with mutually exclusive options. Used for critical story decisions that block progression until resolved.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "choice_id": {"type": "string", "description": "ID of the choice (from the prompt)"},
                    "option": {"type": "string", "description": "Which option to select"},
                    "reason": {"type": "string", "description": "Brief reason for this choice"}
                },
                "required": ["choice_id", "option"]
            }),
        },
        ToolDefinition {
            name: "attempt_riddle".to_string(),
            description: "Attempt to solve a riddle/puzzle. Neither you nor the player knows the answer - use revealed clues to deduce it together.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "riddle_id": {"type": "string", "description": "ID of the riddle to attempt"},
                    "answer": {"type": "string", "description": "The proposed answer/code/password"}
                },
                "required": ["riddle_id", "answer"]
            }),
        },
    ]
}

pub fn is_state_tool(name: &str) -> bool {
    STATE_TOOL_NAMES.contains(&name)
}

/// Execute a state tool against a chat's engine. Returns the text for the
/// tool message and whether the call succeeded.
pub fn execute(
    function_name: &str,
    args: &ToolArgs,
    engine: &mut StateEngine,
    turn_number: u64,
) -> (String, bool) {
    match function_name {
        "get_state" => match args.arg_str("key") {
            Some("scene_turns") => (
                format!("scene_turns = {}", engine.scene_turns(turn_number)),
                true,
            ),
            Some(key) => match engine.get_state(key) {
                Some(value) => (format!("{key} = {}", render(&value)), true),
                None => (format!("Key '{key}' not found in state"), false),
            },
            None => {
                let state = engine.visible_state(Some(turn_number));
                if state.is_empty() {
                    ("(no state set)".to_string(), true)
                } else {
                    let lines: Vec<String> = state
                        .iter()
                        .map(|(k, v)| format!("{k}: {}", render(v)))
                        .collect();
                    (lines.join("\n"), true)
                }
            }
        },

        "set_state" => {
            let Some(key) = args.arg_str("key") else {
                return ("Error: key is required".to_string(), false);
            };
            let Some(value) = args.arg_value("value").cloned() else {
                return ("Error: value is required".to_string(), false);
            };
            let reason = args.arg_string_or("reason", "");
            let outcome = engine.set_state(key, value, ChangedBy::Ai, turn_number, &reason);
            (outcome.message, outcome.success)
        }

        "roll_dice" => {
            let count = args.arg_i64("count").unwrap_or(1).clamp(1, 20);
            let sides = args.arg_i64("sides").unwrap_or(6).clamp(2, 100);

            let mut rng = rand::thread_rng();
            let rolls: Vec<i64> = (0..count).map(|_| rng.gen_range(1..=sides)).collect();
            let total: i64 = rolls.iter().sum();

            let result = if count == 1 {
                format!("🎲 Rolled d{sides}: {total}")
            } else {
                format!("🎲 Rolled {count}d{sides}: {rolls:?} = {total}")
            };

            // Audit trail.
            engine.set_state(
                "_last_roll",
                json!({"dice": format!("{count}d{sides}"), "rolls": rolls, "total": total}),
                ChangedBy::System,
                turn_number,
                "dice roll",
            );
            (result, true)
        }

        "increment_counter" => {
            let Some(key) = args.arg_str("key") else {
                return ("Error: key is required".to_string(), false);
            };
            let amount = args.arg_i64("amount").unwrap_or(1);
            let reason = args.arg_string_or("reason", &format!("increment by {amount}"));

            let Some(current) = engine.get_state(key) else {
                return (format!("Error: key '{key}' not found"), false);
            };
            let Some(current) = current.as_f64() else {
                return (
                    format!("Error: '{key}' is not numeric (value: {current})"),
                    false,
                );
            };

            let constraints = engine.get_entry(key).and_then(|e| e.constraints.clone());
            let (new_value, clamped) =
                clamp_to_bounds(current + amount as f64, constraints.as_ref());
            let label = engine
                .get_entry(key)
                .and_then(|e| e.label.clone())
                .unwrap_or_else(|| key.to_string());

            let value = if new_value.fract() == 0.0 {
                json!(new_value as i64)
            } else {
                json!(new_value)
            };
            let outcome = engine.set_state(key, value, ChangedBy::Ai, turn_number, &reason);
            if outcome.success {
                let current = trim_num(current);
                let new_value = trim_num(new_value);
                if clamped {
                    (
                        format!("✓ {label}: {current} → {new_value} (clamped to bounds)"),
                        true,
                    )
                } else {
                    (format!("✓ {label}: {current} → {new_value}"), true)
                }
            } else {
                (outcome.message, false)
            }
        }

        "move" => {
            let direction = args.arg_string_or("direction", "");
            if direction.trim().is_empty() {
                return ("Error: direction is required".to_string(), false);
            }
            let reason = args.arg_string_or("reason", "");
            let outcome = engine.move_direction(&direction, turn_number, &reason);
            (outcome.message, outcome.success)
        }

        "make_choice" => {
            let choice_id = args.arg_string_or("choice_id", "");
            let option = args.arg_string_or("option", "");
            if choice_id.trim().is_empty() {
                return ("Error: choice_id is required".to_string(), false);
            }
            if option.trim().is_empty() {
                return ("Error: option is required".to_string(), false);
            }
            let reason = args.arg_string_or("reason", "");
            let outcome = engine.make_choice(&choice_id, &option, turn_number, &reason);
            (outcome.message, outcome.success)
        }

        "attempt_riddle" => {
            let riddle_id = args.arg_string_or("riddle_id", "");
            let answer = args.arg_string_or("answer", "");
            if riddle_id.trim().is_empty() {
                return ("Error: riddle_id is required".to_string(), false);
            }
            if answer.trim().is_empty() {
                return ("Error: answer is required".to_string(), false);
            }
            let outcome = engine.attempt_riddle(&riddle_id, &answer, turn_number);
            (outcome.message, outcome.success)
        }

        other => {
            info!(tool = other, "unknown state tool");
            (format!("Unknown state tool: {other}"), false)
        }
    }
}

fn trim_num(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
