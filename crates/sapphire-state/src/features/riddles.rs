use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::conditions::{match_conditions, parse_segment_key};
use crate::engine::{SetOutcome, StateEngine};
use crate::preset::{Riddle, RiddleKind};
use crate::types::ChangedBy;

#[derive(Debug, Clone, serde::Serialize)]
pub struct RiddleStatus {
    pub id: String,
    pub solved: bool,
    pub locked: bool,
    pub attempts: u32,
    pub max_attempts: u32,
}

impl StateEngine {
    /// Derive and store each riddle's answer hash plus its attempt counter.
    /// The plaintext answer is never persisted.
    pub(crate) fn initialize_riddles(&mut self, turn_number: u64) {
        let prepared: Vec<(String, String)> = self
            .preset
            .as_ref()
            .map(|p| {
                p.riddles
                    .iter()
                    .filter_map(|r| {
                        generate_answer(r, &self.chat_name)
                            .map(|a| (r.id.clone(), answer_hash(&a)))
                    })
                    .collect()
            })
            .unwrap_or_default();

        for (id, hash) in prepared {
            self.set_state(
                &format!("_riddle_{id}_hash"),
                Value::String(hash.clone()),
                ChangedBy::System,
                turn_number,
                "Riddle initialized",
            );
            self.set_state(
                &format!("_riddle_{id}_attempts"),
                Value::from(0),
                ChangedBy::System,
                turn_number,
                "Riddle attempts initialized",
            );
            debug!(riddle = %id, hash_prefix = &hash[..16], "riddle initialized");
        }
    }

    /// Late-initialize riddles whose state is missing (restart recovery).
    pub(crate) fn ensure_riddles_initialized(&mut self) {
        let missing: Vec<(String, Option<String>)> = self
            .preset
            .as_ref()
            .map(|p| {
                p.riddles
                    .iter()
                    .filter(|r| self.get_state(&format!("_riddle_{}_hash", r.id)).is_none())
                    .map(|r| (r.id.clone(), generate_answer(r, &self.chat_name)))
                    .collect()
            })
            .unwrap_or_default();

        for (id, answer) in missing {
            let Some(answer) = answer else {
                warn!(riddle = %id, "could not generate riddle answer");
                continue;
            };
            self.set_state(
                &format!("_riddle_{id}_hash"),
                Value::String(answer_hash(&answer)),
                ChangedBy::System,
                0,
                "Riddle initialized on reload",
            );
            self.set_state(
                &format!("_riddle_{id}_attempts"),
                Value::from(0),
                ChangedBy::System,
                0,
                "Riddle attempts initialized on reload",
            );
        }
    }

    /// Attempt a riddle. Neither the AI nor the player ever sees the answer;
    /// only its hash is compared. Exhausting `max_attempts` locks the riddle
    /// and applies its lockout sets.
    pub fn attempt_riddle(
        &mut self,
        riddle_id: &str,
        answer: &str,
        turn_number: u64,
    ) -> SetOutcome {
        let Some(riddle) = self
            .preset
            .as_ref()
            .and_then(|p| p.riddle_by_id(riddle_id))
            .cloned()
        else {
            return SetOutcome::refused(format!("Unknown riddle: {riddle_id}"));
        };

        let solved_key = format!("_riddle_{riddle_id}_solved");
        let locked_key = format!("_riddle_{riddle_id}_locked");
        let attempts_key = format!("_riddle_{riddle_id}_attempts");

        if self.get_state(&solved_key) == Some(Value::Bool(true)) {
            return SetOutcome::refused("This riddle has already been solved.");
        }
        if self.get_state(&locked_key) == Some(Value::Bool(true)) {
            return SetOutcome::refused("Too many failed attempts. The riddle is locked.");
        }

        let attempts = self
            .get_state(&attempts_key)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        // Attempts already exhausted: this attempt triggers the lockout.
        if attempts >= riddle.max_attempts {
            self.set_state(
                &locked_key,
                Value::Bool(true),
                ChangedBy::System,
                turn_number,
                "Riddle locked",
            );
            for (key, value) in riddle.lockout_sets.clone() {
                self.set_state(
                    &key,
                    value,
                    ChangedBy::Ai,
                    turn_number,
                    &format!("Riddle '{riddle_id}' locked"),
                );
            }
            let msg = riddle
                .lockout_message
                .as_deref()
                .unwrap_or("Too many wrong answers. The riddle is now locked.");
            return SetOutcome::refused(format!("✗ {msg}"));
        }

        let stored_hash = self
            .get_state(&format!("_riddle_{riddle_id}_hash"))
            .and_then(|v| v.as_str().map(String::from));

        if stored_hash.as_deref() == Some(answer_hash(answer.trim()).as_str()) {
            self.set_state(
                &solved_key,
                Value::Bool(true),
                ChangedBy::System,
                turn_number,
                "Riddle solved",
            );
            for (key, value) in riddle.success_sets.clone() {
                self.set_state(
                    &key,
                    value,
                    ChangedBy::Ai,
                    turn_number,
                    &format!("Riddle '{riddle_id}' solved"),
                );
            }
            let msg = riddle
                .success_message
                .as_deref()
                .unwrap_or("Correct! The riddle is solved.");
            return SetOutcome::ok(format!("✓ {msg}"));
        }

        let attempts = attempts + 1;
        self.set_state(
            &attempts_key,
            Value::from(attempts),
            ChangedBy::System,
            turn_number,
            "Failed attempt",
        );
        let remaining = riddle.max_attempts.saturating_sub(attempts);
        let msg = riddle.fail_message.as_deref().unwrap_or("That's not correct.");
        SetOutcome::refused(format!("✗ {msg} ({remaining} attempts remaining)"))
    }

    pub fn riddle_status(&self, riddle_id: &str) -> Option<RiddleStatus> {
        let riddle = self.preset.as_ref()?.riddle_by_id(riddle_id)?;
        Some(RiddleStatus {
            id: riddle_id.to_string(),
            solved: self.get_state(&format!("_riddle_{riddle_id}_solved"))
                == Some(Value::Bool(true)),
            locked: self.get_state(&format!("_riddle_{riddle_id}_locked"))
                == Some(Value::Bool(true)),
            attempts: self
                .get_state(&format!("_riddle_{riddle_id}_attempts"))
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            max_attempts: riddle.max_attempts,
        })
    }

    /// Clues revealed so far, ordered, honoring `key?cond` conditions the
    /// same way prompt segments do.
    pub fn riddle_clues(&self, riddle_id: &str, scene_turns: u64) -> Vec<String> {
        let Some(riddle) = self.preset.as_ref().and_then(|p| p.riddle_by_id(riddle_id)) else {
            return Vec::new();
        };

        let mut items: Vec<(i64, Vec<crate::conditions::Condition>, String)> = riddle
            .clues
            .iter()
            .filter_map(|(key, text)| {
                let text = text.as_str()?.to_string();
                let (base, conditions) = parse_segment_key(key);
                let order = base.parse::<i64>().unwrap_or(999);
                Some((order, conditions, text))
            })
            .collect();
        items.sort_by_key(|(order, _, _)| *order);

        let getter = |k: &str| self.get_state(k);
        items
            .into_iter()
            .filter(|(_, conditions, _)| {
                conditions.is_empty() || match_conditions(conditions, &getter, scene_turns)
            })
            .map(|(_, _, text)| text)
            .collect()
    }

    pub fn riddle_total_clues(&self, riddle_id: &str) -> usize {
        self.preset
            .as_ref()
            .and_then(|p| p.riddle_by_id(riddle_id))
            .map(|r| r.clues.len())
            .unwrap_or(0)
    }
}

pub(crate) fn answer_hash(answer: &str) -> String {
    hex::encode(Sha256::digest(answer.as_bytes()))
}

/// Deterministic answer derivation.
///
/// `fixed` takes the configured answer; `numeric` and `word` digest
/// `"{seed_base}:{riddle_id}"` and map the bytes to digits or a wordlist
/// index, so the same chat always regenerates the same answer.
fn generate_answer(riddle: &Riddle, chat_name: &str) -> Option<String> {
    match riddle.kind {
        RiddleKind::Fixed => riddle.answer.clone(),
        RiddleKind::Numeric | RiddleKind::Word => {
            let seed_base = match riddle.seed_from.as_deref() {
                None | Some("chat_name") => chat_name,
                Some(other) => other,
            };
            let digest = Sha256::digest(format!("{seed_base}:{}", riddle.id).as_bytes());

            if riddle.kind == RiddleKind::Numeric {
                let answer: String = digest
                    .iter()
                    .take(riddle.digits)
                    .map(|b| char::from(b'0' + b % 10))
                    .collect();
                Some(answer)
            } else {
                if riddle.wordlist.is_empty() {
                    return None;
                }
                let idx = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
                    as usize
                    % riddle.wordlist.len();
                Some(riddle.wordlist[idx].clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn riddle(kind: RiddleKind) -> Riddle {
        serde_json::from_value(serde_json::json!({
            "id": "R1",
            "type": match kind {
                RiddleKind::Fixed => "fixed",
                RiddleKind::Numeric => "numeric",
                RiddleKind::Word => "word",
            },
            "answer": "sphinx",
            "digits": 4,
            "wordlist": ["ALPHA", "BETA", "GAMMA"]
        }))
        .unwrap()
    }

    #[test]
    fn numeric_answer_is_deterministic_per_chat() {
        let r = riddle(RiddleKind::Numeric);
        let a = generate_answer(&r, "story").unwrap();
        let b = generate_answer(&r, "story").unwrap();
        let other = generate_answer(&r, "different_chat").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 4);
        assert!(a.chars().all(|c| c.is_ascii_digit()));
        assert_ne!(a, other);
    }

    #[test]
    fn word_answer_comes_from_wordlist() {
        let r = riddle(RiddleKind::Word);
        let a = generate_answer(&r, "story").unwrap();
        assert!(["ALPHA", "BETA", "GAMMA"].contains(&a.as_str()));
    }

    #[test]
    fn fixed_answer_is_config() {
        let r = riddle(RiddleKind::Fixed);
        assert_eq!(generate_answer(&r, "story").unwrap(), "sphinx");
    }
}
