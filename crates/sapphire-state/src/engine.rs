use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::preset::Preset;
use crate::types::{ChangedBy, StateEntry};
use crate::validation::{infer_type, is_system_key, render, validate_value};

/// Outcome of a state write. Validation failures are results, not errors —
/// they flow back to the model as tool output.
#[derive(Debug, Clone)]
pub struct SetOutcome {
    pub success: bool,
    pub message: String,
}

impl SetOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// One row of the change log.
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogRow {
    pub key: String,
    pub old_value: Option<Value>,
    pub new_value: Value,
    pub changed_by: String,
    pub turn: u64,
    pub timestamp: String,
    pub reason: Option<String>,
}

/// Per-chat state engine.
///
/// The cache mirrors `state_current` for this chat; every mutation updates
/// cache and DB in the same critical section. External mutators must call
/// `reload_from_db` to drop the cache.
pub struct StateEngine {
    pub(crate) chat_name: String,
    pub(crate) conn: Arc<Mutex<Connection>>,
    pub(crate) cache: HashMap<String, StateEntry>,
    pub(crate) preset_name: Option<String>,
    pub(crate) preset: Option<Preset>,
    pub(crate) scene_entered_at: u64,
    pub(crate) presets_dir: PathBuf,
}

impl StateEngine {
    pub fn new(chat_name: &str, conn: Arc<Mutex<Connection>>, presets_dir: PathBuf) -> Self {
        let mut engine = Self {
            chat_name: chat_name.to_string(),
            conn,
            cache: HashMap::new(),
            preset_name: None,
            preset: None,
            scene_entered_at: 0,
            presets_dir,
        };
        engine.load_state();
        engine
    }

    pub fn chat_name(&self) -> &str {
        &self.chat_name
    }

    pub fn preset_name(&self) -> Option<&str> {
        self.preset_name.as_deref()
    }

    pub fn key_count(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    // --- loading -----------------------------------------------------------

    fn load_state(&mut self) {
        let loaded: Result<()> = (|| {
            let conn = self.conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT key, value, value_type, label, constraints, turn_number
                 FROM state_current WHERE chat_name = ?1",
            )?;
            let rows: Vec<(String, String, String, Option<String>, Option<String>, u64)> = stmt
                .query_map([&self.chat_name], |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get::<_, i64>(5)? as u64,
                    ))
                })?
                .filter_map(|r| r.ok())
                .collect();
            drop(stmt);
            drop(conn);

            let mut preset_from_db: Option<String> = None;
            self.cache.clear();
            for (key, value, value_type, label, constraints, turn) in rows {
                let value: Value = serde_json::from_str(&value).unwrap_or(Value::Null);
                if key == "_preset" {
                    preset_from_db = value.as_str().map(String::from);
                    continue;
                }
                if key == "_scene_entered_at" {
                    self.scene_entered_at = value.as_u64().unwrap_or(0);
                    continue;
                }
                let constraints =
                    constraints.and_then(|c| serde_json::from_str::<Value>(&c).ok());
                self.cache.insert(
                    key,
                    StateEntry {
                        value,
                        value_type,
                        label,
                        constraints,
                        turn,
                    },
                );
            }

            if let Some(name) = preset_from_db {
                self.reload_preset_config(&name);
            }
            debug!(
                chat = %self.chat_name,
                keys = self.cache.len(),
                preset = self.preset_name.as_deref().unwrap_or("-"),
                "state loaded"
            );
            Ok(())
        })();

        if let Err(e) = loaded {
            error!(chat = %self.chat_name, "failed to load state: {e}");
            self.cache.clear();
        }
    }

    /// Force reload from the database, clearing all cached state.
    pub fn reload_from_db(&mut self) {
        info!(chat = %self.chat_name, "reloading state from DB");
        self.cache.clear();
        self.preset_name = None;
        self.preset = None;
        self.scene_entered_at = 0;
        self.load_state();
    }

    // --- reads -------------------------------------------------------------

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.cache.get(key).map(|e| e.value.clone())
    }

    pub fn get_entry(&self, key: &str) -> Option<&StateEntry> {
        self.cache.get(key)
    }

    /// State filtered by `visible_from` constraints, `_` keys excluded.
    /// With a turn, the `scene_turns` pseudo-key is synthesized.
    pub fn visible_state(&self, current_turn: Option<u64>) -> serde_json::Map<String, Value> {
        let iterator_value = self.iterator_value_int();
        let mut result = serde_json::Map::new();

        let mut keys: Vec<&String> = self.cache.keys().collect();
        keys.sort();
        for key in keys {
            if is_system_key(key) {
                continue;
            }
            let entry = &self.cache[key];
            if let Some(visible_from) = entry
                .constraints
                .as_ref()
                .and_then(|c| c.get("visible_from"))
                .and_then(|v| v.as_i64())
            {
                if let Some(iter) = iterator_value {
                    if iter < visible_from {
                        continue;
                    }
                }
            }
            result.insert(key.clone(), entry.value.clone());
        }

        if let Some(turn) = current_turn {
            if self.progressive_config().is_some() {
                result.insert("scene_turns".to_string(), Value::from(self.scene_turns(turn)));
            }
        }
        result
    }

    /// Turns spent at the current iterator value.
    pub fn scene_turns(&self, current_turn: u64) -> u64 {
        current_turn.saturating_sub(self.scene_entered_at)
    }

    pub(crate) fn progressive_config(&self) -> Option<&crate::preset::ProgressiveConfig> {
        self.preset.as_ref().and_then(|p| p.progressive_prompt.as_ref())
    }

    pub(crate) fn iterator_key(&self) -> Option<&str> {
        self.progressive_config().and_then(|c| c.iterator.as_deref())
    }

    pub(crate) fn iterator_value(&self) -> Option<Value> {
        self.iterator_key().and_then(|k| self.get_state(k))
    }

    pub(crate) fn iterator_value_int(&self) -> Option<i64> {
        self.iterator_value().and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f as i64))
        })
    }

    // --- writes ------------------------------------------------------------

    /// Validated write with full logging.
    ///
    /// AI writes route choice and riddle keys to their feature handlers and
    /// may not touch system keys. Returns a refusal message rather than an
    /// error for every constraint failure.
    pub fn set_state(
        &mut self,
        key: &str,
        value: Value,
        changed_by: ChangedBy,
        turn_number: u64,
        reason: &str,
    ) -> SetOutcome {
        if changed_by == ChangedBy::Ai && is_system_key(key) {
            return SetOutcome::refused(format!("Cannot modify system key: {key}"));
        }

        // Feature routing for AI writes; the value is still stored below.
        let mut handler_msg: Option<String> = None;
        if changed_by == ChangedBy::Ai {
            if let Some(choice) = self.preset.as_ref().and_then(|p| p.choice_for_key(key)) {
                let choice_id = choice.id.clone();
                let options = choice.option_names();
                let chosen = value.as_str().unwrap_or_default().to_string();
                if !options.iter().any(|o| o == &chosen) {
                    return SetOutcome::refused(format!(
                        "'{chosen}' is not an option for choice '{choice_id}'. Options: {}",
                        options.join(", ")
                    ));
                }
                handler_msg = Some(format!("✓ Choice '{choice_id}' resolved: {chosen}"));
            } else if let Some(riddle) = self.preset.as_ref().and_then(|p| p.riddle_for_key(key)) {
                let riddle_id = riddle.id.clone();
                let answer = render(&value);
                let outcome = self.attempt_riddle(&riddle_id, &answer, turn_number);
                if !outcome.success {
                    return outcome;
                }
                handler_msg = Some(outcome.message);
            }
        }

        let existing = self.cache.get(key).cloned();
        let old_value = existing.as_ref().map(|e| e.value.clone());
        let constraints = existing.as_ref().and_then(|e| e.constraints.clone());
        let value_type = existing
            .as_ref()
            .map(|e| e.value_type.clone())
            .unwrap_or_else(|| infer_type(&value).to_string());
        let label = existing.as_ref().and_then(|e| e.label.clone());

        let getter = |k: &str| self.get_state(k);
        if let Err(msg) = validate_value(key, &value, constraints.as_ref(), &getter) {
            info!(chat = %self.chat_name, key, "state write refused: {msg}");
            return SetOutcome::refused(msg);
        }
        if let Err(msg) = self.check_choice_blockers(key, &value) {
            info!(chat = %self.chat_name, key, "state write blocked: {msg}");
            return SetOutcome::refused(msg);
        }

        if let Err(e) = self.write_row(
            key,
            &value,
            old_value.as_ref(),
            &value_type,
            label.as_deref(),
            constraints.as_ref(),
            changed_by,
            turn_number,
            reason,
        ) {
            error!(chat = %self.chat_name, key, "state write failed: {e}");
            return SetOutcome::refused(format!("Database error: {e}"));
        }

        self.cache.insert(
            key.to_string(),
            StateEntry {
                value: value.clone(),
                value_type,
                label,
                constraints,
                turn: turn_number,
            },
        );
        debug!(chat = %self.chat_name, key, %changed_by, turn = turn_number, "state set");

        // Iterator change resets the scene-turns clock.
        let is_iterator = self.iterator_key() == Some(key);
        if is_iterator && old_value.as_ref() != Some(&value) {
            self.scene_entered_at = turn_number;
            self.persist_system_key("_scene_entered_at", Value::from(turn_number), turn_number);
            info!(chat = %self.chat_name, turn = turn_number, "iterator changed, scene turns reset");
        }

        if let Some(msg) = handler_msg {
            return SetOutcome::ok(msg);
        }

        if existing.is_none() {
            let visible: Vec<String> = self
                .visible_state(None)
                .keys()
                .filter(|k| *k != key)
                .cloned()
                .collect();
            return SetOutcome::ok(format!(
                "⚠️ CREATED NEW KEY '{key}' = {}. Did you mean one of these? [{}]",
                render(&value),
                visible.join(", ")
            ));
        }
        if is_iterator {
            return SetOutcome::ok(format!(
                "✓ Updated {key}: {} → {} (iterator: new content now visible)",
                old_value.as_ref().map(render).unwrap_or_default(),
                render(&value)
            ));
        }
        if old_value.as_ref() == Some(&value) {
            return SetOutcome::ok(format!("✓ {key} unchanged (already {})", render(&value)));
        }
        SetOutcome::ok(format!("✓ Set {key} = {}", render(&value)))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_row(
        &self,
        key: &str,
        value: &Value,
        old_value: Option<&Value>,
        value_type: &str,
        label: Option<&str>,
        constraints: Option<&Value>,
        changed_by: ChangedBy,
        turn_number: u64,
        reason: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO state_log
             (chat_name, key, old_value, new_value, changed_by, turn_number, timestamp, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                self.chat_name,
                key,
                old_value.map(|v| v.to_string()),
                value.to_string(),
                changed_by.to_string(),
                turn_number as i64,
                now,
                (!reason.is_empty()).then_some(reason),
            ],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO state_current
             (chat_name, key, value, value_type, label, constraints, updated_at, updated_by, turn_number)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                self.chat_name,
                key,
                value.to_string(),
                value_type,
                label,
                constraints.map(|c| c.to_string()),
                now,
                changed_by.to_string(),
                turn_number as i64,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Upsert a system key into `state_current` only (not logged).
    pub(crate) fn persist_system_key(&self, key: &str, value: Value, turn_number: u64) {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let result = conn.execute(
            "INSERT OR REPLACE INTO state_current
             (chat_name, key, value, value_type, label, constraints, updated_at, updated_by, turn_number)
             VALUES (?1, ?2, ?3, 'string', ?4, NULL, ?5, 'system', ?6)",
            rusqlite::params![
                self.chat_name,
                key,
                value.to_string(),
                format!("System: {key}"),
                now,
                turn_number as i64,
            ],
        );
        if let Err(e) = result {
            error!(chat = %self.chat_name, key, "failed to persist system key: {e}");
        }
    }

    pub fn delete_key(&mut self, key: &str) -> bool {
        if is_system_key(key) {
            return false;
        }
        let deleted = {
            let conn = self.conn.lock().unwrap();
            conn.execute(
                "DELETE FROM state_current WHERE chat_name = ?1 AND key = ?2",
                rusqlite::params![self.chat_name, key],
            )
        };
        match deleted {
            Ok(_) => {
                self.cache.remove(key);
                debug!(chat = %self.chat_name, key, "state key deleted");
                true
            }
            Err(e) => {
                error!(chat = %self.chat_name, key, "failed to delete key: {e}");
                false
            }
        }
    }

    /// Drop every row and all history for this chat.
    pub fn clear_all(&mut self) -> Result<()> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM state_current WHERE chat_name = ?1",
                [&self.chat_name],
            )?;
            tx.execute(
                "DELETE FROM state_log WHERE chat_name = ?1",
                [&self.chat_name],
            )?;
            tx.commit()?;
        }
        self.cache.clear();
        self.preset_name = None;
        self.preset = None;
        self.scene_entered_at = 0;
        info!(chat = %self.chat_name, "state cleared");
        Ok(())
    }

    // --- rollback ----------------------------------------------------------

    /// Truncate the log to `turn_number <= target` and rebuild
    /// `state_current` by replaying what remains, in log order.
    pub fn rollback_to_turn(&mut self, target_turn: u64) -> Result<()> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM state_log WHERE chat_name = ?1 AND turn_number > ?2",
                rusqlite::params![self.chat_name, target_turn as i64],
            )?;
            tx.execute(
                "DELETE FROM state_current WHERE chat_name = ?1",
                [&self.chat_name],
            )?;

            let rebuilt: Vec<(String, String, String, u64, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT key, new_value, changed_by, turn_number, timestamp
                     FROM state_log WHERE chat_name = ?1 AND turn_number <= ?2
                     ORDER BY id ASC",
                )?;
                let rows: Vec<_> = stmt
                    .query_map(
                        rusqlite::params![self.chat_name, target_turn as i64],
                        |row| {
                            Ok((
                                row.get(0)?,
                                row.get(1)?,
                                row.get(2)?,
                                row.get::<_, i64>(3)? as u64,
                                row.get(4)?,
                            ))
                        },
                    )?
                    .filter_map(|r| r.ok())
                    .collect();
                rows
            };

            // Last write per key wins; replay in order into a map.
            let mut latest: HashMap<String, (String, String, u64, String)> = HashMap::new();
            for (key, new_value, changed_by, turn, timestamp) in rebuilt {
                latest.insert(key, (new_value, changed_by, turn, timestamp));
            }

            for (key, (new_value, changed_by, turn, timestamp)) in &latest {
                let value: Value =
                    serde_json::from_str(new_value).unwrap_or(Value::Null);
                tx.execute(
                    "INSERT INTO state_current
                     (chat_name, key, value, value_type, label, constraints, updated_at, updated_by, turn_number)
                     VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5, ?6, ?7)",
                    rusqlite::params![
                        self.chat_name,
                        key,
                        new_value,
                        infer_type(&value),
                        timestamp,
                        changed_by,
                        *turn as i64,
                    ],
                )?;
            }
            tx.commit()?;
        }

        let preset = self.preset_name.clone();
        self.load_state();
        // Replay loses the preset marker (it is never logged); restore it so
        // constraints and features survive the rollback.
        if let Some(name) = preset {
            self.persist_system_key("_preset", Value::from(name.clone()), target_turn);
            self.reload_preset_config(&name);
        }
        info!(
            chat = %self.chat_name,
            target_turn,
            keys = self.cache.len(),
            "rolled back"
        );
        Ok(())
    }

    // --- history -----------------------------------------------------------

    pub fn history(&self, key: Option<&str>, limit: usize) -> Vec<LogRow> {
        let conn = self.conn.lock().unwrap();
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<LogRow> {
            let old: Option<String> = row.get(1)?;
            let new: String = row.get(2)?;
            Ok(LogRow {
                key: row.get(0)?,
                old_value: old.and_then(|s| serde_json::from_str(&s).ok()),
                new_value: serde_json::from_str(&new).unwrap_or(Value::Null),
                changed_by: row.get(3)?,
                turn: row.get::<_, i64>(4)? as u64,
                timestamp: row.get(5)?,
                reason: row.get(6)?,
            })
        };

        let result = match key {
            Some(key) => conn
                .prepare(
                    "SELECT key, old_value, new_value, changed_by, turn_number, timestamp, reason
                     FROM state_log WHERE chat_name = ?1 AND key = ?2
                     ORDER BY id DESC LIMIT ?3",
                )
                .and_then(|mut stmt| {
                    stmt.query_map(
                        rusqlite::params![self.chat_name, key, limit as i64],
                        map_row,
                    )
                    .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
                }),
            None => conn
                .prepare(
                    "SELECT key, old_value, new_value, changed_by, turn_number, timestamp, reason
                     FROM state_log WHERE chat_name = ?1
                     ORDER BY id DESC LIMIT ?2",
                )
                .and_then(|mut stmt| {
                    stmt.query_map(rusqlite::params![self.chat_name, limit as i64], map_row)
                        .map(|rows| rows.filter_map(|r| r.ok()).collect::<Vec<_>>())
                }),
        };

        result.unwrap_or_else(|e| {
            error!(chat = %self.chat_name, "failed to read history: {e}");
            Vec::new()
        })
    }

    // --- presets -----------------------------------------------------------

    /// Load a preset, clearing existing state and initializing every key.
    pub fn load_preset(&mut self, preset_name: &str, turn_number: u64) -> Result<String> {
        let preset = Preset::load(&self.presets_dir, preset_name)?;

        self.clear_all()?;

        for (key, spec) in preset.initial_state.clone() {
            let value = spec.get("value").cloned().unwrap_or(Value::Null);
            let value_type = spec
                .get("type")
                .and_then(|t| t.as_str())
                .unwrap_or_else(|| infer_type(&value))
                .to_string();
            let label = spec
                .get("label")
                .and_then(|l| l.as_str())
                .map(String::from);
            let constraints = spec_constraints(&spec);

            self.write_row(
                &key,
                &value,
                None,
                &value_type,
                label.as_deref(),
                constraints.as_ref(),
                ChangedBy::System,
                turn_number,
                &format!("Preset: {preset_name}"),
            )?;
            self.cache.insert(
                key,
                StateEntry {
                    value,
                    value_type,
                    label,
                    constraints,
                    turn: turn_number,
                },
            );
        }

        self.persist_system_key("_preset", Value::from(preset_name), turn_number);
        self.preset_name = Some(preset_name.to_string());
        self.preset = Some(preset);

        self.scene_entered_at = turn_number;
        self.persist_system_key("_scene_entered_at", Value::from(turn_number), turn_number);

        self.initialize_riddles(turn_number);

        info!(
            chat = %self.chat_name,
            preset = preset_name,
            keys = self.cache.len(),
            game_type = self.preset.as_ref().map(|p| p.game_type().name()).unwrap_or("linear"),
            "preset loaded"
        );
        Ok(format!("Loaded preset: {preset_name}"))
    }

    /// Reload the preset's config (segments, features, constraints) without
    /// resetting any state values.
    pub fn reload_preset_config(&mut self, preset_name: &str) -> bool {
        let preset = match Preset::load(&self.presets_dir, preset_name) {
            Ok(p) => p,
            Err(e) => {
                warn!(preset = preset_name, "preset config reload failed: {e}");
                return false;
            }
        };

        // Refresh constraints on keys that still exist.
        for (key, spec) in &preset.initial_state {
            if let Some(entry) = self.cache.get_mut(key) {
                entry.constraints = spec_constraints(spec);
                if entry.label.is_none() {
                    entry.label = spec.get("label").and_then(|l| l.as_str()).map(String::from);
                }
            }
        }

        self.preset_name = Some(preset_name.to_string());
        self.preset = Some(preset);
        self.ensure_riddles_initialized();
        true
    }
}

/// Everything in an `initial_state` spec besides value/type/label is a
/// constraint field.
fn spec_constraints(spec: &Value) -> Option<Value> {
    let obj = spec.as_object()?;
    let constraints: serde_json::Map<String, Value> = obj
        .iter()
        .filter(|(k, _)| !matches!(k.as_str(), "value" | "type" | "label"))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    if constraints.is_empty() {
        None
    } else {
        Some(Value::Object(constraints))
    }
}
