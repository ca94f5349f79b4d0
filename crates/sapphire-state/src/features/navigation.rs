use serde_json::Value;

use crate::engine::{SetOutcome, StateEngine};
use crate::types::ChangedBy;

/// Short forms accepted by `move`.
pub const DIRECTION_ALIASES: &[(&str, &str)] = &[
    ("n", "north"),
    ("s", "south"),
    ("e", "east"),
    ("w", "west"),
    ("u", "up"),
    ("d", "down"),
    ("ne", "northeast"),
    ("nw", "northwest"),
    ("se", "southeast"),
    ("sw", "southwest"),
];

impl StateEngine {
    pub fn navigation_enabled(&self) -> bool {
        self.preset
            .as_ref()
            .and_then(|p| p.navigation())
            .is_some()
    }

    pub fn current_room(&self) -> Option<String> {
        let nav = self.preset.as_ref()?.navigation()?;
        self.get_state(&nav.position_key)
            .and_then(|v| v.as_str().map(String::from))
    }

    /// Exit directions from the current room.
    pub fn available_exits(&self) -> Vec<String> {
        let Some(nav) = self.preset.as_ref().and_then(|p| p.navigation()) else {
            return Vec::new();
        };
        let Some(room) = self.current_room() else {
            return Vec::new();
        };
        let mut exits: Vec<String> = nav
            .connections
            .get(&room)
            .map(|m| m.keys().filter(|d| !d.starts_with('_')).cloned().collect())
            .unwrap_or_default();
        exits.sort();
        exits
    }

    /// Exits with destination names; unvisited destinations show as `???`.
    pub fn exits_with_descriptions(&self) -> Vec<String> {
        let Some(nav) = self.preset.as_ref().and_then(|p| p.navigation()) else {
            return Vec::new();
        };
        let Some(room) = self.current_room() else {
            return Vec::new();
        };
        let visited: Vec<String> = self
            .get_state("_visited_rooms")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();

        let mut exits: Vec<String> = nav
            .connections
            .get(&room)
            .map(|m| {
                m.iter()
                    .filter(|(d, _)| !d.starts_with('_'))
                    .map(|(direction, destination)| {
                        if visited.contains(destination) {
                            let name = nav
                                .room_names
                                .get(destination)
                                .cloned()
                                .unwrap_or_else(|| destination.clone());
                            format!("{}: {}", direction.to_uppercase(), name)
                        } else {
                            format!("{}: ???", direction.to_uppercase())
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        exits.sort();
        exits
    }

    /// Resolve a direction (with alias expansion both ways) to a destination
    /// room, or an error message listing the current exits.
    pub fn resolve_direction(&self, direction: &str) -> std::result::Result<String, String> {
        let Some(nav) = self.preset.as_ref().and_then(|p| p.navigation()) else {
            return Err("Navigation not configured for this preset".to_string());
        };
        let Some(room) = self.current_room() else {
            return Err(format!(
                "Current position unknown ({} not set)",
                nav.position_key
            ));
        };
        let Some(exits) = nav.connections.get(&room) else {
            return Err(format!("No exits defined for '{room}'"));
        };

        let wanted = direction.trim().to_lowercase();

        if let Some(dest) = exits.get(&wanted) {
            return Ok(dest.clone());
        }
        // Expand alias: n → north.
        if let Some((_, full)) = DIRECTION_ALIASES.iter().find(|(short, _)| *short == wanted) {
            if let Some(dest) = exits.get(*full) {
                return Ok(dest.clone());
            }
        }
        // Contract to alias: north → n.
        if let Some((short, _)) = DIRECTION_ALIASES.iter().find(|(_, full)| *full == wanted) {
            if let Some(dest) = exits.get(*short) {
                return Ok(dest.clone());
            }
        }

        Err(format!(
            "Can't go {direction}. Exits: {}",
            self.exits_with_descriptions().join(", ")
        ))
    }

    /// Move in a direction. The position write goes through `set_state` so
    /// blockers apply uniformly; visited rooms are tracked for fog-of-war.
    pub fn move_direction(
        &mut self,
        direction: &str,
        turn_number: u64,
        reason: &str,
    ) -> SetOutcome {
        if !self.navigation_enabled() {
            return SetOutcome::refused("Navigation not configured. Use set_state() instead.");
        }

        let destination = match self.resolve_direction(direction) {
            Ok(d) => d,
            Err(msg) => return SetOutcome::refused(msg),
        };

        let Some((position_key, dest_name)) =
            self.preset.as_ref().and_then(|p| p.navigation()).map(|nav| {
                (
                    nav.position_key.clone(),
                    nav.room_names
                        .get(&destination)
                        .cloned()
                        .unwrap_or_else(|| destination.clone()),
                )
            })
        else {
            return SetOutcome::refused("Navigation not configured. Use set_state() instead.");
        };

        let reason = if reason.is_empty() {
            format!("moved {direction}")
        } else {
            reason.to_string()
        };
        let outcome = self.set_state(
            &position_key,
            Value::String(destination.clone()),
            ChangedBy::Ai,
            turn_number,
            &reason,
        );
        if !outcome.success {
            return outcome;
        }

        let mut visited: Vec<String> = self
            .get_state("_visited_rooms")
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default();
        if !visited.contains(&destination) {
            visited.push(destination);
            self.set_state(
                "_visited_rooms",
                serde_json::to_value(&visited).unwrap_or(Value::Null),
                ChangedBy::System,
                turn_number,
                "room visited",
            );
        }

        let exits = self.exits_with_descriptions();
        let exits_str = if exits.is_empty() {
            String::new()
        } else {
            format!("\nExits: {}", exits.join(", "))
        };
        SetOutcome::ok(format!("✓ Moved to {dest_name}{exits_str}"))
    }
}
