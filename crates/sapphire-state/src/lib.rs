//! Per-chat typed state with full change history.
//!
//! Enables games, simulations, and interactive stories where the AI reads and
//! writes state through tools. SQLite (WAL) holds the current table and an
//! append-only log; an in-memory cache per live engine stays coherent with
//! the DB under one lock. Presets add constraint validation, progressive
//! prompt segments, choices, riddles, and room navigation.

mod conditions;
mod db;
mod engine;
mod error;
pub mod features;
mod preset;
mod prompts;
mod store;
pub mod tools;
mod validation;

pub use engine::{LogRow, SetOutcome, StateEngine};
pub use error::{Result, StateError};
pub use preset::{GameType, Preset, ProgressiveConfig, ProgressiveMode};
pub use store::StateStore;
pub use types::{ChangedBy, StateEntry};

mod types {
    use serde::{Deserialize, Serialize};
    use std::fmt;

    /// Who performed a state write. AI writes are subject to system-key and
    /// feature routing rules; system and user-edit writes are not.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(rename_all = "kebab-case")]
    pub enum ChangedBy {
        Ai,
        System,
        UserEdit,
    }

    impl fmt::Display for ChangedBy {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            match self {
                ChangedBy::Ai => write!(f, "ai"),
                ChangedBy::System => write!(f, "system"),
                ChangedBy::UserEdit => write!(f, "user-edit"),
            }
        }
    }

    impl std::str::FromStr for ChangedBy {
        type Err = String;

        fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
            match s {
                "ai" => Ok(ChangedBy::Ai),
                "system" => Ok(ChangedBy::System),
                "user-edit" => Ok(ChangedBy::UserEdit),
                other => Err(format!("unknown changed_by: {other}")),
            }
        }
    }

    /// One cached state key: value plus metadata.
    #[derive(Debug, Clone)]
    pub struct StateEntry {
        pub value: serde_json::Value,
        pub value_type: String,
        pub label: Option<String>,
        pub constraints: Option<serde_json::Value>,
        pub turn: u64,
    }
}
