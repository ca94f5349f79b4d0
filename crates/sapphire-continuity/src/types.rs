use sapphire_events::EventKind;
use serde::{Deserialize, Serialize};

/// A scheduled continuity task.
///
/// `chat_target` empty means ephemeral (no chat, no UI impact); a name means
/// foreground execution inside that chat with full persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_schedule")]
    pub schedule: String,
    /// Fire probability 1–100; rolled once per fire and once per iteration.
    #[serde(default = "default_chance")]
    pub chance: u32,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_toolset")]
    pub toolset: String,
    #[serde(default)]
    pub chat_target: String,
    #[serde(default = "default_initial_message")]
    pub initial_message: String,
    #[serde(default = "bool_true")]
    pub tts_enabled: bool,
    #[serde(default)]
    pub inject_datetime: bool,
    #[serde(default = "default_memory_scope")]
    pub memory_scope: String,
    /// Minutes between fires and between iterations. 0 disables the cooldown.
    #[serde(default = "default_cooldown")]
    pub cooldown_minutes: u64,
    #[serde(default)]
    pub last_run: Option<String>,
    #[serde(default)]
    pub created: String,
}

fn default_name() -> String {
    "Unnamed Task".to_string()
}
fn default_schedule() -> String {
    "0 9 * * *".to_string()
}
fn default_chance() -> u32 {
    100
}
fn default_iterations() -> u32 {
    1
}
fn default_provider() -> String {
    "auto".to_string()
}
fn default_prompt() -> String {
    "default".to_string()
}
fn default_toolset() -> String {
    "none".to_string()
}
fn default_initial_message() -> String {
    "Hello.".to_string()
}
fn default_memory_scope() -> String {
    "default".to_string()
}
fn default_cooldown() -> u64 {
    1
}
fn bool_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Started,
    Complete,
    Skipped,
    Error,
}

impl ActivityStatus {
    pub fn event_kind(&self) -> EventKind {
        match self {
            ActivityStatus::Started => EventKind::ContinuityTaskStarting,
            ActivityStatus::Complete => EventKind::ContinuityTaskComplete,
            ActivityStatus::Skipped => EventKind::ContinuityTaskSkipped,
            ActivityStatus::Error => EventKind::ContinuityTaskError,
        }
    }
}

/// One entry of the persisted activity ring (last 50 kept).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub timestamp: String,
    pub task_id: String,
    pub task_name: String,
    pub status: ActivityStatus,
    #[serde(default)]
    pub details: serde_json::Value,
}
