use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use sapphire_agent::ChatOrchestrator;
use sapphire_core::types::PromptMode;
use sapphire_events::{EventBus, EventKind};
use sapphire_sessions::SessionManager;
use sapphire_store::PromptStore;
use sapphire_tools::ToolRegistry;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::types::Task;

/// Result of one task execution, logged into the activity ring and returned
/// from manual runs.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    pub task_id: String,
    pub task_name: String,
    pub started_at: String,
    pub completed_at: String,
    pub responses: Vec<IterationResponse>,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationResponse {
    pub iteration: u32,
    pub input: String,
    pub output: String,
}

/// Executes continuity tasks with context isolation.
///
/// Ephemeral mode talks to the provider directly and never touches session
/// state. Foreground mode switches the active chat, applies the task's
/// settings, runs through the ordinary chat pipeline, and always restores
/// the previously active chat afterwards.
pub struct ContinuityExecutor {
    orchestrator: Arc<ChatOrchestrator>,
    sessions: Arc<SessionManager>,
    registry: Arc<ToolRegistry>,
    prompts: Arc<PromptStore>,
    bus: EventBus,
    shutdown: CancellationToken,
}

impl ContinuityExecutor {
    pub fn new(
        orchestrator: Arc<ChatOrchestrator>,
        sessions: Arc<SessionManager>,
        registry: Arc<ToolRegistry>,
        prompts: Arc<PromptStore>,
        bus: EventBus,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            sessions,
            registry,
            prompts,
            bus,
            shutdown,
        }
    }

    pub async fn run(&self, task: &Task) -> RunResult {
        let mut result = RunResult {
            success: false,
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            started_at: chrono::Local::now().to_rfc3339(),
            completed_at: String::new(),
            responses: Vec::new(),
            errors: Vec::new(),
        };

        if task.chat_target.trim().is_empty() {
            self.run_ephemeral(task, &mut result).await;
        } else {
            self.run_foreground(task, &mut result).await;
        }

        result.success = result.errors.is_empty();
        result.completed_at = chrono::Local::now().to_rfc3339();
        result
    }

    /// Isolated execution: a private message list, no session mutation, no
    /// chat-affecting events.
    async fn run_ephemeral(&self, task: &Task, result: &mut RunResult) {
        info!(task = %task.name, "running continuity task in ephemeral mode");

        let mut system = self
            .prompts
            .get(&task.prompt)
            .or_else(|| self.prompts.get("default"))
            .unwrap_or_default();
        if task.inject_datetime {
            system.push_str(&format!(
                "\n\nCurrent date and time: {}",
                chrono::Local::now().format("%A, %B %-d, %Y %-I:%M %p")
            ));
        }

        let mut wire: Vec<serde_json::Value> = Vec::new();
        for i in 0..task.iterations.max(1) {
            if i > 0 && !self.sleep_cooldown(task).await {
                return;
            }
            if !self.chance_passes(task, i, result) {
                continue;
            }

            let input = if i == 0 {
                task.initial_message.clone()
            } else {
                "[continue]".to_string()
            };
            wire.push(json!({"role": "user", "content": input}));

            match self
                .orchestrator
                .isolated_completion(&system, wire.clone(), Some(&task.model))
                .await
            {
                Ok(output) => {
                    wire.push(json!({"role": "assistant", "content": output}));
                    result.responses.push(IterationResponse {
                        iteration: i + 1,
                        input,
                        output: truncate(&output, 500),
                    });
                }
                Err(e) => {
                    let message = format!("Iteration {} failed: {e}", i + 1);
                    error!(task = %task.name, "{message}");
                    result.errors.push(message);
                }
            }
        }
    }

    /// Foreground execution: save the active chat, switch to the target
    /// (creating it if needed), apply task settings, run iterations through
    /// the full pipeline, and restore the original chat no matter what.
    async fn run_foreground(&self, task: &Task, result: &mut RunResult) {
        let original_chat = self.sessions.active_chat_name();
        info!(
            task = %task.name,
            target = %task.chat_target,
            "running continuity task in foreground mode"
        );

        self.foreground_inner(task, result).await;

        // Guaranteed restore, success or failure.
        if self.sessions.active_chat_name() != original_chat {
            match self.sessions.set_active_chat(original_chat.as_str()) {
                Ok(_) => {
                    debug!(chat = %original_chat, "restored chat context");
                    self.bus.publish(
                        EventKind::ChatSwitched,
                        json!({"chat": original_chat.as_str()}),
                    );
                }
                Err(e) => {
                    error!("failed to restore chat context: {e}");
                    result.errors.push(format!("Context restore failed: {e}"));
                }
            }
        }
    }

    async fn foreground_inner(&self, task: &Task, result: &mut RunResult) {
        // Resolve case-insensitively (names sanitize to lowercase); create
        // the chat when absent.
        let target = task.chat_target.trim();
        let resolved = match self.sessions.set_active_chat(target) {
            Ok(name) => name,
            Err(_) => {
                let created = match self.sessions.create_chat(target) {
                    Ok(name) => name,
                    Err(e) => {
                        result.errors.push(format!("Failed to create chat: {e}"));
                        return;
                    }
                };
                info!(chat = %created, "created continuity target chat");
                match self.sessions.set_active_chat(created.as_str()) {
                    Ok(name) => name,
                    Err(e) => {
                        result.errors.push(format!("Failed to switch chat: {e}"));
                        return;
                    }
                }
            }
        };

        self.apply_task_settings(task);
        self.bus
            .publish(EventKind::ChatSwitched, json!({"chat": resolved.as_str()}));

        for i in 0..task.iterations.max(1) {
            if i > 0 && !self.sleep_cooldown(task).await {
                return;
            }
            if !self.chance_passes(task, i, result) {
                continue;
            }

            let input = if i == 0 {
                task.initial_message.clone()
            } else {
                "[continue]".to_string()
            };
            match self.orchestrator.chat(&input).await {
                Ok(output) => result.responses.push(IterationResponse {
                    iteration: i + 1,
                    input,
                    output: truncate(&output, 500),
                }),
                Err(e) => {
                    let message = format!("Iteration {} failed: {e}", i + 1);
                    error!(task = %task.name, "{message}");
                    result.errors.push(message);
                }
            }
        }
    }

    /// Apply the task's prompt/toolset/provider/model/memory/datetime to the
    /// now-active chat and the live tool registry.
    fn apply_task_settings(&self, task: &Task) {
        let mut delta = serde_json::Map::new();
        if !task.prompt.is_empty() {
            delta.insert("prompt".into(), json!(task.prompt));
            self.prompts.set_active_name(&task.prompt);
        }
        if !task.toolset.is_empty() {
            delta.insert("toolset".into(), json!(task.toolset));
            if let Err(e) = self
                .registry
                .update_enabled_functions(&[task.toolset.clone()], PromptMode::Monolith)
            {
                warn!("failed to apply task toolset: {e}");
            }
        }
        if !task.provider.is_empty() && task.provider != "auto" {
            delta.insert("provider".into(), json!(task.provider));
        }
        if !task.model.is_empty() {
            delta.insert("model".into(), json!(task.model));
        }
        if !task.memory_scope.is_empty() {
            delta.insert("memory_scope".into(), json!(task.memory_scope));
        }
        if task.inject_datetime {
            delta.insert("inject_datetime".into(), json!(true));
        }

        if !delta.is_empty() {
            if let Err(e) = self.sessions.update_chat_settings(&delta) {
                warn!("failed to apply task settings: {e}");
            } else {
                debug!(task = %task.name, "applied task settings");
            }
        }
    }

    /// Per-iteration chance roll (1..=100 against the task's threshold).
    fn chance_passes(&self, task: &Task, iteration: u32, result: &mut RunResult) -> bool {
        if task.chance >= 100 {
            return true;
        }
        let roll = rand::thread_rng().gen_range(1..=100);
        if roll > task.chance {
            info!(
                task = %task.name,
                iteration = iteration + 1,
                roll,
                threshold = task.chance,
                "iteration skipped by chance roll"
            );
            result.responses.push(IterationResponse {
                iteration: iteration + 1,
                input: String::new(),
                output: format!("(skipped: roll {roll} > {}%)", task.chance),
            });
            return false;
        }
        true
    }

    /// Inter-iteration cooldown, responsive to shutdown. Returns false when
    /// shutdown fired mid-sleep.
    async fn sleep_cooldown(&self, task: &Task) -> bool {
        let secs = task.cooldown_minutes * 60;
        if secs == 0 {
            return true;
        }
        info!(task = %task.name, secs, "iteration cooldown");
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => true,
            _ = self.shutdown.cancelled() => false,
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        s[..end].to_string()
    }
}
