//! Foreground save-and-restore and ephemeral isolation, end to end.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sapphire_agent::prompt::PromptBuilder;
use sapphire_agent::provider::{ChatRequest, LlmProvider, ProviderError, StreamEvent};
use sapphire_agent::ChatOrchestrator;
use sapphire_continuity::{ContinuityExecutor, ContinuityScheduler, TaskStore};
use sapphire_core::config::LlmConfig;
use sapphire_core::types::Role;
use sapphire_events::{EventBus, EventKind};
use sapphire_sessions::SessionManager;
use sapphire_state::StateStore;
use sapphire_store::{PromptStore, SettingsStore, SpiceStore};
use sapphire_tools::{builtin, PrivacyGate, ToolRegistry};
use tokio_util::sync::CancellationToken;

struct EchoProvider {
    replies: Mutex<Vec<String>>,
}

impl EchoProvider {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
        }
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    fn name(&self) -> &str {
        "echo"
    }

    async fn send_stream(
        &self,
        _req: &ChatRequest,
        tx: tokio::sync::mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                "done".to_string()
            } else {
                replies.remove(0)
            }
        };
        let _ = tx.send(StreamEvent::TextDelta { text: reply }).await;
        let _ = tx
            .send(StreamEvent::Done {
                stop_reason: "stop".to_string(),
                ephemeral: false,
            })
            .await;
        Ok(())
    }
}

struct Stack {
    _dir: tempfile::TempDir,
    sessions: Arc<SessionManager>,
    scheduler: Arc<ContinuityScheduler>,
    bus: EventBus,
}

fn stack(replies: &[&str]) -> Stack {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path();

    let sessions = Arc::new(SessionManager::open(data.join("chats")).unwrap());
    let settings = Arc::new(
        SettingsStore::open(data.join("settings.json"), serde_json::Map::new()).unwrap(),
    );
    let gate = Arc::new(PrivacyGate::new(settings));
    let (catalog, modules) = builtin::build_tools(data, gate);
    let registry = Arc::new(ToolRegistry::new(
        catalog,
        modules,
        data.join("custom_toolsets.json"),
    ));
    let states = Arc::new(
        StateStore::open(&data.join("state.db"), data.join("state_presets")).unwrap(),
    );
    let prompts = Arc::new(PromptStore::open(data.join("prompts")));
    let spices = Arc::new(SpiceStore::open(data.join("spice_sets.json")));
    let bus = EventBus::new(100);

    let orchestrator = Arc::new(ChatOrchestrator::new(
        Arc::new(EchoProvider::new(replies)),
        Arc::clone(&sessions),
        Arc::clone(&registry),
        Arc::clone(&states),
        PromptBuilder::new(Arc::clone(&prompts), spices, Arc::clone(&states)),
        bus.clone(),
        LlmConfig::default(),
    ));

    let executor = Arc::new(ContinuityExecutor::new(
        orchestrator,
        Arc::clone(&sessions),
        registry,
        prompts,
        bus.clone(),
        CancellationToken::new(),
    ));
    let store = Arc::new(TaskStore::open(data.join("continuity")).unwrap());
    let scheduler = Arc::new(ContinuityScheduler::new(store, executor, bus.clone()));

    Stack {
        _dir: dir,
        sessions,
        scheduler,
        bus,
    }
}

#[tokio::test]
async fn foreground_run_restores_active_chat() {
    // S5: run a diary task from the default chat; the pair lands in diary
    // and default is active again afterwards.
    let stack = stack(&["Dear diary, logged."]);
    let mut sub = stack.bus.subscribe(false);

    let task = stack
        .scheduler
        .store()
        .create(serde_json::json!({
            "name": "diary log",
            "schedule": "0 21 * * *",
            "chat_target": "diary",
            "initial_message": "log",
            "iterations": 1,
            "cooldown_minutes": 0
        }))
        .unwrap();

    assert_eq!(stack.sessions.active_chat_name().as_str(), "default");
    let result = stack.scheduler.run_task_now(&task.id).await.unwrap();
    assert!(result.success, "{:?}", result.errors);

    // Invariant 7: the active chat is what it was before the run.
    assert_eq!(stack.sessions.active_chat_name().as_str(), "default");

    // One message pair in diary.
    stack.sessions.set_active_chat("diary").unwrap();
    let messages = stack.sessions.get_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[0].content, "log");
    assert_eq!(messages[1].content, "Dear diary, logged.");

    // Event sequence includes the continuity brackets, the turn events, and
    // a final chat-switched back to default.
    let events: Vec<_> = std::iter::from_fn(|| sub.try_recv()).collect();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::ContinuityTaskStarting));
    assert!(kinds.contains(&EventKind::AiTypingStart));
    assert!(kinds.contains(&EventKind::AiTypingEnd));
    assert!(kinds.contains(&EventKind::MessageAdded));
    assert!(kinds.contains(&EventKind::ContinuityTaskComplete));

    let last_switch = events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::ChatSwitched)
        .unwrap();
    assert_eq!(last_switch.data["chat"], "default");
}

#[tokio::test]
async fn foreground_applies_task_settings_to_target_chat() {
    let stack = stack(&["ok"]);
    let task = stack
        .scheduler
        .store()
        .create(serde_json::json!({
            "name": "styled",
            "schedule": "0 9 * * *",
            "chat_target": "styled_chat",
            "prompt": "storyteller",
            "toolset": "time_date",
            "model": "special-model",
            "cooldown_minutes": 0
        }))
        .unwrap();

    stack.scheduler.run_task_now(&task.id).await.unwrap();

    let settings = stack.sessions.get_chat_settings_for("styled_chat").unwrap();
    assert_eq!(settings.prompt, "storyteller");
    assert_eq!(settings.toolset, "time_date");
    assert_eq!(settings.model, "special-model");
}

#[tokio::test]
async fn ephemeral_run_leaves_sessions_untouched() {
    let stack = stack(&["invisible answer"]);
    let task = stack
        .scheduler
        .store()
        .create(serde_json::json!({
            "name": "background muse",
            "schedule": "0 9 * * *",
            "chat_target": "",
            "initial_message": "think",
            "iterations": 2,
            "cooldown_minutes": 0
        }))
        .unwrap();

    let result = stack.scheduler.run_task_now(&task.id).await.unwrap();
    assert!(result.success);
    assert_eq!(result.responses.len(), 2);
    assert_eq!(result.responses[1].input, "[continue]");

    // Nothing persisted anywhere.
    assert_eq!(stack.sessions.get_messages().len(), 0);
    assert_eq!(stack.sessions.list_chat_files(), vec!["default".to_string()]);
}

#[tokio::test]
async fn run_now_logs_manual_activity() {
    let stack = stack(&["ok"]);
    let task = stack
        .scheduler
        .store()
        .create(serde_json::json!({
            "name": "manual",
            "schedule": "0 9 * * *",
            "cooldown_minutes": 0
        }))
        .unwrap();

    stack.scheduler.run_task_now(&task.id).await.unwrap();

    let activity = stack.scheduler.activity(10);
    assert!(activity.len() >= 2);
    assert_eq!(activity[0].details["manual"], true);
    assert!(stack.scheduler.store().get(&task.id).unwrap().last_run.is_some());
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let stack = stack(&[]);
    assert!(stack.scheduler.run_task_now("missing").await.is_err());
}
