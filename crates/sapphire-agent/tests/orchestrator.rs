//! Full-pipeline tests with a scripted provider standing in for the LLM.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sapphire_agent::orchestrator::{ChatOrchestrator, TurnEvent};
use sapphire_agent::prompt::PromptBuilder;
use sapphire_agent::provider::{ChatRequest, LlmProvider, ProviderError, StreamEvent};
use sapphire_core::config::LlmConfig;
use sapphire_core::types::{PromptMode, Role};
use sapphire_events::{EventBus, EventKind};
use sapphire_sessions::SessionManager;
use sapphire_state::StateStore;
use sapphire_store::{PromptStore, SettingsStore, SpiceStore};
use sapphire_tools::{builtin, PrivacyGate, ToolRegistry};
use tokio::sync::mpsc;

/// Plays back a fixed script of rounds; each round is a list of events.
struct ScriptedProvider {
    rounds: Mutex<Vec<Vec<StreamEvent>>>,
    /// When set, the provider stalls after the first chunk of each round.
    stall: bool,
}

impl ScriptedProvider {
    fn new(rounds: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            rounds: Mutex::new(rounds),
            stall: false,
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send_stream(
        &self,
        _req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let round = {
            let mut rounds = self.rounds.lock().unwrap();
            if rounds.is_empty() {
                Vec::new()
            } else {
                rounds.remove(0)
            }
        };
        let mut sent = 0;
        for event in round {
            let _ = tx.send(event).await;
            sent += 1;
            if self.stall && sent == 1 {
                tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            }
        }
        Ok(())
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    orchestrator: ChatOrchestrator,
    sessions: Arc<SessionManager>,
    states: Arc<StateStore>,
    bus: EventBus,
}

fn fixture(provider: ScriptedProvider) -> Fixture {
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
    registry
        .update_enabled_functions(&["time_date".to_string()], PromptMode::Monolith)
        .unwrap();

    let states = Arc::new(
        StateStore::open(&data.join("state.db"), data.join("state_presets")).unwrap(),
    );
    let prompts = Arc::new(PromptStore::open(data.join("prompts")));
    let spices = Arc::new(SpiceStore::open(data.join("spice_sets.json")));
    let builder = PromptBuilder::new(prompts, spices, Arc::clone(&states));
    let bus = EventBus::new(50);

    let orchestrator = ChatOrchestrator::new(
        Arc::new(provider),
        Arc::clone(&sessions),
        registry,
        Arc::clone(&states),
        builder,
        bus.clone(),
        LlmConfig::default(),
    );

    Fixture {
        _dir: dir,
        orchestrator,
        sessions,
        states,
        bus,
    }
}

fn tool_call(id: &str, name: &str, arguments: &str) -> StreamEvent {
    StreamEvent::ToolCall {
        id: id.to_string(),
        name: name.to_string(),
        arguments: arguments.to_string(),
    }
}

fn text(t: &str) -> StreamEvent {
    StreamEvent::TextDelta {
        text: t.to_string(),
    }
}

fn done() -> StreamEvent {
    StreamEvent::Done {
        stop_reason: "stop".to_string(),
        ephemeral: false,
    }
}

async fn run_turn(fx: &Fixture, text_in: &str) -> Vec<TurnEvent> {
    let (tx, mut rx) = mpsc::channel(64);
    fx.orchestrator
        .stream_turn(text_in.to_string(), None, false, tx)
        .await;
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn basic_tool_round_trip() {
    // S1: one time_date call, then a final message echoing the result.
    let provider = ScriptedProvider::new(vec![
        vec![tool_call("tc_1", "time_date", r#"{"query": "time"}"#), done()],
        vec![text("It's "), text("3:05 PM."), done()],
    ]);
    let fx = fixture(provider);
    let mut sub = fx.bus.subscribe(false);

    let events = run_turn(&fx, "what time is it").await;

    let chunks: String = events
        .iter()
        .filter_map(|e| match e {
            TurnEvent::Chunk(c) => Some(c.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, "It's 3:05 PM.");
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Done { ephemeral: false })
    ));

    let messages = fx.sessions.get_messages();
    assert_eq!(messages.len(), 4); // user, assistant+call, tool, assistant
    assert_eq!(messages[0].role, Role::User);
    assert_eq!(messages[1].tool_calls.len(), 1);
    assert_eq!(messages[2].role, Role::Tool);
    assert!(messages[2].content.starts_with("It's "));
    assert_eq!(messages[3].content, "It's 3:05 PM.");

    // Exactly one final assistant message (no tool calls) was persisted.
    let finals = messages
        .iter()
        .filter(|m| m.role == Role::Assistant && m.tool_calls.is_empty())
        .count();
    assert_eq!(finals, 1);

    let kinds: Vec<EventKind> = std::iter::from_fn(|| sub.try_recv()).map(|e| e.kind).collect();
    let order: Vec<EventKind> = kinds
        .into_iter()
        .filter(|k| {
            matches!(
                k,
                EventKind::AiTypingStart | EventKind::AiTypingEnd | EventKind::MessageAdded
            )
        })
        .collect();
    assert_eq!(
        order,
        vec![
            EventKind::AiTypingStart,
            EventKind::AiTypingEnd,
            EventKind::MessageAdded
        ]
    );
}

#[tokio::test]
async fn tool_events_bracket_execution() {
    let provider = ScriptedProvider::new(vec![
        vec![tool_call("tc_1", "time_date", "{}"), done()],
        vec![text("done"), done()],
    ]);
    let fx = fixture(provider);
    let mut sub = fx.bus.subscribe(false);

    run_turn(&fx, "time?").await;

    let kinds: Vec<EventKind> = std::iter::from_fn(|| sub.try_recv()).map(|e| e.kind).collect();
    let executing = kinds
        .iter()
        .position(|k| *k == EventKind::ToolExecuting)
        .unwrap();
    let complete = kinds
        .iter()
        .position(|k| *k == EventKind::ToolComplete)
        .unwrap();
    assert!(executing < complete);
}

#[tokio::test]
async fn unknown_tool_yields_error_result_and_continues() {
    let provider = ScriptedProvider::new(vec![
        vec![tool_call("tc_1", "definitely_not_a_tool", "{}"), done()],
        vec![text("recovered"), done()],
    ]);
    let fx = fixture(provider);

    let events = run_turn(&fx, "go").await;
    assert!(matches!(events.last(), Some(TurnEvent::Done { .. })));

    let messages = fx.sessions.get_messages();
    let tool_msg = messages.iter().find(|m| m.role == Role::Tool).unwrap();
    assert!(tool_msg.content.contains("unknown tool"));
}

#[tokio::test]
async fn ephemeral_response_is_not_persisted() {
    let provider = ScriptedProvider::new(vec![vec![
        text("preview text"),
        StreamEvent::Done {
            stop_reason: "stop".to_string(),
            ephemeral: true,
        },
    ]]);
    let fx = fixture(provider);
    let mut sub = fx.bus.subscribe(false);

    let events = run_turn(&fx, "preview please").await;
    assert!(matches!(
        events.last(),
        Some(TurnEvent::Done { ephemeral: true })
    ));

    // Only the user message was persisted.
    let messages = fx.sessions.get_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);

    // No message-added for an ephemeral response.
    let kinds: Vec<EventKind> = std::iter::from_fn(|| sub.try_recv()).map(|e| e.kind).collect();
    assert!(!kinds.contains(&EventKind::MessageAdded));
}

#[tokio::test]
async fn skip_user_message_continues_without_appending() {
    let provider = ScriptedProvider::new(vec![vec![text("continuation"), done()]]);
    let fx = fixture(provider);
    fx.sessions.append_user("original").unwrap();

    let (tx, _rx) = mpsc::channel(64);
    fx.orchestrator
        .stream_turn("[continue]".to_string(), None, true, tx)
        .await;

    let messages = fx.sessions.get_messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "original");
    assert_eq!(messages[1].content, "continuation");
}

#[tokio::test]
async fn prefill_prefixes_the_assistant_message() {
    let provider = ScriptedProvider::new(vec![vec![text(" continued"), done()]]);
    let fx = fixture(provider);

    let (tx, _rx) = mpsc::channel(64);
    fx.orchestrator
        .stream_turn(
            "go".to_string(),
            Some("Once upon a time,".to_string()),
            false,
            tx,
        )
        .await;

    let messages = fx.sessions.get_messages();
    assert_eq!(messages[1].content, "Once upon a time, continued");
}

#[tokio::test]
async fn cancellation_drops_partial_message() {
    let mut provider = ScriptedProvider::new(vec![vec![text("partial"), text("never"), done()]]);
    provider.stall = true;
    let fx = fixture(provider);

    let (tx, mut rx) = mpsc::channel(64);
    let orchestrator = &fx.orchestrator;

    let turn = orchestrator.stream_turn("cancel me".to_string(), None, false, tx);
    tokio::pin!(turn);

    let mut saw_cancelled = false;
    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(TurnEvent::Chunk(_)) => orchestrator.cancel_current(),
                Some(TurnEvent::Cancelled) => {
                    saw_cancelled = true;
                }
                None => break,
                _ => {}
            },
            _ = &mut turn => break,
        }
    }
    while let Ok(event) = rx.try_recv() {
        if matches!(event, TurnEvent::Cancelled) {
            saw_cancelled = true;
        }
    }
    assert!(saw_cancelled);

    // The partial assistant message was not persisted.
    let messages = fx.sessions.get_messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].role, Role::User);
}

#[tokio::test]
async fn state_tools_dispatch_to_the_engine() {
    let provider = ScriptedProvider::new(vec![
        vec![
            tool_call(
                "tc_1",
                "set_state",
                r#"{"key": "mood", "value": "tense", "reason": "story beat"}"#,
            ),
            done(),
        ],
        vec![text("The room falls silent."), done()],
    ]);
    let fx = fixture(provider);
    let delta = serde_json::json!({"state_engine_enabled": true})
        .as_object()
        .unwrap()
        .clone();
    fx.sessions.update_chat_settings(&delta).unwrap();

    run_turn(&fx, "set the mood").await;

    let engine = fx.states.engine("default");
    let engine = engine.lock().unwrap();
    assert_eq!(engine.get_state("mood"), Some(serde_json::json!("tense")));
}

#[tokio::test]
async fn provider_error_publishes_llm_error() {
    let provider = ScriptedProvider::new(vec![vec![StreamEvent::Error {
        message: "connection reset".to_string(),
    }]]);
    let fx = fixture(provider);
    let mut sub = fx.bus.subscribe(false);

    let events = run_turn(&fx, "hello").await;
    assert!(matches!(events.last(), Some(TurnEvent::Error(_))));

    let kinds: Vec<EventKind> = std::iter::from_fn(|| sub.try_recv()).map(|e| e.kind).collect();
    assert!(kinds.contains(&EventKind::LlmError));
}
