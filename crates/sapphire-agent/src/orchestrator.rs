//! Single-turn streaming chat with the tool-calling loop.
//!
//! Flow: append user message → build prompt → stream from the LLM →
//! intercept tool calls → dispatch to the state engine or the tool registry →
//! loop with the enlarged history until the model yields plain text.
//! The loop is iterative with a hard cap on tool rounds.

use std::sync::{Arc, Mutex};

use sapphire_core::config::LlmConfig;
use sapphire_core::types::{Message, Role, ToolCall};
use sapphire_events::{EventBus, EventKind};
use sapphire_sessions::SessionManager;
use sapphire_state::StateStore;
use sapphire_tools::{ToolArgs, ToolRegistry};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::prompt::PromptBuilder;
use crate::provider::{ChatRequest, LlmProvider, ProviderError, StreamEvent};

/// Hard cap on tool-call rounds per turn.
const MAX_TOOL_ROUNDS: usize = 8;

/// Events yielded to the caller during a streaming turn. The gateway writes
/// them as SSE lines: `{chunk}`, `{done, ephemeral}`, `{cancelled}`,
/// `{error}`.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    Chunk(String),
    Done { ephemeral: bool },
    Cancelled,
    Error(String),
}

pub struct ChatOrchestrator {
    provider: Arc<dyn LlmProvider>,
    sessions: Arc<SessionManager>,
    registry: Arc<ToolRegistry>,
    states: Arc<StateStore>,
    prompt_builder: PromptBuilder,
    bus: EventBus,
    llm: LlmConfig,
    cancel: Mutex<CancellationToken>,
}

impl ChatOrchestrator {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        sessions: Arc<SessionManager>,
        registry: Arc<ToolRegistry>,
        states: Arc<StateStore>,
        prompt_builder: PromptBuilder,
        bus: EventBus,
        llm: LlmConfig,
    ) -> Self {
        Self {
            provider,
            sessions,
            registry,
            states,
            prompt_builder,
            bus,
            llm,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Abort the in-flight stream, if any. The partial assistant message is
    /// not persisted.
    pub fn cancel_current(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// Each turn gets a fresh token; cancellation state never leaks into the
    /// next turn.
    fn begin_turn(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        *self.cancel.lock().unwrap() = fresh.clone();
        fresh
    }

    /// Non-streaming turn: run the full pipeline and return the final text.
    pub async fn chat(&self, text: &str) -> Result<String, String> {
        let (tx, mut rx) = mpsc::channel(64);
        let mut collected = String::new();
        let turn = self.stream_turn(text.to_string(), None, false, tx);
        tokio::pin!(turn);

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(TurnEvent::Chunk(chunk)) => collected.push_str(&chunk),
                    Some(TurnEvent::Error(e)) => return Err(e),
                    Some(TurnEvent::Cancelled) => return Err("cancelled".to_string()),
                    Some(TurnEvent::Done { .. }) | None => break,
                },
                _ = &mut turn => {
                    // Pipeline finished; drain whatever is left in the queue.
                    while let Ok(event) = rx.try_recv() {
                        match event {
                            TurnEvent::Chunk(chunk) => collected.push_str(&chunk),
                            TurnEvent::Error(e) => return Err(e),
                            TurnEvent::Cancelled => return Err("cancelled".to_string()),
                            TurnEvent::Done { .. } => {}
                        }
                    }
                    break;
                }
            }
        }
        Ok(collected)
    }

    /// Run one streaming turn against the active chat.
    ///
    /// `prefill` is an assistant-side prefix merged into the first assistant
    /// message; `skip_user_message` runs in continue mode (no user message is
    /// appended before streaming).
    pub async fn stream_turn(
        &self,
        text: String,
        prefill: Option<String>,
        skip_user_message: bool,
        tx: mpsc::Sender<TurnEvent>,
    ) {
        let cancel = self.begin_turn();

        if !skip_user_message {
            if let Err(e) = self.sessions.append_user(&text) {
                let _ = tx.send(TurnEvent::Error(e.to_string())).await;
                return;
            }
        }

        let chat_name = self.sessions.active_chat_name();
        let settings = self.sessions.get_chat_settings();
        let turn_number = self.sessions.user_turn_count();
        let model = if settings.model.is_empty() {
            self.llm.model.clone()
        } else {
            settings.model.clone()
        };

        self.bus.publish(EventKind::AiTypingStart, json!({}));

        let mut wire = to_wire_messages(&self.sessions.get_messages());
        let mut prefill = prefill.filter(|p| !p.is_empty());
        if let Some(p) = &prefill {
            wire.push(json!({"role": "assistant", "content": p}));
        }

        let mut round = 0usize;
        loop {
            let system = self
                .prompt_builder
                .build(chat_name.as_str(), &settings, turn_number);
            let mut tools = self.registry.enabled_definitions();
            if settings.state_engine_enabled {
                tools.extend(sapphire_state::tools::definitions());
            }

            let request = ChatRequest {
                model: model.clone(),
                system,
                messages: wire.clone(),
                tools,
                max_tokens: self.llm.max_tokens,
            };

            let outcome = match self.stream_one_round(&request, &cancel, &tx).await {
                Ok(outcome) => outcome,
                Err(RoundEnd::Cancelled) => {
                    info!(chat = %chat_name, "turn cancelled");
                    self.bus.publish(EventKind::AiTypingEnd, json!({}));
                    let _ = tx.send(TurnEvent::Cancelled).await;
                    return;
                }
                Err(RoundEnd::Failed(message)) => {
                    error!(chat = %chat_name, "llm stream failed: {message}");
                    self.bus
                        .publish(EventKind::LlmError, json!({"error": message}));
                    let _ = tx.send(TurnEvent::Error(message)).await;
                    return;
                }
            };

            if outcome.tool_calls.is_empty() {
                let full_content = match prefill.take() {
                    Some(p) => format!("{p}{}", outcome.content),
                    None => outcome.content,
                };
                self.finish_turn(&tx, full_content, outcome.ephemeral).await;
                return;
            }

            // Persist the assistant message carrying the tool-call list
            // (content may be empty or partial).
            let assistant_content = match prefill.take() {
                Some(p) => format!("{p}{}", outcome.content),
                None => outcome.content.clone(),
            };
            let session_calls: Vec<ToolCall> = outcome
                .tool_calls
                .iter()
                .map(|(id, name, arguments)| ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                })
                .collect();
            if let Err(e) = self
                .sessions
                .append_assistant(&assistant_content, session_calls)
            {
                let _ = tx.send(TurnEvent::Error(e.to_string())).await;
                return;
            }
            wire.push(assistant_wire_message(&assistant_content, &outcome.tool_calls));

            let over_cap = round >= MAX_TOOL_ROUNDS;
            for (id, name, arguments) in &outcome.tool_calls {
                let args = ToolArgs::parse(arguments);
                self.bus
                    .publish(EventKind::ToolExecuting, json!({"tool": name}));

                let (result_text, success) = if over_cap {
                    warn!(tool = %name, "tool call limit reached, refusing execution");
                    (
                        format!("Error: tool call limit reached ({MAX_TOOL_ROUNDS} rounds per turn)"),
                        false,
                    )
                } else {
                    self.dispatch_tool(&chat_name, &settings, name, &args, turn_number)
                        .await
                };

                self.bus.publish(
                    EventKind::ToolComplete,
                    json!({"tool": name, "success": success}),
                );
                if let Err(e) = self
                    .sessions
                    .append_tool(name, &result_text, id, args.as_value())
                {
                    let _ = tx.send(TurnEvent::Error(e.to_string())).await;
                    return;
                }
                wire.push(json!({
                    "role": "tool",
                    "tool_call_id": id,
                    "content": result_text,
                }));
            }

            round += 1;
            // Backstop: a model that keeps calling tools after receiving
            // limit errors gets cut off outright.
            if round > MAX_TOOL_ROUNDS + 1 {
                let message = "Tool call limit reached for this turn.".to_string();
                let _ = tx.send(TurnEvent::Chunk(message.clone())).await;
                self.finish_turn(&tx, message, false).await;
                return;
            }
        }
    }

    async fn finish_turn(&self, tx: &mpsc::Sender<TurnEvent>, content: String, ephemeral: bool) {
        self.bus.publish(EventKind::AiTypingEnd, json!({}));
        if ephemeral {
            debug!("ephemeral response, skipping persistence");
            let _ = tx.send(TurnEvent::Done { ephemeral: true }).await;
            return;
        }
        match self.sessions.append_assistant(&content, Vec::new()) {
            Ok(message) => {
                self.bus.publish(
                    EventKind::MessageAdded,
                    json!({"role": "assistant", "timestamp": message.timestamp}),
                );
                let _ = tx.send(TurnEvent::Done { ephemeral: false }).await;
            }
            Err(e) => {
                let _ = tx.send(TurnEvent::Error(e.to_string())).await;
            }
        }
    }

    /// Stream one LLM round, forwarding text chunks and collecting tool
    /// calls. Cancellation is observed between chunks.
    async fn stream_one_round(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<RoundOutcome, RoundEnd> {
        let (ev_tx, mut ev_rx) = mpsc::channel::<StreamEvent>(64);
        let provider = Arc::clone(&self.provider);
        let req = request.clone();
        let producer =
            tokio::spawn(async move { provider.send_stream(&req, ev_tx).await });

        let mut outcome = RoundOutcome::default();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    producer.abort();
                    return Err(RoundEnd::Cancelled);
                }
                event = ev_rx.recv() => match event {
                    None => break,
                    Some(StreamEvent::TextDelta { text }) => {
                        outcome.content.push_str(&text);
                        let _ = tx.send(TurnEvent::Chunk(text)).await;
                    }
                    Some(StreamEvent::ToolCall { id, name, arguments }) => {
                        outcome.tool_calls.push((id, name, arguments));
                    }
                    Some(StreamEvent::Done { ephemeral, .. }) => {
                        outcome.ephemeral = ephemeral;
                    }
                    Some(StreamEvent::Error { message }) => {
                        producer.abort();
                        return Err(RoundEnd::Failed(message));
                    }
                },
            }
        }

        match producer.await {
            Ok(Ok(())) => Ok(outcome),
            Ok(Err(e)) => Err(RoundEnd::Failed(e.to_string())),
            Err(join_err) => Err(RoundEnd::Failed(join_err.to_string())),
        }
    }

    /// Classify and dispatch one tool call: state tool, registry tool, or
    /// unknown.
    async fn dispatch_tool(
        &self,
        chat_name: &sapphire_core::types::ChatName,
        settings: &sapphire_sessions::ChatSettings,
        name: &str,
        args: &ToolArgs,
        turn_number: u64,
    ) -> (String, bool) {
        if settings.state_engine_enabled && sapphire_state::tools::is_state_tool(name) {
            let engine = self.states.engine(chat_name.as_str());
            let mut engine = engine.lock().unwrap();
            return sapphire_state::tools::execute(name, args, &mut engine, turn_number);
        }
        if self.registry.tool(name).is_some() {
            let result = self.registry.execute(name, args.clone()).await;
            return (result.content, !result.is_error);
        }
        (format!("unknown tool: {name}"), false)
    }

    /// One-off completion that never touches session state, events, or
    /// tools. Used by ephemeral continuity runs.
    pub async fn isolated_completion(
        &self,
        system: &str,
        messages: Vec<Value>,
        model_override: Option<&str>,
    ) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: model_override
                .filter(|m| !m.is_empty())
                .unwrap_or(&self.llm.model)
                .to_string(),
            system: system.to_string(),
            messages,
            tools: Vec::new(),
            max_tokens: self.llm.max_tokens,
        };

        let (ev_tx, mut ev_rx) = mpsc::channel::<StreamEvent>(64);
        let provider = Arc::clone(&self.provider);
        let producer = tokio::spawn(async move { provider.send_stream(&request, ev_tx).await });

        let mut content = String::new();
        while let Some(event) = ev_rx.recv().await {
            match event {
                StreamEvent::TextDelta { text } => content.push_str(&text),
                StreamEvent::Error { message } => {
                    producer.abort();
                    return Err(ProviderError::Parse(message));
                }
                _ => {}
            }
        }
        match producer.await {
            Ok(Ok(())) => Ok(content),
            Ok(Err(e)) => Err(e),
            Err(join_err) => Err(ProviderError::Parse(join_err.to_string())),
        }
    }
}

#[derive(Default)]
struct RoundOutcome {
    content: String,
    /// (id, name, raw argument string) in call order.
    tool_calls: Vec<(String, String, String)>,
    ephemeral: bool,
}

enum RoundEnd {
    Cancelled,
    Failed(String),
}

/// Convert session messages to wire-format JSON for the provider.
fn to_wire_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|msg| match msg.role {
            Role::Assistant if !msg.tool_calls.is_empty() => {
                let calls: Vec<(String, String, String)> = msg
                    .tool_calls
                    .iter()
                    .map(|tc| (tc.id.clone(), tc.name.clone(), tc.arguments.clone()))
                    .collect();
                assistant_wire_message(&msg.content, &calls)
            }
            Role::Tool => json!({
                "role": "tool",
                "tool_call_id": msg.tool_call_id.clone().unwrap_or_default(),
                "content": msg.content,
            }),
            _ => json!({"role": msg.role.to_string(), "content": msg.content}),
        })
        .collect()
}

fn assistant_wire_message(content: &str, calls: &[(String, String, String)]) -> Value {
    if calls.is_empty() {
        return json!({"role": "assistant", "content": content});
    }
    let tool_calls: Vec<Value> = calls
        .iter()
        .map(|(id, name, arguments)| {
            json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": arguments},
            })
        })
        .collect();
    json!({
        "role": "assistant",
        "content": if content.is_empty() { Value::Null } else { Value::from(content) },
        "tool_calls": tool_calls,
    })
}
