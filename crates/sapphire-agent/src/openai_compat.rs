//! OpenAI-compatible streaming provider.
//!
//! Works against any endpoint implementing `/v1/chat/completions` with SSE
//! streaming. Tool-call argument fragments are accumulated per call index
//! and emitted as whole `StreamEvent::ToolCall`s at end of stream.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::provider::{ChatRequest, LlmProvider, ProviderError, StreamEvent};

pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatProvider {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn build_body(&self, req: &ChatRequest) -> serde_json::Value {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": req.system,
        })];
        messages.extend(req.messages.iter().cloned());

        let mut body = serde_json::json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens,
            "stream": true,
        });
        if !req.tools.is_empty() {
            let tools: Vec<serde_json::Value> = req
                .tools
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = serde_json::Value::Array(tools);
        }
        body
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        "openai-compat"
    }

    async fn send_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.build_body(req))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        process_stream(resp, tx).await;
        Ok(())
    }
}

/// In-flight accumulation of one streamed tool call.
#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
}

async fn process_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) {
    let mut stop_reason = String::new();
    let mut line_buf = String::new();
    // index → partially assembled call; BTreeMap keeps emission in call order.
    let mut pending: BTreeMap<u32, PendingCall> = BTreeMap::new();

    let mut byte_stream = resp.bytes_stream();

    'outer: while let Some(chunk) = byte_stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };
        let Ok(text) = std::str::from_utf8(&chunk) else {
            continue;
        };

        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data.trim() == "[DONE]" {
                break 'outer;
            }
            let Ok(parsed) = serde_json::from_str::<StreamChunk>(data) else {
                continue;
            };

            for choice in &parsed.choices {
                if let Some(reason) = &choice.finish_reason {
                    if !reason.is_empty() {
                        stop_reason = reason.clone();
                    }
                }
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty() {
                        debug!(len = content.len(), "stream text delta");
                        if tx
                            .send(StreamEvent::TextDelta {
                                text: content.clone(),
                            })
                            .await
                            .is_err()
                        {
                            return; // receiver dropped
                        }
                    }
                }
                if let Some(calls) = &choice.delta.tool_calls {
                    for call in calls {
                        let entry = pending.entry(call.index).or_default();
                        if let Some(id) = &call.id {
                            entry.id = id.clone();
                        }
                        if let Some(function) = &call.function {
                            if let Some(name) = &function.name {
                                entry.name.push_str(name);
                            }
                            if let Some(args) = &function.arguments {
                                entry.arguments.push_str(args);
                            }
                        }
                    }
                }
            }
        }

        line_buf = remainder;
    }

    for (_, call) in pending {
        if call.name.is_empty() {
            warn!("dropping tool call with no name");
            continue;
        }
        if tx
            .send(StreamEvent::ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
            .await
            .is_err()
        {
            return;
        }
    }

    let _ = tx
        .send(StreamEvent::Done {
            stop_reason,
            ephemeral: false,
        })
        .await;
}

// Streaming chunk wire types.

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
