//! Chat turn endpoints: non-streaming, SSE streaming, and cancel.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::Stream;
use sapphire_agent::TurnEvent;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::info;

use crate::app::{ApiError, AppState};

#[derive(Deserialize)]
pub struct ChatBody {
    pub text: String,
    #[serde(default)]
    pub prefill: Option<String>,
    #[serde(default)]
    pub skip_user_message: bool,
}

/// POST /chat — run a full turn and return the final text.
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.text.trim().is_empty() {
        return Err(ApiError::bad_request("No text provided"));
    }
    match state.orchestrator.chat(&body.text).await {
        Ok(response) => Ok(Json(json!({"response": response}))),
        Err(e) => Err(ApiError::new(
            axum::http::StatusCode::BAD_GATEWAY,
            e,
        )),
    }
}

/// POST /chat/stream — SSE lines of `{chunk}`, `{done, ephemeral}`,
/// `{cancelled}`, `{error}`.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if body.text.trim().is_empty() {
        return Err(ApiError::bad_request("No text provided"));
    }
    if body.prefill.is_some() {
        info!("streaming with prefill");
    }
    if body.skip_user_message {
        info!("streaming in continue mode");
    }

    let (tx, mut rx) = mpsc::channel::<TurnEvent>(64);
    let orchestrator = Arc::clone(&state.orchestrator);
    tokio::spawn(async move {
        orchestrator
            .stream_turn(body.text, body.prefill, body.skip_user_message, tx)
            .await;
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let payload = match &event {
                TurnEvent::Chunk(chunk) => json!({"chunk": chunk}),
                TurnEvent::Done { ephemeral } => json!({"done": true, "ephemeral": ephemeral}),
                TurnEvent::Cancelled => json!({"cancelled": true}),
                TurnEvent::Error(message) => json!({"error": message}),
            };
            yield Ok(Event::default().data(payload.to_string()));
            if !matches!(event, TurnEvent::Chunk(_)) {
                break;
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// POST /cancel — abort the in-flight stream.
pub async fn cancel(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.orchestrator.cancel_current();
    info!("cancellation requested");
    Json(json!({"status": "success", "message": "Cancellation requested"}))
}
