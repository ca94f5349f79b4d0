//! History endpoints: display view, raw list, edits, and deletions.

use std::sync::Arc;

use axum::{extract::State, Json};
use sapphire_core::types::{Message, Role};
use sapphire_events::EventKind;
use sapphire_sessions::to_display;
use serde::Deserialize;
use serde_json::json;

use crate::app::{ApiError, AppState};

/// GET /history — grouped display view of the active chat.
pub async fn display(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let messages = state.sessions.get_messages();
    Json(serde_json::to_value(to_display(&messages)).unwrap_or_default())
}

/// GET /history/raw — the underlying message list.
pub async fn raw(State(state): State<Arc<AppState>>) -> Json<Vec<Message>> {
    Json(state.sessions.get_messages())
}

#[derive(Deserialize)]
pub struct RemoveBody {
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub user_message: Option<String>,
}

/// DELETE /history/messages — remove the last N (all with `count=-1`) or
/// everything from a matched user message forward.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RemoveBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if let Some(user_message) = &body.user_message {
        state.sessions.remove_from_user_message(user_message)?;
        state.bus.publish(EventKind::MessageRemoved, json!({}));
        return Ok(Json(
            json!({"status": "success", "message": "Removed from user message"}),
        ));
    }

    if body.count == -1 {
        state.sessions.clear()?;
        state.bus.publish(EventKind::ChatCleared, json!({}));
        return Ok(Json(
            json!({"status": "success", "message": "All chat history cleared."}),
        ));
    }

    if body.count <= 0 {
        return Err(ApiError::bad_request("Invalid count"));
    }
    let removed = state.sessions.remove_last_messages(body.count as usize)?;
    state
        .bus
        .publish(EventKind::MessageRemoved, json!({"count": removed}));
    Ok(Json(json!({
        "status": "success",
        "message": format!("Removed {removed} messages."),
        "deleted": removed,
    })))
}

#[derive(Deserialize)]
pub struct TimestampBody {
    pub timestamp: String,
}

/// POST /history/messages/remove-from-assistant — prune from the matched
/// assistant message forward (the triggering user message stays).
pub async fn remove_from_assistant(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TimestampBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .sessions
        .remove_from_assistant_timestamp(&body.timestamp)?;
    state.bus.publish(EventKind::MessageRemoved, json!({}));
    Ok(Json(
        json!({"status": "success", "message": "Removed from assistant"}),
    ))
}

/// POST /history/messages/remove-last-assistant — drop only the final
/// assistant message of the turn (continue flow).
pub async fn remove_last_assistant(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TimestampBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .sessions
        .remove_last_assistant_in_turn(&body.timestamp)?;
    state.bus.publish(EventKind::MessageRemoved, json!({}));
    Ok(Json(
        json!({"status": "success", "message": "Removed last assistant"}),
    ))
}

#[derive(Deserialize)]
pub struct EditBody {
    pub role: String,
    pub timestamp: String,
    pub new_content: String,
}

/// POST /history/messages/edit — edit the unique (role, timestamp) message.
pub async fn edit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EditBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let role = match body.role.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        _ => return Err(ApiError::bad_request("Invalid role")),
    };
    state
        .sessions
        .edit_message_by_timestamp(role, &body.timestamp, &body.new_content)?;
    Ok(Json(json!({"status": "success", "message": "Message updated"})))
}

#[derive(Deserialize)]
pub struct ImportBody {
    pub messages: Vec<Message>,
}

/// POST /history/import — replace the active chat's messages wholesale.
pub async fn import(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ImportBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.messages.is_empty() {
        return Err(ApiError::bad_request("Invalid messages array"));
    }
    let count = state.sessions.replace_messages(body.messages)?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Imported {count} messages"),
    })))
}
