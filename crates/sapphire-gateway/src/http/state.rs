//! State engine adapters for the active chat.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::app::{ApiError, AppState};

/// GET /state — visible state of the active chat.
pub async fn current(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let chat = state.sessions.active_chat_name();
    let turn = state.sessions.user_turn_count();
    let engine = state.states.engine(chat.as_str());
    let engine = engine.lock().unwrap();
    Json(json!({
        "chat": chat.as_str(),
        "preset": engine.preset_name(),
        "state": engine.visible_state(Some(turn)),
    }))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// GET /state/history — change log, newest first.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Json<serde_json::Value> {
    let chat = state.sessions.active_chat_name();
    let engine = state.states.engine(chat.as_str());
    let engine = engine.lock().unwrap();
    let rows = engine.history(query.key.as_deref(), query.limit);
    Json(json!({"history": rows}))
}

#[derive(Deserialize)]
pub struct RollbackBody {
    pub turn: u64,
}

/// POST /state/rollback — truncate the log and replay.
pub async fn rollback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RollbackBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chat = state.sessions.active_chat_name();
    let engine = state.states.engine(chat.as_str());
    let mut engine = engine.lock().unwrap();
    engine.rollback_to_turn(body.turn)?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Rolled back to turn {}", body.turn),
    })))
}

#[derive(Deserialize)]
pub struct PresetBody {
    pub name: String,
}

/// POST /state/preset — load a preset into the active chat, also flipping
/// the chat's state-engine settings on.
pub async fn load_preset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PresetBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chat = state.sessions.active_chat_name();
    let turn = state.sessions.user_turn_count();
    let message = {
        let engine = state.states.engine(chat.as_str());
        let mut engine = engine.lock().unwrap();
        engine.load_preset(&body.name, turn)?
    };

    let delta = json!({"state_engine_enabled": true, "state_preset": body.name})
        .as_object()
        .unwrap()
        .clone();
    state.sessions.update_chat_settings(&delta)?;

    Ok(Json(json!({"status": "success", "message": message})))
}

/// DELETE /state — clear all state for the active chat.
pub async fn clear(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let chat = state.sessions.active_chat_name();
    let engine = state.states.engine(chat.as_str());
    let mut engine = engine.lock().unwrap();
    engine.clear_all()?;
    Ok(Json(json!({"status": "success", "message": "State cleared"})))
}
