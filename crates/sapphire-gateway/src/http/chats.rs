//! Chat CRUD and activation.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use sapphire_events::EventKind;
use sapphire_sessions::ChatSettings;
use serde::Deserialize;
use serde_json::json;

use crate::app::{ApiError, AppState};

/// GET /chats
pub async fn list(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "chats": state.sessions.list_chat_files(),
        "active_chat": state.sessions.active_chat_name().as_str(),
    }))
}

/// GET /chats/active
pub async fn active(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({"active_chat": state.sessions.active_chat_name().as_str()}))
}

#[derive(Deserialize)]
pub struct CreateBody {
    pub name: String,
}

/// POST /chats
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("Chat name required"));
    }
    let name = state.sessions.create_chat(&body.name)?;
    Ok(Json(json!({
        "status": "success",
        "name": name.as_str(),
        "message": format!("Created: {name}"),
    })))
}

/// DELETE /chats/{name} — deleting the active chat falls back to default,
/// whose settings are re-applied to the live registry.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let was_active = state.sessions.active_chat_name().as_str() == name.to_lowercase();
    state.sessions.delete_chat(&name)?;
    state.states.drop_engine(&name.to_lowercase());

    if was_active {
        let settings = state.sessions.get_chat_settings();
        apply_settings(&state, &settings);
        state.bus.publish(
            EventKind::ChatSwitched,
            json!({"chat": state.sessions.active_chat_name().as_str()}),
        );
    }
    Ok(Json(json!({"status": "success", "message": format!("Deleted: {name}")})))
}

/// POST /chats/{name}/activate — switch and apply the chat's settings.
pub async fn activate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let resolved = state.sessions.set_active_chat(&name)?;
    let settings = state.sessions.get_chat_settings();
    apply_settings(&state, &settings);
    state
        .bus
        .publish(EventKind::ChatSwitched, json!({"chat": resolved.as_str()}));
    Ok(Json(json!({
        "status": "success",
        "active_chat": resolved.as_str(),
        "message": format!("Switched to: {resolved}"),
        "settings": settings,
    })))
}

/// GET /chats/{name}/settings
pub async fn get_settings(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let settings = state.sessions.get_chat_settings_for(&name)?;
    Ok(Json(json!({"settings": settings})))
}

#[derive(Deserialize)]
pub struct UpdateSettingsBody {
    pub settings: serde_json::Map<String, serde_json::Value>,
}

/// PUT /chats/{name}/settings — active chat only; applied immediately.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(body): Json<UpdateSettingsBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.sessions.active_chat_name().as_str() != name.to_lowercase() {
        return Err(ApiError::bad_request(
            "Can only update settings for active chat",
        ));
    }
    let settings = state.sessions.update_chat_settings(&body.settings)?;
    apply_settings(&state, &settings);
    Ok(Json(json!({
        "status": "success",
        "message": format!("Settings updated for '{name}'"),
    })))
}

/// Sync the live registry and prompt pointer with a chat's settings.
pub(crate) fn apply_settings(state: &AppState, settings: &ChatSettings) {
    if !settings.toolset.is_empty() {
        let _ = state
            .registry
            .update_enabled_functions(&[settings.toolset.clone()], state.prompt_mode());
    }
    if !settings.prompt.is_empty() {
        state.prompts.set_active_name(&settings.prompt);
    }
}
