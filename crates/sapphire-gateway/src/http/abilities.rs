//! Toolset ("ability") management and function enumeration.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use sapphire_events::EventKind;
use serde::Deserialize;
use serde_json::json;

use crate::app::{ApiError, AppState};

/// GET /abilities — every toolset with its classification and functions.
pub async fn list(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let registry = &state.registry;
    let network: Vec<String> = registry.get_network_functions();

    let details: Vec<serde_json::Value> = registry
        .get_available_abilities()
        .into_iter()
        .map(|name| {
            let functions = registry.get_toolset_functions(&name).unwrap_or_default();
            let ability_type = if sapphire_tools::RESERVED_TOOLSETS.contains(&name.as_str()) {
                "builtin"
            } else if registry.is_module_toolset(&name) {
                "module"
            } else {
                "user"
            };
            let has_network = functions.iter().any(|f| network.contains(f));
            json!({
                "name": name,
                "type": ability_type,
                "function_count": functions.len(),
                "functions": functions,
                "has_network_tools": has_network,
            })
        })
        .collect();

    Json(json!({"count": details.len(), "abilities": details}))
}

/// POST /abilities/{name}/activate — enable a toolset for the active chat.
pub async fn activate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.registry.toolset_exists(&name) {
        return Err(ApiError::not_found(format!("Ability '{name}' not found")));
    }
    let enabled = state
        .registry
        .update_enabled_functions(&[name.clone()], state.prompt_mode())?;

    let delta = json!({"toolset": name}).as_object().unwrap().clone();
    state.sessions.update_chat_settings(&delta)?;

    state.bus.publish(
        EventKind::AbilityChanged,
        json!({"name": name, "action": "activated"}),
    );
    Ok(Json(json!({
        "status": "success",
        "message": format!("Activated ability: {name}"),
        "name": name,
        "function_count": enabled.len(),
    })))
}

#[derive(Deserialize)]
pub struct CustomToolsetBody {
    pub name: String,
    pub functions: Vec<String>,
}

/// POST /abilities/custom — save a user-defined toolset.
pub async fn save_custom(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CustomToolsetBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::bad_request("Toolset name required"));
    }
    state.registry.save_toolset(&body.name, &body.functions)?;
    Ok(Json(json!({
        "status": "success",
        "message": format!("Saved toolset: {}", body.name),
    })))
}

/// DELETE /abilities/{name} — custom toolsets only.
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.registry.delete_toolset(&name)?;
    Ok(Json(json!({"status": "success", "message": format!("Deleted toolset: {name}")})))
}

/// GET /functions — full catalog plus the currently enabled names.
pub async fn functions(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "functions": state.registry.all_function_names(),
        "enabled": state.registry.enabled_function_names(),
        "network_functions": state.registry.get_network_functions(),
    }))
}

#[derive(Deserialize)]
pub struct EnableBody {
    pub functions: Vec<String>,
}

/// POST /functions/enable — pin a custom function set for the active chat.
pub async fn enable_functions(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnableBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let enabled = state
        .registry
        .update_enabled_functions(&body.functions, state.prompt_mode())?;
    state
        .bus
        .publish(EventKind::AbilityChanged, json!({"name": "custom"}));
    Ok(Json(json!({"status": "success", "enabled": enabled})))
}
