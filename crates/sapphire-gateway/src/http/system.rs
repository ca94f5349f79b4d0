//! Health, aggregate status, and the restart request.

use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, Json};
use serde_json::json;
use tracing::warn;

use crate::app::AppState;

/// Exit code the external watchdog interprets as "restart me".
pub const RESTART_EXIT_CODE: i32 = 42;

/// GET /health — unauthenticated keep-alive probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

/// GET /system/status — prompt, enabled functions, and network aggregate.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let (ability, function_count) = state.registry.current_ability_info();
    Json(json!({
        "prompt_name": state.prompts.active_name(),
        "functions": state.registry.enabled_function_names(),
        "ability": {"name": ability, "function_count": function_count},
        "has_cloud_tools": state.registry.has_network_tools_enabled(),
        "privacy_mode": state.privacy.is_enabled(),
        "active_chat": state.sessions.active_chat_name().as_str(),
        "subscribers": state.bus.subscriber_count(),
    }))
}

/// POST /system/restart — reply, then exit with the watchdog restart code.
pub async fn restart() -> Json<serde_json::Value> {
    warn!("restart requested, exiting with code {RESTART_EXIT_CODE}");
    tokio::spawn(async {
        // Give the response a moment to flush.
        tokio::time::sleep(Duration::from_millis(250)).await;
        std::process::exit(RESTART_EXIT_CODE);
    });
    Json(json!({"status": "success", "message": "Restarting"}))
}
