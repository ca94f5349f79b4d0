//! Privacy gate status and runtime toggle.

use std::sync::Arc;

use axum::{extract::State, Json};
use serde::Deserialize;
use serde_json::json;

use crate::app::AppState;

/// GET /privacy/status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "enabled": state.privacy.is_enabled(),
        "whitelist": state.privacy.whitelist(),
    }))
}

#[derive(Deserialize)]
pub struct ModeBody {
    pub enabled: bool,
}

/// POST /privacy/mode — runtime only; never persisted.
pub async fn set_mode(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ModeBody>,
) -> Json<serde_json::Value> {
    let changed = state.privacy.set_enabled(body.enabled);
    Json(json!({
        "status": "success",
        "enabled": body.enabled,
        "changed": changed,
    }))
}
