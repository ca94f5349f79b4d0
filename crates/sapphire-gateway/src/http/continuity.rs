//! Continuity task CRUD and scheduler introspection.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use sapphire_continuity::Task;
use serde::Deserialize;
use serde_json::json;

use crate::app::{ApiError, AppState};

/// GET /tasks
pub async fn list(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({"tasks": state.scheduler.store().list()}))
}

/// POST /tasks — create from a partial body; cron is validated here.
pub async fn create(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<Task>, ApiError> {
    let task = state.scheduler.store().create(body)?;
    Ok(Json(task))
}

/// PUT /tasks/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<serde_json::Map<String, serde_json::Value>>,
) -> Result<Json<Task>, ApiError> {
    let task = state.scheduler.store().update(&id, &body)?;
    Ok(Json(task))
}

/// DELETE /tasks/{id}
pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.scheduler.store().delete(&id)?;
    Ok(Json(json!({"status": "success", "deleted": id})))
}

/// POST /tasks/{id}/run — fire immediately, bypassing schedule and cooldown.
pub async fn run_now(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let result = state.scheduler.run_task_now(&id).await?;
    Ok(Json(serde_json::to_value(result).unwrap_or_default()))
}

/// GET /status
pub async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::to_value(state.scheduler.status()).unwrap_or_default())
}

#[derive(Deserialize)]
pub struct ActivityQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

/// GET /activity
pub async fn activity(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ActivityQuery>,
) -> Json<serde_json::Value> {
    Json(json!({"activity": state.scheduler.activity(query.limit)}))
}

#[derive(Deserialize)]
pub struct TimelineQuery {
    #[serde(default = "default_hours")]
    pub hours: i64,
}

fn default_hours() -> i64 {
    24
}

/// GET /timeline — upcoming fires within the window (capped at 168 h).
pub async fn timeline(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TimelineQuery>,
) -> Json<serde_json::Value> {
    Json(json!({"timeline": state.scheduler.timeline(query.hours)}))
}
