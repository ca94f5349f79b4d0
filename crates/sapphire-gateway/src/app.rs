use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use sapphire_agent::ChatOrchestrator;
use sapphire_continuity::ContinuityScheduler;
use sapphire_core::config::SapphireConfig;
use sapphire_core::types::PromptMode;
use sapphire_events::EventBus;
use sapphire_sessions::SessionManager;
use sapphire_state::StateStore;
use sapphire_store::{CredentialsManager, PromptStore, SettingsStore, SpiceStore};
use sapphire_tools::{PrivacyGate, ToolRegistry};
use tracing::warn;

/// Central shared state — passed as Arc<AppState> to all handlers.
pub struct AppState {
    pub config: SapphireConfig,
    pub bus: EventBus,
    pub sessions: Arc<SessionManager>,
    pub registry: Arc<ToolRegistry>,
    pub states: Arc<StateStore>,
    pub orchestrator: Arc<ChatOrchestrator>,
    pub scheduler: Arc<ContinuityScheduler>,
    pub prompts: Arc<PromptStore>,
    pub spices: Arc<SpiceStore>,
    pub settings: Arc<SettingsStore>,
    pub credentials: Arc<CredentialsManager>,
    pub privacy: Arc<PrivacyGate>,
}

impl AppState {
    /// The prompt mode toolset filtering runs under.
    pub fn prompt_mode(&self) -> PromptMode {
        match self.settings.get::<String>("prompt_mode", "monolith".into()).as_str() {
            "assembled" => PromptMode::Assembled,
            _ => PromptMode::Monolith,
        }
    }
}

/// JSON error body with a status code; every handler error funnels through
/// this so responses are uniformly `{error: ...}`.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({"error": self.message})),
        )
            .into_response()
    }
}

impl From<sapphire_sessions::SessionError> for ApiError {
    fn from(e: sapphire_sessions::SessionError) -> Self {
        use sapphire_sessions::SessionError::*;
        let status = match &e {
            NotFound { .. } | MessageNotFound { .. } => StatusCode::NOT_FOUND,
            AlreadyExists { .. } => StatusCode::CONFLICT,
            InvalidName { .. } | ReservedChat => StatusCode::BAD_REQUEST,
            Io(_) | Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<sapphire_tools::ToolError> for ApiError {
    fn from(e: sapphire_tools::ToolError) -> Self {
        use sapphire_tools::ToolError::*;
        let status = match &e {
            UnknownTool { .. } | ToolsetNotFound { .. } => StatusCode::NOT_FOUND,
            ProtectedToolset { .. } => StatusCode::CONFLICT,
            UnknownFunction { .. } => StatusCode::BAD_REQUEST,
            Io(_) | Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<sapphire_continuity::SchedulerError> for ApiError {
    fn from(e: sapphire_continuity::SchedulerError) -> Self {
        use sapphire_continuity::SchedulerError::*;
        let status = match &e {
            InvalidSchedule(_) => StatusCode::BAD_REQUEST,
            TaskNotFound { .. } => StatusCode::NOT_FOUND,
            Io(_) | Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

impl From<sapphire_state::StateError> for ApiError {
    fn from(e: sapphire_state::StateError) -> Self {
        use sapphire_state::StateError::*;
        let status = match &e {
            PresetNotFound { .. } => StatusCode::NOT_FOUND,
            MalformedPreset { .. } => StatusCode::BAD_REQUEST,
            Database(_) | Io(_) | Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, e.to_string())
    }
}

/// Require the shared API key on every route except the exempt set.
async fn require_api_key(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = state.config.gateway.api_key.as_deref() else {
        warn!("api key not configured, rejecting request");
        return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Server misconfigured")
            .into_response();
    };
    let provided = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    if provided != Some(expected) {
        warn!("invalid api key");
        return ApiError::new(StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    next.run(request).await
}

/// Assemble the full router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/chat", post(crate::http::chat::chat))
        .route("/chat/stream", post(crate::http::chat::chat_stream))
        .route("/cancel", post(crate::http::chat::cancel))
        .route("/history", get(crate::http::history::display))
        .route("/history/raw", get(crate::http::history::raw))
        .route("/history/messages", delete(crate::http::history::remove))
        .route(
            "/history/messages/remove-from-assistant",
            post(crate::http::history::remove_from_assistant),
        )
        .route(
            "/history/messages/remove-last-assistant",
            post(crate::http::history::remove_last_assistant),
        )
        .route("/history/messages/edit", post(crate::http::history::edit))
        .route("/history/import", post(crate::http::history::import))
        .route(
            "/chats",
            get(crate::http::chats::list).post(crate::http::chats::create),
        )
        .route("/chats/active", get(crate::http::chats::active))
        .route("/chats/{name}", delete(crate::http::chats::remove))
        .route("/chats/{name}/activate", post(crate::http::chats::activate))
        .route(
            "/chats/{name}/settings",
            get(crate::http::chats::get_settings).put(crate::http::chats::update_settings),
        )
        .route("/abilities", get(crate::http::abilities::list))
        .route(
            "/abilities/custom",
            post(crate::http::abilities::save_custom),
        )
        .route(
            "/abilities/{name}",
            delete(crate::http::abilities::remove),
        )
        .route(
            "/abilities/{name}/activate",
            post(crate::http::abilities::activate),
        )
        .route("/functions", get(crate::http::abilities::functions))
        .route(
            "/functions/enable",
            post(crate::http::abilities::enable_functions),
        )
        .route(
            "/tasks",
            get(crate::http::continuity::list).post(crate::http::continuity::create),
        )
        .route(
            "/tasks/{id}",
            put(crate::http::continuity::update).delete(crate::http::continuity::remove),
        )
        .route("/tasks/{id}/run", post(crate::http::continuity::run_now))
        .route("/status", get(crate::http::continuity::status))
        .route("/activity", get(crate::http::continuity::activity))
        .route("/timeline", get(crate::http::continuity::timeline))
        .route("/events", get(crate::http::events::stream))
        .route(
            "/privacy/status",
            get(crate::http::privacy::status),
        )
        .route("/privacy/mode", post(crate::http::privacy::set_mode))
        .route("/state", get(crate::http::state::current).delete(crate::http::state::clear))
        .route("/state/history", get(crate::http::state::history))
        .route("/state/rollback", post(crate::http::state::rollback))
        .route("/state/preset", post(crate::http::state::load_preset))
        .route("/system/status", get(crate::http::system::status))
        .route("/system/restart", post(crate::http::system::restart))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            require_api_key,
        ));

    Router::new()
        .route("/health", get(crate::http::system::health))
        .merge(protected)
        .with_state(state)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}
