mod app;
mod http;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sapphire_agent::openai_compat::OpenAiCompatProvider;
use sapphire_agent::prompt::PromptBuilder;
use sapphire_agent::ChatOrchestrator;
use sapphire_continuity::{ContinuityExecutor, ContinuityScheduler, TaskStore};
use sapphire_core::config::SapphireConfig;
use sapphire_events::EventBus;
use sapphire_sessions::SessionManager;
use sapphire_state::StateStore;
use sapphire_store::{CredentialsManager, PromptStore, SettingsStore, SpiceStore};
use sapphire_tools::{builtin, PrivacyGate, ToolRegistry};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::app::AppState;

#[derive(Parser)]
#[command(name = "sapphire", about = "Self-hosted conversational AI host")]
struct Args {
    /// Path to sapphire.toml (defaults to ~/.sapphire/sapphire.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sapphire=debug".into()),
        )
        .init();

    let args = Args::parse();
    let config = SapphireConfig::load(args.config.as_deref()).context("loading config")?;
    let data_dir = PathBuf::from(&config.data.dir);
    std::fs::create_dir_all(&data_dir).context("creating data directory")?;

    // Stores.
    let settings = Arc::new(
        SettingsStore::open(data_dir.join("settings.json"), serde_json::Map::new())
            .context("opening settings store")?,
    );
    let settings_watcher = settings.spawn_watcher();
    let credentials = Arc::new(CredentialsManager::open(data_dir.join("credentials.json")));
    let prompts = Arc::new(PromptStore::open(data_dir.join("prompts")));
    let spices = Arc::new(SpiceStore::open(data_dir.join("spice_sets.json")));

    // Privacy gate + tool registry.
    let privacy = Arc::new(PrivacyGate::new(Arc::clone(&settings)));
    let (catalog, modules) = builtin::build_tools(&data_dir, Arc::clone(&privacy));
    let registry = Arc::new(ToolRegistry::new(
        catalog,
        modules,
        data_dir.join("custom_toolsets.json"),
    ));

    // Sessions + state engine.
    let sessions = Arc::new(SessionManager::open(data_dir.join("chats")).context("opening chats")?);
    let states = Arc::new(
        StateStore::open(&data_dir.join("state.db"), data_dir.join("state_presets"))
            .context("opening state database")?,
    );

    // LLM provider + orchestrator.
    let api_key = credentials.llm_api_key(&config.llm.provider);
    let provider = Arc::new(OpenAiCompatProvider::new(&config.llm.base_url, &api_key));
    let bus = EventBus::new(config.events.replay_size);
    let orchestrator = Arc::new(ChatOrchestrator::new(
        provider,
        Arc::clone(&sessions),
        Arc::clone(&registry),
        Arc::clone(&states),
        PromptBuilder::new(
            Arc::clone(&prompts),
            Arc::clone(&spices),
            Arc::clone(&states),
        ),
        bus.clone(),
        config.llm.clone(),
    ));

    // Continuity.
    let shutdown_token = CancellationToken::new();
    let executor = Arc::new(ContinuityExecutor::new(
        Arc::clone(&orchestrator),
        Arc::clone(&sessions),
        Arc::clone(&registry),
        Arc::clone(&prompts),
        bus.clone(),
        shutdown_token.clone(),
    ));
    let task_store = Arc::new(TaskStore::open(data_dir.join("continuity")).context("opening tasks")?);
    let scheduler = Arc::new(ContinuityScheduler::new(task_store, executor, bus.clone()));

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let scheduler_handle = if config.continuity.enabled {
        Some(tokio::spawn(
            Arc::clone(&scheduler).run(shutdown_rx.clone()),
        ))
    } else {
        info!("continuity disabled by config");
        None
    };

    // Apply the active chat's settings to the live registry on boot.
    let boot_settings = sessions.get_chat_settings();
    let state = Arc::new(AppState {
        config: config.clone(),
        bus,
        sessions,
        registry,
        states,
        orchestrator,
        scheduler,
        prompts,
        spices,
        settings,
        credentials,
        privacy,
    });
    crate::http::chats::apply_settings(&state, &boot_settings);

    let router = app::build_router(Arc::clone(&state));
    let addr = format!("{}:{}", config.gateway.bind, config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "sapphire gateway listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    // Stop background work: scheduler loop first, then any sleeping runs.
    let _ = shutdown_tx.send(true);
    shutdown_token.cancel();
    settings_watcher.abort();
    if let Some(handle) = scheduler_handle {
        let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
    }
    info!("sapphire stopped");
    Ok(())
}
