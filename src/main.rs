mod agent;
mod api;
mod catalog;
mod config;
mod db;
mod error;
mod llm;
mod security;
mod tools;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tracing::{error, info, warn};

use crate::agent::ChatAgent;
use crate::api::AppState;
use crate::catalog::{CatalogStore, SqliteCatalog};
use crate::config::Config;
use crate::llm::{LlmBackend, LlmEngine};
use crate::security::query_gate::QueryGate;

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything reads env vars
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    if args.iter().any(|a| a == "--default-config") {
        print!("{}", Config::default_config_contents());
        return;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from);

    let config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!("failed to load config: {e}");
            return;
        }
    };

    info!(
        agent_name = %config.agent_name,
        bind = %config.bind,
        max_tool_turns = config.max_tool_turns,
        gate_mode = ?config.query_gate.mode,
        "book-agent starting"
    );

    let db_path = config.database_path();
    let db = match db::open(&db_path) {
        Ok(d) => Arc::new(Mutex::new(d)),
        Err(e) => {
            error!(path = %db_path.display(), "failed to open database: {e}");
            return;
        }
    };
    let store: Arc<dyn CatalogStore> =
        Arc::new(SqliteCatalog::new(db, config.catalog.max_result_rows));

    let engine = match LlmEngine::new(&config) {
        Ok(e) => e,
        Err(e) => {
            error!("failed to initialize LLM backend: {e}");
            return;
        }
    };

    if args.iter().any(|a| a == "--check") {
        run_checks(&config, store.as_ref(), &engine).await;
        return;
    }

    let agent = Arc::new(ChatAgent::new(engine.backend(), store.clone(), &config));
    let state = AppState { agent, store };

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let api_handle = {
        let config = config.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = api::serve(config, state, shutdown_rx).await {
                error!("HTTP API error: {e}");
                std::process::exit(1);
            }
        })
    };

    info!("book-agent is running, press Ctrl+C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl+c: {e}");
    }

    info!("shutdown signal received, stopping...");
    let _ = shutdown_tx.send(());

    let _ = api_handle.await;
    info!("book-agent stopped");
}

async fn run_checks(config: &Config, store: &dyn CatalogStore, engine: &LlmEngine) {
    info!("running pre-flight checks...");

    info!("config: OK");
    info!("  agent_name: {}", config.agent_name);
    info!("  bind: {}", config.bind);
    info!("  max_tool_turns: {}", config.max_tool_turns);

    if store.ping().await {
        info!("database: OK ({})", config.database_path().display());
    } else {
        error!("database: UNREACHABLE ({})", config.database_path().display());
    }

    match store.search("", 1_000_000).await {
        Ok(books) => info!("  books: {}", books.len()),
        Err(e) => warn!("  books: could not count ({e})"),
    }

    let gate = QueryGate::from_config(&config.query_gate);
    info!("query gate: {:?}", gate.mode());
    info!("  deny list: {}", gate.deny_list().join(" "));

    info!(
        "llm backend: {} ({}), available: [{}]",
        engine.active_key(),
        engine.name(),
        engine.available_backends().join(", ")
    );

    info!("pre-flight checks complete");
}

fn print_usage() {
    println!(
        "book-agent - conversational book catalog assistant

USAGE:
    book-agent [OPTIONS]

OPTIONS:
    --config <PATH>     Path to config file (default: ~/.config/book-agent/config.toml)
    --default-config    Print default config to stdout and exit
    --check             Validate config, database and backend selection, then exit
    -h, --help          Print this help message

LLM BACKEND:
    LLM_BACKEND           \"ollama\" (default) or \"openai\"
    OLLAMA_HOST           Ollama server URL (default: http://localhost:11434)
    OLLAMA_MODEL          Model name (default: qwen2.5:7b)
    OPENAI_BASE_URL       OpenAI-compatible API base (default: http://localhost:11434/v1)
    OPENAI_MODEL          Model name for the openai backend
    OPENAI_API_KEY        Bearer token for the openai backend (optional)

CATALOG:
    BOOK_DB_PATH          SQLite catalog path (default: ~/.local/share/book-agent/books.db)

LOGGING:
    RUST_LOG              Log filter (default: info)"
    );
}
