pub mod handlers;
pub mod routes;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::Config;
use crate::error::{BookAgentError, Result};

pub use routes::AppState;

pub async fn serve(config: Config, state: AppState, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let app = routes::build(state, &config.cors_origins)?;
    let bind = config.bind.as_str();

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| BookAgentError::Config(format!("failed to bind {bind}: {e}")))?;

    info!(bind = %bind, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(|e| BookAgentError::Config(format!("HTTP server error: {e}")))?;

    Ok(())
}
