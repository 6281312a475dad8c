use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::agent::ChatAgent;
use crate::catalog::CatalogStore;
use crate::error::{BookAgentError, Result};

use super::handlers;

/// State shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<ChatAgent>,
    /// Direct catalog access for the plain book endpoints.
    pub store: Arc<dyn CatalogStore>,
}

pub fn build(state: AppState, cors_origins: &[String]) -> Result<Router> {
    let origins = cors_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|e| BookAgentError::Config(format!("invalid CORS origin {o:?}: {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let api = Router::new()
        .route("/chat/message", post(handlers::chat_message))
        .route("/books/search", get(handlers::search_books))
        .route("/books/recommend", get(handlers::recommend_books))
        .route("/books/{id}", get(handlers::get_book));

    Ok(Router::new()
        .nest("/api", api)
        .route("/healthz", get(handlers::healthz))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
