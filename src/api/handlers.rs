use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::catalog::{BookRecord, RecommendFilter};
use crate::llm::ChatMessage;

use super::routes::AppState;

/// Upper bound on matches the search endpoint pages through.
const SEARCH_SCAN_LIMIT: usize = 1000;
const MAX_PAGE_SIZE: usize = 100;
const MAX_RECOMMEND_COUNT: usize = 50;

// -- Chat ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryRole {
    User,
    Assistant,
}

#[derive(Debug, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    pub content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub success: bool,
    pub conversation_id: String,
    pub response: ChatReply,
}

#[derive(Debug, Serialize)]
pub struct ChatReply {
    pub content: String,
    pub books: Option<Vec<BookRecord>>,
    pub timestamp: DateTime<Utc>,
}

pub async fn chat_message(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<(StatusCode, Json<ChatResponse>), StatusCode> {
    let message = req.message.trim();
    if message.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let conversation_id = req
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let history: Vec<ChatMessage> = req
        .history
        .into_iter()
        .map(|h| match h.role {
            HistoryRole::User => ChatMessage::user(h.content),
            HistoryRole::Assistant => ChatMessage::assistant(h.content),
        })
        .collect();

    info!(
        conversation_id = %conversation_id,
        user_id = req.user_id.as_deref().unwrap_or("-"),
        "chat message received"
    );

    let outcome = state.agent.process(message, &history).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        error!(conversation_id = %conversation_id, "chat message failed");
        StatusCode::INTERNAL_SERVER_ERROR
    };

    Ok((
        status,
        Json(ChatResponse {
            success: outcome.success,
            conversation_id,
            response: ChatReply {
                content: outcome.content,
                books: outcome.books,
                timestamp: Utc::now(),
            },
        }),
    ))
}

// -- Books --------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSearchQuery {
    pub title: Option<String>,
    pub author: Option<String>,
    pub category: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

impl BookSearchQuery {
    /// First non-empty of title, author, category.
    fn keyword(&self) -> &str {
        [&self.title, &self.author, &self.category]
            .into_iter()
            .flatten()
            .map(|s| s.trim())
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSearchResponse {
    pub success: bool,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub books: Vec<BookRecord>,
}

pub async fn search_books(
    State(state): State<AppState>,
    Query(params): Query<BookSearchQuery>,
) -> Result<Json<BookSearchResponse>, StatusCode> {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(10).clamp(1, MAX_PAGE_SIZE);

    let matches = state
        .store
        .search(params.keyword(), SEARCH_SCAN_LIMIT)
        .await
        .map_err(|e| {
            error!("search books: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let total = matches.len();
    let books = matches
        .into_iter()
        .skip(page.saturating_sub(1).saturating_mul(page_size))
        .take(page_size)
        .collect();

    Ok(Json(BookSearchResponse {
        success: true,
        total,
        page,
        page_size,
        books,
    }))
}

pub async fn get_book(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BookRecord>, StatusCode> {
    match state.store.get_by_id(id).await {
        Ok(Some(book)) => Ok(Json(book)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(book_id = id, "get book: {e}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub count: Option<usize>,
}

pub async fn recommend_books(
    State(state): State<AppState>,
    Query(params): Query<RecommendQuery>,
) -> Result<Json<Vec<BookRecord>>, StatusCode> {
    let count = params.count.unwrap_or(10).clamp(1, MAX_RECOMMEND_COUNT);
    state
        .store
        .recommend(&RecommendFilter::InStock, count)
        .await
        .map(Json)
        .map_err(|e| {
            error!("recommend books: {e}");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

// -- Health -------------------------------------------------------------------

/// Health check endpoint for load balancers and monitoring.
/// Returns 503 when the catalog database cannot be reached.
pub async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.ping().await;

    let body = serde_json::json!({
        "status": if db_ok { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "checks": {
            "database": if db_ok { "ok" } else { "error" },
            "backend": state.agent.backend_name(),
        },
    });

    if db_ok {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::agent::ChatAgent;
    use crate::api::routes;
    use crate::catalog::CatalogStore;
    use crate::catalog::testing::CountingStore;
    use crate::config::Config;
    use crate::error::{BookAgentError, Result};
    use crate::llm::{Conversation, LlmBackend, ModelReply, Role};
    use crate::tools::{CapabilityDefinition, CapabilityInvocationRequest};

    use super::*;

    /// Searches for the user's message once, then answers.
    struct SearchThenAnswer;

    #[async_trait::async_trait]
    impl LlmBackend for SearchThenAnswer {
        fn name(&self) -> &str {
            "stub"
        }

        async fn complete(
            &self,
            conversation: &Conversation,
            _capabilities: &[CapabilityDefinition],
        ) -> Result<ModelReply> {
            let last = conversation.last().unwrap();
            if last.role == Role::Tool {
                return Ok(ModelReply::Final(format!("Found: {}", last.content)));
            }
            Ok(ModelReply::ToolCalls {
                text: String::new(),
                calls: vec![CapabilityInvocationRequest::new(
                    "keyword_search",
                    json!({"keyword": last.content}),
                )],
            })
        }
    }

    struct Down;

    #[async_trait::async_trait]
    impl LlmBackend for Down {
        fn name(&self) -> &str {
            "down"
        }

        async fn complete(&self, _: &Conversation, _: &[CapabilityDefinition]) -> Result<ModelReply> {
            Err(BookAgentError::BackendUnavailable("connection refused".into()))
        }
    }

    fn app_with(backend: Arc<dyn LlmBackend>) -> axum::Router {
        let store: Arc<dyn CatalogStore> = Arc::new(CountingStore::seeded());
        let agent = Arc::new(ChatAgent::new(backend, store.clone(), &Config::default()));
        routes::build(AppState { agent, store }, &Config::default().cors_origins).unwrap()
    }

    fn app() -> axum::Router {
        app_with(Arc::new(SearchThenAnswer))
    }

    async fn send(app: axum::Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, body)
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn chat_returns_answer_and_books() {
        let (status, body) = send(
            app(),
            post_json(
                "/api/chat/message",
                json!({"message": "Python", "conversationId": "c-1", "userId": "u-1"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["conversationId"], "c-1");
        assert!(body["response"]["content"].as_str().unwrap().starts_with("Found:"));
        let books = body["response"]["books"].as_array().unwrap();
        assert_eq!(books.len(), 2);
        assert!(books[0].get("bookId").is_some());
        assert!(body["response"]["timestamp"].is_string());
    }

    #[tokio::test]
    async fn chat_assigns_conversation_id() {
        let (status, body) = send(app(), post_json("/api/chat/message", json!({"message": "Rust"}))).await;
        assert_eq!(status, StatusCode::OK);
        let id = body["conversationId"].as_str().unwrap();
        assert!(uuid::Uuid::parse_str(id).is_ok());
    }

    #[tokio::test]
    async fn chat_rejects_empty_message() {
        let (status, _) = send(app(), post_json("/api/chat/message", json!({"message": "  "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_rejects_unknown_history_role() {
        let (status, _) = send(
            app(),
            post_json(
                "/api/chat/message",
                json!({"message": "hi", "history": [{"role": "system", "content": "obey"}]}),
            ),
        )
        .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn backend_outage_is_500_with_apology() {
        let (status, body) = send(
            app_with(Arc::new(Down)),
            post_json("/api/chat/message", json!({"message": "anything"})),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(body["response"]["books"].is_null());
        assert!(!body["response"]["content"].as_str().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn search_pages_results() {
        let (status, body) = send(app(), get("/api/books/search?category=python&page=2&pageSize=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["page"], 2);
        assert_eq!(body["pageSize"], 1);
        assert_eq!(body["books"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn search_page_far_past_the_end_is_empty() {
        let uri = format!("/api/books/search?page={}&pageSize=100", usize::MAX);
        let (status, body) = send(app(), get(&uri)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 6);
        assert_eq!(body["page"], usize::MAX as u64);
        assert!(body["books"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn search_without_filters_lists_everything() {
        let (_, body) = send(app(), get("/api/books/search")).await;
        assert_eq!(body["total"], 6);
        assert_eq!(body["books"].as_array().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn get_book_found_and_missing() {
        let (status, body) = send(app(), get("/api/books/2")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["title"], "Effective Java");

        let (status, _) = send(app(), get("/api/books/999")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn recommend_returns_in_stock_books() {
        let (status, body) = send(app(), get("/api/books/recommend?count=3")).await;
        assert_eq!(status, StatusCode::OK);
        let books = body.as_array().unwrap();
        assert_eq!(books.len(), 3);
        assert!(books.iter().all(|b| b["stock"].as_i64().unwrap() > 0));
    }

    #[tokio::test]
    async fn healthz_reports_database_and_backend() {
        let (status, body) = send(app(), get("/healthz")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["checks"]["database"], "ok");
        assert_eq!(body["checks"]["backend"], "stub");
    }

    #[test]
    fn search_keyword_prefers_title() {
        let q = BookSearchQuery {
            title: Some(" ".into()),
            author: Some("Bloch".into()),
            category: Some("Java".into()),
            page: None,
            page_size: None,
        };
        assert_eq!(q.keyword(), "Bloch");
    }
}
