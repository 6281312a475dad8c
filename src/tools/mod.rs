pub mod search;
pub mod sql;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::info;

use crate::catalog::{BookRecord, CatalogStore};
use crate::config::CatalogConfig;
use crate::error::{BookAgentError, Result};
use crate::security::query_gate::QueryGate;

pub const KEYWORD_SEARCH: &str = "keyword_search";
pub const SCHEMA_DESCRIPTION: &str = "schema_description";
pub const EXECUTE_READONLY_QUERY: &str = "execute_readonly_query";
pub const GET_BOOK_DETAILS: &str = "get_book_details";
pub const CHECK_STOCK: &str = "check_stock";
pub const RECOMMEND_BOOKS: &str = "recommend_books";
pub const GET_BORROW_RECORDS: &str = "get_borrow_records";

/// Upper bound for `recommend_books.max_results`.
pub const MAX_RECOMMENDATIONS: usize = 20;
const DEFAULT_RECOMMENDATIONS: usize = 5;

// -- Definitions ------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
}

impl ParamKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub description: &'static str,
}

/// A callable capability as advertised to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamSpec],
}

impl CapabilityDefinition {
    /// JSON Schema for the parameters, in the shape function-calling APIs expect.
    pub fn parameters_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                (
                    p.name.to_string(),
                    json!({ "type": p.kind.json_type(), "description": p.description }),
                )
            })
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name)
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Check presence and type of every declared parameter.
    pub fn validate(&self, arguments: &Value) -> Result<()> {
        let args = ArgReader::new(self.name, arguments)?;
        for p in self.params {
            let present = match p.kind {
                ParamKind::String => args.string(p.name)?.is_some(),
                ParamKind::Integer => args.integer(p.name)?.is_some(),
            };
            if p.required && !present {
                return Err(BookAgentError::invalid_args(
                    self.name,
                    format!("missing required argument `{}`", p.name),
                ));
            }
        }
        Ok(())
    }
}

const BOOK_ID_PARAM: ParamSpec = ParamSpec {
    name: "book_id",
    kind: ParamKind::Integer,
    required: true,
    description: "Numeric id of the book (the BookID column)",
};

static DEFINITIONS: &[CapabilityDefinition] = &[
    CapabilityDefinition {
        name: KEYWORD_SEARCH,
        description: "Search the book catalog by keyword. Matches title, author or category, \
                      case-insensitively. Use this for simple lookups.",
        params: &[ParamSpec {
            name: "keyword",
            kind: ParamKind::String,
            required: true,
            description: "Keyword to look for in title, author or category",
        }],
    },
    CapabilityDefinition {
        name: SCHEMA_DESCRIPTION,
        description: "Describe the Books table columns and example queries. Call this before \
                      writing SQL for execute_readonly_query.",
        params: &[],
    },
    CapabilityDefinition {
        name: EXECUTE_READONLY_QUERY,
        description: "Run a single read-only SQL SELECT statement against the catalog. Use this \
                      for ranking, filtering by price or stock, and aggregation.",
        params: &[ParamSpec {
            name: "sql",
            kind: ParamKind::String,
            required: true,
            description: "One SELECT statement, e.g. SELECT * FROM Books ORDER BY Price ASC LIMIT 10",
        }],
    },
    CapabilityDefinition {
        name: GET_BOOK_DETAILS,
        description: "Get the full record for one book by id.",
        params: &[BOOK_ID_PARAM],
    },
    CapabilityDefinition {
        name: CHECK_STOCK,
        description: "Check how many copies of a book are in stock.",
        params: &[BOOK_ID_PARAM],
    },
    CapabilityDefinition {
        name: RECOMMEND_BOOKS,
        description: "Recommend books by category or author. Without either, recommends random \
                      books that are in stock.",
        params: &[
            ParamSpec {
                name: "category",
                kind: ParamKind::String,
                required: false,
                description: "Category to recommend from",
            },
            ParamSpec {
                name: "author",
                kind: ParamKind::String,
                required: false,
                description: "Author to recommend from",
            },
            ParamSpec {
                name: "max_results",
                kind: ParamKind::Integer,
                required: false,
                description: "How many books to return (1-20, default 5)",
            },
        ],
    },
    CapabilityDefinition {
        name: GET_BORROW_RECORDS,
        description: "List borrow records, most recent first. Filter by book, by user, or both; \
                      without filters lists recent loans.",
        params: &[
            ParamSpec {
                name: "book_id",
                kind: ParamKind::Integer,
                required: false,
                description: "Only loans of this book",
            },
            ParamSpec {
                name: "user_id",
                kind: ParamKind::Integer,
                required: false,
                description: "Only loans by this user",
            },
        ],
    },
];

/// Every capability exposed to the model, in a stable order.
pub fn definitions() -> &'static [CapabilityDefinition] {
    DEFINITIONS
}

pub fn definition(name: &str) -> Option<&'static CapabilityDefinition> {
    DEFINITIONS.iter().find(|d| d.name == name)
}

/// Compact `- name: description` listing for prompt text.
pub fn schema_for_prompt() -> String {
    let mut out = String::new();
    for def in DEFINITIONS {
        out.push_str(&format!("- {}: {}\n", def.name, def.description));
    }
    out
}

// -- Requests and results ---------------------------------------------------

/// A capability call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityInvocationRequest {
    /// Backend-assigned call id, echoed back with the result when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

impl CapabilityInvocationRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

/// Text for the model plus an optional structured side-result.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityInvocationResult {
    pub summary: String,
    pub books: Option<Vec<BookRecord>>,
}

impl CapabilityInvocationResult {
    pub fn text(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            books: None,
        }
    }

    pub fn with_books(summary: impl Into<String>, books: Vec<BookRecord>) -> Self {
        Self {
            summary: summary.into(),
            books: Some(books),
        }
    }
}

// -- Typed capabilities -----------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordSearchArgs {
    pub keyword: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadonlyQueryArgs {
    pub sql: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookIdArgs {
    pub book_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendArgs {
    pub category: Option<String>,
    pub author: Option<String>,
    pub max_results: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorrowRecordsArgs {
    pub book_id: Option<i64>,
    pub user_id: Option<i64>,
}

/// A validated capability call with typed arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    KeywordSearch(KeywordSearchArgs),
    SchemaDescription,
    ExecuteReadonlyQuery(ReadonlyQueryArgs),
    GetBookDetails(BookIdArgs),
    CheckStock(BookIdArgs),
    RecommendBooks(RecommendArgs),
    GetBorrowRecords(BorrowRecordsArgs),
}

impl Capability {
    pub fn parse(name: &str, arguments: &Value) -> Result<Self> {
        let def = definition(name)
            .ok_or_else(|| BookAgentError::UnknownCapability(name.to_string()))?;
        def.validate(arguments)?;
        let args = ArgReader::new(def.name, arguments)?;

        let capability = match def.name {
            KEYWORD_SEARCH => Self::KeywordSearch(KeywordSearchArgs {
                keyword: args.required_string("keyword")?,
            }),
            SCHEMA_DESCRIPTION => Self::SchemaDescription,
            EXECUTE_READONLY_QUERY => Self::ExecuteReadonlyQuery(ReadonlyQueryArgs {
                sql: args.required_string("sql")?,
            }),
            GET_BOOK_DETAILS => Self::GetBookDetails(BookIdArgs {
                book_id: args.required_integer("book_id")?,
            }),
            CHECK_STOCK => Self::CheckStock(BookIdArgs {
                book_id: args.required_integer("book_id")?,
            }),
            RECOMMEND_BOOKS => {
                let max_results = args
                    .integer("max_results")?
                    .map(|n| n.clamp(1, MAX_RECOMMENDATIONS as i64) as usize)
                    .unwrap_or(DEFAULT_RECOMMENDATIONS);
                Self::RecommendBooks(RecommendArgs {
                    category: non_blank(args.string("category")?),
                    author: non_blank(args.string("author")?),
                    max_results,
                })
            }
            GET_BORROW_RECORDS => Self::GetBorrowRecords(BorrowRecordsArgs {
                book_id: args.integer("book_id")?,
                user_id: args.integer("user_id")?,
            }),
            other => return Err(BookAgentError::UnknownCapability(other.to_string())),
        };
        Ok(capability)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::KeywordSearch(_) => KEYWORD_SEARCH,
            Self::SchemaDescription => SCHEMA_DESCRIPTION,
            Self::ExecuteReadonlyQuery(_) => EXECUTE_READONLY_QUERY,
            Self::GetBookDetails(_) => GET_BOOK_DETAILS,
            Self::CheckStock(_) => CHECK_STOCK,
            Self::RecommendBooks(_) => RECOMMEND_BOOKS,
            Self::GetBorrowRecords(_) => GET_BORROW_RECORDS,
        }
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Typed view over a JSON argument object.  `null` counts as absent.
struct ArgReader<'a> {
    capability: &'static str,
    map: Option<&'a Map<String, Value>>,
}

impl<'a> ArgReader<'a> {
    fn new(capability: &'static str, arguments: &'a Value) -> Result<Self> {
        let map = match arguments {
            Value::Null => None,
            Value::Object(map) => Some(map),
            _ => {
                return Err(BookAgentError::invalid_args(
                    capability,
                    "arguments must be a JSON object",
                ));
            }
        };
        Ok(Self { capability, map })
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map?.get(name).filter(|v| !v.is_null())
    }

    fn mistyped(&self, name: &str, expected: &str) -> BookAgentError {
        BookAgentError::invalid_args(self.capability, format!("`{name}` must be {expected}"))
    }

    fn missing(&self, name: &str) -> BookAgentError {
        BookAgentError::invalid_args(
            self.capability,
            format!("missing required argument `{name}`"),
        )
    }

    fn string(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(self.mistyped(name, "a string")),
        }
    }

    /// Integers may also arrive as numeric strings; small models do that.
    fn integer(&self, name: &str) -> Result<Option<i64>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| self.mistyped(name, "an integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.mistyped(name, "an integer")),
            Some(_) => Err(self.mistyped(name, "an integer")),
        }
    }

    fn required_string(&self, name: &str) -> Result<String> {
        self.string(name)?.ok_or_else(|| self.missing(name))
    }

    fn required_integer(&self, name: &str) -> Result<i64> {
        self.integer(name)?.ok_or_else(|| self.missing(name))
    }
}

// -- Dispatcher -------------------------------------------------------------

/// Row caps and timeouts applied by the capability handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchLimits {
    pub search_limit: usize,
    pub summary_rows: usize,
    pub digest_rows: usize,
    pub query_timeout: Duration,
}

impl Default for DispatchLimits {
    fn default() -> Self {
        Self::from(&CatalogConfig::default())
    }
}

impl From<&CatalogConfig> for DispatchLimits {
    fn from(c: &CatalogConfig) -> Self {
        Self {
            search_limit: c.search_limit.max(1),
            summary_rows: c.summary_rows,
            digest_rows: c.digest_rows,
            query_timeout: Duration::from_secs(c.query_timeout_secs.max(1)),
        }
    }
}

/// Routes validated capability calls to their handlers.
///
/// Built per chat request and dropped with it; it carries no per-request
/// results, only the collaborators it dispatches to.
pub struct CapabilityDispatcher {
    store: Arc<dyn CatalogStore>,
    gate: QueryGate,
    limits: DispatchLimits,
}

impl CapabilityDispatcher {
    pub fn new(store: Arc<dyn CatalogStore>, gate: QueryGate, limits: DispatchLimits) -> Self {
        Self {
            store,
            gate,
            limits,
        }
    }

    /// Fails with `UnknownCapability` or `InvalidArguments` before any handler
    /// runs.  Gate rejections and query failures come back as `Ok` results.
    pub async fn dispatch(
        &self,
        request: &CapabilityInvocationRequest,
    ) -> Result<CapabilityInvocationResult> {
        let capability = Capability::parse(&request.name, &request.arguments)?;
        info!(tool = capability.name(), "dispatching capability");

        let store = self.store.as_ref();
        match capability {
            Capability::KeywordSearch(args) => {
                search::keyword_search(store, &args, &self.limits).await
            }
            Capability::SchemaDescription => Ok(sql::schema_description()),
            Capability::ExecuteReadonlyQuery(args) => {
                Ok(sql::execute_readonly_query(store, &self.gate, &args, &self.limits).await)
            }
            Capability::GetBookDetails(args) => search::get_book_details(store, args).await,
            Capability::CheckStock(args) => search::check_stock(store, args).await,
            Capability::RecommendBooks(args) => search::recommend_books(store, &args).await,
            Capability::GetBorrowRecords(args) => search::get_borrow_records(store, args).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SqliteCatalog;
    use crate::db;

    fn dispatcher() -> CapabilityDispatcher {
        let store = Arc::new(SqliteCatalog::new(db::seeded_test_db(), 200));
        CapabilityDispatcher::new(store, QueryGate::compatible(), DispatchLimits::default())
    }

    #[test]
    fn definitions_are_unique_and_described() {
        let mut names: Vec<_> = definitions().iter().map(|d| d.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), definitions().len());
        assert!(definitions().iter().all(|d| !d.description.is_empty()));
        assert!(definition(EXECUTE_READONLY_QUERY).is_some());
        assert!(definition("drop_table").is_none());
    }

    #[test]
    fn schema_lists_required_params() {
        let schema = definition(KEYWORD_SEARCH).unwrap().parameters_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["keyword"]["type"], "string");
        assert_eq!(schema["required"], json!(["keyword"]));

        let schema = definition(SCHEMA_DESCRIPTION).unwrap().parameters_schema();
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn prompt_listing_names_every_capability() {
        let listing = schema_for_prompt();
        for def in definitions() {
            assert!(listing.contains(def.name));
        }
    }

    #[test]
    fn parse_unknown_capability() {
        let err = Capability::parse("format_disk", &json!({})).unwrap_err();
        assert!(matches!(err, BookAgentError::UnknownCapability(n) if n == "format_disk"));
    }

    #[test]
    fn parse_missing_required_argument() {
        let err = Capability::parse(KEYWORD_SEARCH, &json!({})).unwrap_err();
        match err {
            BookAgentError::InvalidArguments { capability, reason } => {
                assert_eq!(capability, KEYWORD_SEARCH);
                assert!(reason.contains("keyword"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(Capability::parse(EXECUTE_READONLY_QUERY, &Value::Null).is_err());
    }

    #[test]
    fn parse_mistyped_argument() {
        let err = Capability::parse(GET_BOOK_DETAILS, &json!({"book_id": "abc"})).unwrap_err();
        assert!(matches!(err, BookAgentError::InvalidArguments { .. }));
        let err = Capability::parse(KEYWORD_SEARCH, &json!({"keyword": 5})).unwrap_err();
        assert!(matches!(err, BookAgentError::InvalidArguments { .. }));
        let err = Capability::parse(KEYWORD_SEARCH, &json!(["python"])).unwrap_err();
        assert!(matches!(err, BookAgentError::InvalidArguments { .. }));
    }

    #[test]
    fn parse_accepts_numeric_strings_for_integers() {
        let cap = Capability::parse(CHECK_STOCK, &json!({"book_id": " 4 "})).unwrap();
        assert_eq!(cap, Capability::CheckStock(BookIdArgs { book_id: 4 }));
    }

    #[test]
    fn parse_schema_description_ignores_arguments() {
        let cap = Capability::parse(SCHEMA_DESCRIPTION, &Value::Null).unwrap();
        assert_eq!(cap, Capability::SchemaDescription);
        assert_eq!(cap.name(), SCHEMA_DESCRIPTION);
    }

    #[test]
    fn parse_recommend_defaults_and_clamps() {
        let cap = Capability::parse(RECOMMEND_BOOKS, &json!({})).unwrap();
        assert_eq!(
            cap,
            Capability::RecommendBooks(RecommendArgs {
                category: None,
                author: None,
                max_results: 5,
            })
        );

        let cap = Capability::parse(
            RECOMMEND_BOOKS,
            &json!({"category": "  ", "author": "Bloch", "max_results": 500}),
        )
        .unwrap();
        assert_eq!(
            cap,
            Capability::RecommendBooks(RecommendArgs {
                category: None,
                author: Some("Bloch".into()),
                max_results: MAX_RECOMMENDATIONS,
            })
        );

        let cap = Capability::parse(RECOMMEND_BOOKS, &json!({"max_results": 0})).unwrap();
        assert!(matches!(cap, Capability::RecommendBooks(RecommendArgs { max_results: 1, .. })));
    }

    #[test]
    fn parse_borrow_records_filters_are_optional() {
        let cap = Capability::parse(GET_BORROW_RECORDS, &Value::Null).unwrap();
        assert_eq!(
            cap,
            Capability::GetBorrowRecords(BorrowRecordsArgs {
                book_id: None,
                user_id: None,
            })
        );

        let cap = Capability::parse(GET_BORROW_RECORDS, &json!({"user_id": "101"})).unwrap();
        assert_eq!(
            cap,
            Capability::GetBorrowRecords(BorrowRecordsArgs {
                book_id: None,
                user_id: Some(101),
            })
        );
        assert!(Capability::parse(GET_BORROW_RECORDS, &json!({"book_id": true})).is_err());
    }

    #[tokio::test]
    async fn dispatch_borrow_records_leaves_books_untouched() {
        let d = dispatcher();
        let req = CapabilityInvocationRequest::new(GET_BORROW_RECORDS, json!({"book_id": 2}));
        let result = d.dispatch(&req).await.unwrap();
        assert!(result.summary.starts_with("Found 2 borrow records:"));
        assert!(result.books.is_none());
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: CapabilityInvocationRequest =
            serde_json::from_str(r#"{"name": "schema_description"}"#).unwrap();
        assert!(req.id.is_none());
        assert!(req.arguments.is_null());
    }

    #[tokio::test]
    async fn dispatch_routes_to_keyword_search() {
        let d = dispatcher();
        let req = CapabilityInvocationRequest::new(KEYWORD_SEARCH, json!({"keyword": "python"}));
        let result = d.dispatch(&req).await.unwrap();
        assert_eq!(result.books.unwrap().len(), 2);
        assert!(result.summary.contains("Fluent Python"));
    }

    #[tokio::test]
    async fn dispatch_unknown_capability_fails() {
        let d = dispatcher();
        let req = CapabilityInvocationRequest::new("rm_rf", json!({}));
        assert!(matches!(
            d.dispatch(&req).await,
            Err(BookAgentError::UnknownCapability(_))
        ));
    }

    #[tokio::test]
    async fn dispatch_gate_rejection_is_not_an_error() {
        let d = dispatcher();
        let req =
            CapabilityInvocationRequest::new(EXECUTE_READONLY_QUERY, json!({"sql": "DROP TABLE Books"}));
        let result = d.dispatch(&req).await.unwrap();
        assert!(result.summary.contains("rejected"));
        assert_eq!(result.books, Some(vec![]));
    }

    #[test]
    fn limits_from_catalog_config() {
        let cfg = CatalogConfig {
            query_timeout_secs: 0,
            search_limit: 0,
            ..CatalogConfig::default()
        };
        let limits = DispatchLimits::from(&cfg);
        assert_eq!(limits.query_timeout, Duration::from_secs(1));
        assert_eq!(limits.search_limit, 1);
        assert_eq!(limits.digest_rows, 10);
    }
}
