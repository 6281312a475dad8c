use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{BookAgentError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    /// Address the HTTP API listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Maximum number of model round-trips per chat message before the
    /// agent gives up with a degraded answer.  Prevents infinite tool-call
    /// loops when the model keeps requesting capabilities.
    #[serde(default = "default_max_tool_turns")]
    pub max_tool_turns: usize,

    /// Browser origins allowed to call the API (CORS).
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub query_gate: QueryGateConfig,
}

// -- LLM -----------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    /// Backend to use: "ollama" (default) or "openai".
    /// Can be overridden with the `LLM_BACKEND` env var.
    #[serde(default = "default_backend")]
    pub backend: String,

    // -- Ollama settings (backend = "ollama") --

    /// Ollama API base URL (default: "http://localhost:11434").
    /// Can be overridden with `OLLAMA_HOST` env var.
    #[serde(default)]
    pub ollama_host: String,

    /// Ollama model tag (e.g. "qwen2.5:7b", "llama3.1:8b").
    /// Can be overridden with `OLLAMA_MODEL` env var.
    #[serde(default)]
    pub ollama_model: String,

    // -- OpenAI-compatible settings (backend = "openai") --

    /// Base URL of an OpenAI-compatible chat completions API.
    /// Ollama exposes one under `/v1`, which is the default.
    /// Can be overridden with `OPENAI_BASE_URL` env var.
    #[serde(default)]
    pub openai_base_url: String,

    /// Model identifier sent with every request.
    /// Can be overridden with `OPENAI_MODEL` env var.
    #[serde(default)]
    pub openai_model: String,

    /// Bearer token.  Optional for local servers.
    /// Can be overridden with `OPENAI_API_KEY` env var.
    #[serde(default)]
    pub openai_api_key: String,

    /// Sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate per response.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// HTTP timeout for one model call in seconds (0 = 600s).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

// -- Catalog -------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// SQLite database file.  Empty means `$XDG_DATA_HOME/book-agent/books.db`.
    /// Can be overridden with `BOOK_DB_PATH` env var.
    #[serde(default)]
    pub database_path: String,

    /// Statement timeout for model-generated queries.
    #[serde(default = "default_query_timeout_secs")]
    pub query_timeout_secs: u64,

    /// Maximum rows returned by keyword search.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Rows listed in the keyword-search summary fed back to the model.
    #[serde(default = "default_summary_rows")]
    pub summary_rows: usize,

    /// Rows listed in the raw-query digest fed back to the model.
    #[serde(default = "default_digest_rows")]
    pub digest_rows: usize,

    /// Hard cap on rows materialized from a single query.
    #[serde(default = "default_max_result_rows")]
    pub max_result_rows: usize,
}

// -- Query gate ----------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateMode {
    /// Prefix + substring deny-list, byte-for-byte the historical policy.
    Compatible,
    /// Lexing gate: token-boundary matching, literals and comments
    /// skipped, statement chaining rejected.
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryGateConfig {
    #[serde(default = "default_gate_mode")]
    pub mode: GateMode,

    /// Additional deny-listed keywords, appended in both modes.
    #[serde(default)]
    pub extra_deny: Vec<String>,
}

// -- Defaults ------------------------------------------------------------

fn default_agent_name() -> String {
    "book-agent".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:5080".to_string()
}

fn default_max_tool_turns() -> usize {
    5
}

fn default_cors_origins() -> Vec<String> {
    vec![
        "http://localhost:5000".to_string(),
        "https://localhost:5001".to_string(),
    ]
}

fn default_backend() -> String {
    "ollama".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> usize {
    2000
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_query_timeout_secs() -> u64 {
    30
}

fn default_search_limit() -> usize {
    10
}

fn default_summary_rows() -> usize {
    5
}

fn default_digest_rows() -> usize {
    10
}

fn default_max_result_rows() -> usize {
    200
}

fn default_gate_mode() -> GateMode {
    GateMode::Compatible
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            ollama_host: String::new(),
            ollama_model: String::new(),
            openai_base_url: String::new(),
            openai_model: String::new(),
            openai_api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            database_path: String::new(),
            query_timeout_secs: default_query_timeout_secs(),
            search_limit: default_search_limit(),
            summary_rows: default_summary_rows(),
            digest_rows: default_digest_rows(),
            max_result_rows: default_max_result_rows(),
        }
    }
}

impl Default for QueryGateConfig {
    fn default() -> Self {
        Self {
            mode: default_gate_mode(),
            extra_deny: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_name: default_agent_name(),
            bind: default_bind(),
            max_tool_turns: default_max_tool_turns(),
            cors_origins: default_cors_origins(),
            llm: LlmConfig::default(),
            catalog: CatalogConfig::default(),
            query_gate: QueryGateConfig::default(),
        }
    }
}

impl Config {
    /// Load config from the given path, or the default location.
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_config_path(),
        };

        let config: Config = if config_path.exists() {
            info!("loading config from {}", config_path.display());
            let contents = std::fs::read_to_string(&config_path)?;
            toml::from_str(&contents)
                .map_err(|e| BookAgentError::Config(format!("parse error: {e}")))?
        } else {
            info!("no config file found, using defaults");
            Config::default()
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.max_tool_turns == 0 {
            return Err(BookAgentError::Config(
                "max_tool_turns must be at least 1".into(),
            ));
        }
        if self.catalog.query_timeout_secs == 0 {
            return Err(BookAgentError::Config(
                "catalog.query_timeout_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Returns the default config file path: `$XDG_CONFIG_HOME/book-agent/config.toml`
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("book-agent")
            .join("config.toml")
    }

    /// Returns the data directory: `$XDG_DATA_HOME/book-agent/`
    pub fn data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("book-agent")
    }

    /// Resolve the catalog database path (env > config > data dir).
    pub fn database_path(&self) -> PathBuf {
        std::env::var("BOOK_DB_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| {
                if self.catalog.database_path.is_empty() {
                    None
                } else {
                    Some(self.catalog.database_path.clone())
                }
            })
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::data_dir().join("books.db"))
    }

    /// Generate the default config file contents.
    pub fn default_config_contents() -> &'static str {
        include_str!("../config.example.toml")
    }
}
