use thiserror::Error;

#[derive(Error, Debug)]
pub enum BookAgentError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown capability: {0}")]
    UnknownCapability(String),

    #[error("invalid arguments for {capability}: {reason}")]
    InvalidArguments { capability: String, reason: String },

    #[error("query rejected by policy: {0}")]
    PolicyRejected(String),

    #[error("query execution failed: {0}")]
    ExecutionFailure(String),

    #[error("model backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("tool-call loop exceeded {0} turns")]
    IterationLimitExceeded(usize),
}

impl BookAgentError {
    pub fn invalid_args(capability: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            capability: capability.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BookAgentError>;
