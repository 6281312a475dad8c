pub mod context;
pub mod prompts;
pub mod tool_parse;

mod ollama;
mod openai;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Value, json};
use tracing::info;

use crate::config::Config;
use crate::error::{BookAgentError, Result};
use crate::tools::{CapabilityDefinition, CapabilityInvocationRequest};

pub use context::{ChatMessage, Conversation, Role};
pub use ollama::OllamaEngine;
pub use openai::OpenAiEngine;

/// What the model said on one turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// Final answer; the tool loop ends.
    Final(String),
    /// One or more capability calls, plus any text the model wrote alongside.
    ToolCalls {
        text: String,
        calls: Vec<CapabilityInvocationRequest>,
    },
}

impl ModelReply {
    /// Normalize a backend response.  Native calls win; otherwise fenced
    /// ```` ```tool_call ```` blocks in the text are honoured.  A reply with
    /// neither calls nor text is treated as a backend failure.
    pub fn from_parts(text: String, native_calls: Vec<CapabilityInvocationRequest>) -> Result<Self> {
        if !native_calls.is_empty() {
            return Ok(Self::ToolCalls {
                text: text.trim().to_string(),
                calls: native_calls,
            });
        }

        let parsed = tool_parse::parse_fenced_calls(&text);
        if !parsed.calls.is_empty() {
            return Ok(Self::ToolCalls {
                text: parsed.text,
                calls: parsed.calls,
            });
        }

        let text = text.trim();
        if text.is_empty() {
            return Err(BookAgentError::BackendUnavailable(
                "model returned an empty reply".into(),
            ));
        }
        Ok(Self::Final(text.to_string()))
    }

    pub fn call_count(&self) -> usize {
        match self {
            Self::Final(_) => 0,
            Self::ToolCalls { calls, .. } => calls.len(),
        }
    }
}

/// Capability definitions in the `{"type": "function", ...}` shape both
/// chat APIs accept.
fn function_tools(capabilities: &[CapabilityDefinition]) -> Vec<Value> {
    capabilities
        .iter()
        .map(|c| {
            json!({
                "type": "function",
                "function": {
                    "name": c.name,
                    "description": c.description,
                    "parameters": c.parameters_schema(),
                }
            })
        })
        .collect()
}

/// Arguments sometimes arrive JSON-encoded inside a string.  Decode when
/// possible, otherwise leave the string for validation to reject.
fn decode_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(s) => serde_json::from_str(&s).unwrap_or(Value::String(s)),
        other => other,
    }
}

// -- Plugin trait -----------------------------------------------------------

/// A chat model that can be asked for the next turn of a conversation.
#[async_trait::async_trait]
pub trait LlmBackend: Send + Sync {
    /// Human-readable name of this backend (e.g. "Ollama", "OpenAI-compatible").
    fn name(&self) -> &str;

    /// Send the whole conversation and the capabilities the model may call.
    /// Transport and decoding failures surface as `BackendUnavailable`.
    async fn complete(
        &self,
        conversation: &Conversation,
        capabilities: &[CapabilityDefinition],
    ) -> Result<ModelReply>;
}

// -- Plugin registry --------------------------------------------------------

/// Registry of available LLM backends, keyed by config name.
pub struct LlmPluginRegistry {
    backends: HashMap<String, Arc<dyn LlmBackend>>,
}

impl Default for LlmPluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmPluginRegistry {
    pub fn new() -> Self {
        Self {
            backends: HashMap::new(),
        }
    }

    pub fn register(&mut self, key: &str, backend: Arc<dyn LlmBackend>) {
        info!(backend = key, name = backend.name(), "LLM plugin registered");
        self.backends.insert(key.to_string(), backend);
    }

    pub fn get(&self, key: &str) -> Option<Arc<dyn LlmBackend>> {
        self.backends.get(key).cloned()
    }

    /// Registered keys, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.backends.keys().cloned().collect();
        keys.sort();
        keys
    }
}

// -- LlmEngine --------------------------------------------------------------

/// The active backend plus the registry it was selected from.
///
/// Built-in backends:
/// - **ollama** -- native Ollama chat API (default)
/// - **openai** -- any OpenAI-compatible `/chat/completions` endpoint
pub struct LlmEngine {
    active: Arc<dyn LlmBackend>,
    active_key: String,
    pub plugins: LlmPluginRegistry,
}

impl LlmEngine {
    /// Build the engine from config.  The backend is selected by
    /// `config.llm.backend`, overridable with the `LLM_BACKEND` env var.
    pub fn new(config: &Config) -> Result<Self> {
        let backend = std::env::var("LLM_BACKEND")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| config.llm.backend.clone());

        let mut plugins = LlmPluginRegistry::new();
        plugins.register("ollama", Arc::new(OllamaEngine::new(config)?));
        plugins.register("openai", Arc::new(OpenAiEngine::new(config)?));

        Self::select(plugins, &backend)
    }

    /// Pick `key` out of an already populated registry.
    pub fn select(plugins: LlmPluginRegistry, key: &str) -> Result<Self> {
        let active = plugins.get(key).ok_or_else(|| {
            BookAgentError::Config(format!(
                "unknown LLM backend \"{key}\", available: [{}]",
                plugins.list().join(", "),
            ))
        })?;
        info!(backend = %key, name = active.name(), "LLM backend selected");

        Ok(Self {
            active,
            active_key: key.to_string(),
            plugins,
        })
    }

    pub fn active_key(&self) -> &str {
        &self.active_key
    }

    pub fn available_backends(&self) -> Vec<String> {
        self.plugins.list()
    }

    /// Shared handle to the active backend.
    pub fn backend(&self) -> Arc<dyn LlmBackend> {
        self.active.clone()
    }
}

#[async_trait::async_trait]
impl LlmBackend for LlmEngine {
    fn name(&self) -> &str {
        self.active.name()
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        capabilities: &[CapabilityDefinition],
    ) -> Result<ModelReply> {
        self.active.complete(conversation, capabilities).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait::async_trait]
    impl LlmBackend for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        async fn complete(
            &self,
            conversation: &Conversation,
            _capabilities: &[CapabilityDefinition],
        ) -> Result<ModelReply> {
            let last = conversation.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ModelReply::Final(last))
        }
    }

    #[test]
    fn native_calls_take_precedence() {
        let call = CapabilityInvocationRequest::new("schema_description", json!({}));
        let reply = ModelReply::from_parts(
            "```tool_call\n{\"name\": \"keyword_search\", \"arguments\": {\"keyword\": \"x\"}}\n```".into(),
            vec![call.clone()],
        )
        .unwrap();
        match reply {
            ModelReply::ToolCalls { calls, .. } => assert_eq!(calls, vec![call]),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn fenced_calls_are_used_as_fallback() {
        let reply = ModelReply::from_parts(
            "Checking.\n```tool_call\n{\"name\": \"schema_description\"}\n```".into(),
            vec![],
        )
        .unwrap();
        match reply {
            ModelReply::ToolCalls { text, calls } => {
                assert_eq!(text, "Checking.");
                assert_eq!(calls[0].name, "schema_description");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn plain_text_is_final() {
        let reply = ModelReply::from_parts("  Here you go.  ".into(), vec![]).unwrap();
        assert_eq!(reply, ModelReply::Final("Here you go.".into()));
    }

    #[test]
    fn empty_reply_is_backend_failure() {
        let err = ModelReply::from_parts("   ".into(), vec![]).unwrap_err();
        assert!(matches!(err, BookAgentError::BackendUnavailable(_)));
    }

    #[test]
    fn registry_lists_sorted_keys() {
        let mut reg = LlmPluginRegistry::new();
        reg.register("zeta", Arc::new(Echo));
        reg.register("alpha", Arc::new(Echo));
        assert_eq!(reg.list(), vec!["alpha", "zeta"]);
        assert!(reg.get("alpha").is_some());
        assert!(reg.get("beta").is_none());
    }

    #[test]
    fn select_unknown_backend_is_config_error() {
        let mut reg = LlmPluginRegistry::new();
        reg.register("echo", Arc::new(Echo));
        let err = LlmEngine::select(reg, "claude").err().unwrap();
        match err {
            BookAgentError::Config(msg) => {
                assert!(msg.contains("claude"));
                assert!(msg.contains("echo"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn engine_delegates_to_active_backend() {
        let mut reg = LlmPluginRegistry::new();
        reg.register("echo", Arc::new(Echo));
        let engine = LlmEngine::select(reg, "echo").unwrap();
        assert_eq!(engine.active_key(), "echo");
        assert_eq!(engine.name(), "echo");

        let mut conv = Conversation::new("sys");
        conv.push(ChatMessage::user("hello"));
        let reply = engine.complete(&conv, &[]).await.unwrap();
        assert_eq!(reply, ModelReply::Final("hello".into()));
    }

    #[test]
    fn engine_new_registers_builtins() {
        let engine = LlmEngine::new(&Config::default());
        // LLM_BACKEND may be set in the environment; only check the registry.
        if let Ok(engine) = engine {
            assert_eq!(engine.available_backends(), vec!["ollama", "openai"]);
        }
    }
}
