use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Conversation, LlmBackend, ModelReply, Role, decode_arguments, function_tools};
use crate::config::Config;
use crate::error::{BookAgentError, Result};
use crate::tools::{CapabilityDefinition, CapabilityInvocationRequest};

/// Ollama serves an OpenAI-compatible API under `/v1`.
const DEFAULT_OPENAI_BASE_URL: &str = "http://localhost:11434/v1";
const DEFAULT_OPENAI_MODEL: &str = "qwen2.5:7b";

/// LLM engine for any OpenAI-compatible chat completions API
/// (`POST {base}/chat/completions`).
///
/// Configuration priority (highest -> lowest):
///   1. Environment variables (`OPENAI_BASE_URL`, `OPENAI_MODEL`, `OPENAI_API_KEY`)
///   2. `[llm]` section of `config.toml`
///   3. Built-in defaults
pub struct OpenAiEngine {
    client: Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    temperature: f32,
    max_tokens: usize,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object.
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

fn env_or(var: &str, configured: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| {
            if configured.is_empty() {
                None
            } else {
                Some(configured.to_string())
            }
        })
}

impl OpenAiEngine {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = env_or("OPENAI_BASE_URL", &config.llm.openai_base_url)
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        let model = env_or("OPENAI_MODEL", &config.llm.openai_model)
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let api_key = env_or("OPENAI_API_KEY", &config.llm.openai_api_key);

        let timeout_secs = config.llm.timeout_secs;
        let client = Client::builder()
            .timeout(if timeout_secs > 0 {
                Duration::from_secs(timeout_secs)
            } else {
                Duration::from_secs(600)
            })
            .build()
            .map_err(|e| BookAgentError::Config(format!("failed to create HTTP client: {e}")))?;

        info!(
            model = %model,
            base_url = %base_url,
            authenticated = api_key.is_some(),
            timeout_secs,
            "OpenAI-compatible engine initialized"
        );

        Ok(Self {
            client,
            base_url,
            model,
            api_key,
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        })
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        capabilities: &[CapabilityDefinition],
    ) -> CompletionRequest {
        let messages = conversation
            .messages()
            .iter()
            .map(|m| {
                let tool_calls: Vec<WireToolCall> = m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        id: c.id.clone(),
                        kind: function_type(),
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: match &c.arguments {
                                Value::Null => "{}".to_string(),
                                other => other.to_string(),
                            },
                        },
                    })
                    .collect();
                // An assistant message that only carries calls has null content.
                let content = if m.content.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(m.content.clone())
                };
                WireMessage {
                    role: m.role.as_str().to_string(),
                    content,
                    tool_calls,
                    tool_call_id: match m.role {
                        Role::Tool => m.tool_call_id.clone(),
                        _ => None,
                    },
                }
            })
            .collect();

        let tools = function_tools(capabilities);
        CompletionRequest {
            model: self.model.clone(),
            messages,
            tool_choice: (!tools.is_empty()).then_some("auto"),
            tools,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: false,
        }
    }
}

fn into_reply(resp: CompletionResponse) -> Result<ModelReply> {
    let choice = resp.choices.into_iter().next().ok_or_else(|| {
        BookAgentError::BackendUnavailable("completion response had no choices".into())
    })?;

    let calls = choice
        .message
        .tool_calls
        .into_iter()
        .map(|c| {
            let arguments = if c.function.arguments.trim().is_empty() {
                Value::Null
            } else {
                decode_arguments(Value::String(c.function.arguments))
            };
            CapabilityInvocationRequest {
                id: c.id,
                name: c.function.name,
                arguments,
            }
        })
        .collect();

    ModelReply::from_parts(choice.message.content.unwrap_or_default(), calls)
}

#[async_trait::async_trait]
impl LlmBackend for OpenAiEngine {
    fn name(&self) -> &str {
        "OpenAI-compatible API"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        capabilities: &[CapabilityDefinition],
    ) -> Result<ModelReply> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_request(conversation, capabilities);

        debug!(
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "invoking chat completions API"
        );

        let mut req = self.client.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            BookAgentError::BackendUnavailable(format!("chat completions request failed: {e}"))
        })?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "chat completions API error");
            return Err(BookAgentError::BackendUnavailable(format!(
                "chat completions API returned {status}: {error_text}"
            )));
        }

        let completion: CompletionResponse = resp.json().await.map_err(|e| {
            BookAgentError::BackendUnavailable(format!("failed to parse completion response: {e}"))
        })?;

        if let Some(ref usage) = completion.usage {
            debug!(
                prompt_tokens = usage.prompt_tokens,
                completion_tokens = usage.completion_tokens,
                "chat completions usage"
            );
        }

        let reply = into_reply(completion)?;
        info!(
            model = %self.model,
            tool_calls = reply.call_count(),
            "chat completions response received"
        );
        Ok(reply)
    }
}
