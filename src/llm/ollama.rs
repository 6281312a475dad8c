use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{Conversation, LlmBackend, ModelReply, Role, decode_arguments, function_tools};
use crate::config::Config;
use crate::error::{BookAgentError, Result};
use crate::tools::{CapabilityDefinition, CapabilityInvocationRequest};

const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:7b";

/// LLM engine backed by a local or remote Ollama instance.
///
/// Communicates via the Ollama HTTP chat API (`POST /api/chat`) with native
/// tool calling.
///
/// Configuration priority (highest -> lowest):
///   1. Environment variables (`OLLAMA_HOST`, `OLLAMA_MODEL`)
///   2. `[llm]` section of `config.toml`
///   3. Built-in defaults
pub struct OllamaEngine {
    client: Client,
    base_url: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<WireMessage>,
    #[serde(default)]
    eval_count: Option<u64>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
}

impl OllamaEngine {
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = std::env::var("OLLAMA_HOST")
            .ok()
            .or_else(|| {
                if config.llm.ollama_host.is_empty() {
                    None
                } else {
                    Some(config.llm.ollama_host.clone())
                }
            })
            .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string())
            .trim_end_matches('/')
            .to_string();

        let model = std::env::var("OLLAMA_MODEL")
            .ok()
            .or_else(|| {
                if config.llm.ollama_model.is_empty() {
                    None
                } else {
                    Some(config.llm.ollama_model.clone())
                }
            })
            .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string());

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
            max_tokens = config.llm.max_tokens,
            temperature = config.llm.temperature,
            timeout_secs,
            "Ollama engine initialized"
        );

        Ok(Self {
            client,
            base_url,
            model,
            max_tokens: config.llm.max_tokens,
            temperature: config.llm.temperature,
        })
    }

    fn build_request(
        &self,
        conversation: &Conversation,
        capabilities: &[CapabilityDefinition],
    ) -> ChatRequest {
        let messages = conversation
            .messages()
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
                tool_calls: m
                    .tool_calls
                    .iter()
                    .map(|c| WireToolCall {
                        function: WireFunctionCall {
                            name: c.name.clone(),
                            arguments: c.arguments.clone(),
                        },
                    })
                    .collect(),
                tool_name: match m.role {
                    Role::Tool => m.tool_name.clone(),
                    _ => None,
                },
            })
            .collect();

        ChatRequest {
            model: self.model.clone(),
            messages,
            tools: function_tools(capabilities),
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        }
    }
}

fn into_reply(resp: ChatResponse) -> Result<ModelReply> {
    let message = resp.message.ok_or_else(|| {
        BookAgentError::BackendUnavailable("Ollama response had no message".into())
    })?;

    let calls = message
        .tool_calls
        .into_iter()
        .map(|c| CapabilityInvocationRequest::new(c.function.name, decode_arguments(c.function.arguments)))
        .collect();

    ModelReply::from_parts(message.content, calls)
}

#[async_trait::async_trait]
impl LlmBackend for OllamaEngine {
    fn name(&self) -> &str {
        "Ollama"
    }

    async fn complete(
        &self,
        conversation: &Conversation,
        capabilities: &[CapabilityDefinition],
    ) -> Result<ModelReply> {
        let url = format!("{}/api/chat", self.base_url);
        let body = self.build_request(conversation, capabilities);

        debug!(
            model = %self.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "invoking Ollama API"
        );

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BookAgentError::BackendUnavailable(format!("Ollama request failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let error_text = resp.text().await.unwrap_or_default();
            warn!(status = %status, error = %error_text, "Ollama API error");
            return Err(BookAgentError::BackendUnavailable(format!(
                "Ollama API returned {status}: {error_text}"
            )));
        }

        let chat_resp: ChatResponse = resp.json().await.map_err(|e| {
            BookAgentError::BackendUnavailable(format!("failed to parse Ollama response: {e}"))
        })?;

        debug!(
            eval_tokens = chat_resp.eval_count.unwrap_or(0),
            prompt_tokens = chat_resp.prompt_eval_count.unwrap_or(0),
            "Ollama usage"
        );

        let reply = into_reply(chat_resp)?;
        info!(
            model = %self.model,
            tool_calls = reply.call_count(),
            "Ollama response received"
        );
        Ok(reply)
    }
}
