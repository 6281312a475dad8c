pub mod capture;

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::catalog::{BookRecord, CatalogStore};
use crate::config::Config;
use crate::error::{BookAgentError, Result};
use crate::llm::{ChatMessage, Conversation, LlmBackend, ModelReply, prompts};
use crate::security::query_gate::QueryGate;
use crate::tools::{self, CapabilityDispatcher, DispatchLimits};

pub use capture::ResultCapture;

const BACKEND_APOLOGY: &str =
    "Sorry, the assistant is unavailable right now. Please try again in a moment.";
const TURN_LIMIT_APOLOGY: &str =
    "Sorry, I could not complete that request. Please try rephrasing or narrowing it.";

/// What one chat message produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub content: String,
    /// Structured result of the last capability that produced one.
    pub books: Option<Vec<BookRecord>>,
    /// False when the answer is a degraded apology.
    pub success: bool,
    /// Model round-trips used.
    pub turns_used: usize,
}

impl TurnOutcome {
    fn degraded(content: &str, turns_used: usize) -> Self {
        Self {
            content: content.to_string(),
            books: None,
            success: false,
            turns_used,
        }
    }
}

/// The conversation orchestrator.
///
/// Shared by all requests.  It holds only immutable collaborators: every
/// `process` call builds its own conversation, dispatcher and result
/// capture, so nothing from one request can leak into another.
pub struct ChatAgent {
    backend: Arc<dyn LlmBackend>,
    store: Arc<dyn CatalogStore>,
    gate: QueryGate,
    limits: DispatchLimits,
    max_turns: usize,
    system_instruction: String,
}

impl ChatAgent {
    pub fn new(backend: Arc<dyn LlmBackend>, store: Arc<dyn CatalogStore>, config: &Config) -> Self {
        Self {
            backend,
            store,
            gate: QueryGate::from_config(&config.query_gate),
            limits: DispatchLimits::from(&config.catalog),
            max_turns: config.max_tool_turns.max(1),
            system_instruction: prompts::system_instruction(&config.agent_name),
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn store_healthy(&self) -> bool {
        self.store.ping().await
    }

    /// Answer one user message.  `history` is the prior thread as resent by
    /// the caller; it is copied, never retained.
    ///
    /// Never fails: backend outages and runaway tool loops come back as a
    /// degraded outcome with `success == false` and no books.
    pub async fn process(&self, message: &str, history: &[ChatMessage]) -> TurnOutcome {
        let mut conversation = Conversation::new(self.system_instruction.as_str());
        for m in history {
            conversation.push(m.clone());
        }
        conversation.push(ChatMessage::user(message));

        let dispatcher =
            CapabilityDispatcher::new(self.store.clone(), self.gate.clone(), self.limits);
        let mut capture = ResultCapture::new();
        let mut turns_used = 0;

        info!(
            message_len = message.len(),
            history = history.len(),
            max_turns = self.max_turns,
            "processing chat message"
        );

        let result = self
            .run(&mut conversation, &dispatcher, &mut capture, &mut turns_used)
            .await;

        match result {
            Ok(content) => {
                let books = capture.into_inner();
                info!(
                    turns_used,
                    books = ?books.as_ref().map(Vec::len),
                    "chat message answered"
                );
                TurnOutcome {
                    content,
                    books,
                    success: true,
                    turns_used,
                }
            }
            Err(BookAgentError::IterationLimitExceeded(max)) => {
                warn!(max_turns = max, "tool-call loop hit its turn limit");
                TurnOutcome::degraded(TURN_LIMIT_APOLOGY, turns_used)
            }
            Err(e) => {
                error!(error = %e, turns_used, "model backend failed");
                TurnOutcome::degraded(BACKEND_APOLOGY, turns_used)
            }
        }
    }

    async fn run(
        &self,
        conversation: &mut Conversation,
        dispatcher: &CapabilityDispatcher,
        capture: &mut ResultCapture,
        turns_used: &mut usize,
    ) -> Result<String> {
        for turn in 0..self.max_turns {
            debug!(turn, messages = conversation.len(), "tool-call loop iteration");
            *turns_used = turn + 1;

            let reply = self
                .backend
                .complete(conversation, tools::definitions())
                .await?;

            let (text, mut calls) = match reply {
                ModelReply::Final(text) => return Ok(text),
                ModelReply::ToolCalls { text, calls } => (text, calls),
            };

            // Results are matched to calls by id, so every call needs one.
            for (i, call) in calls.iter_mut().enumerate() {
                if call.id.is_none() {
                    call.id = Some(format!("call_{turn}_{i}"));
                }
            }
            conversation.push(ChatMessage::assistant_with_calls(text, calls.clone()));

            for call in &calls {
                let content = match dispatcher.dispatch(call).await {
                    Ok(result) => {
                        if let Some(books) = result.books {
                            capture.set(books);
                        }
                        result.summary
                    }
                    Err(e) => {
                        warn!(tool = %call.name, error = %e, "capability dispatch failed");
                        format!("Error: {e}")
                    }
                };
                conversation.push(ChatMessage::tool_result(call, content));
            }
        }

        Err(BookAgentError::IterationLimitExceeded(self.max_turns))
    }
}
