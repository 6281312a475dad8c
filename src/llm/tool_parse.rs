//! Fallback for models that write capability calls as text instead of
//! using the native tool-calling fields.
//!
//! A call is a fenced block whose info string is `tool_call`:
//!
//! ```text
//! Let me look that up.
//!
//! ```tool_call
//! {"name": "keyword_search", "arguments": {"keyword": "rust"}}
//! ```
//! ```
//!
//! `tool`/`params` are accepted as aliases for `name`/`arguments`.

use serde_json::Value;
use tracing::warn;

use crate::tools::CapabilityInvocationRequest;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    /// Reply text with every well-formed or malformed block removed.
    pub text: String,
    pub calls: Vec<CapabilityInvocationRequest>,
}

pub fn parse_fenced_calls(reply: &str) -> ParsedReply {
    let mut text_lines: Vec<&str> = Vec::new();
    let mut calls = Vec::new();
    let mut lines = reply.lines();

    while let Some(line) = lines.next() {
        if !is_opening_fence(line) {
            text_lines.push(line);
            continue;
        }

        let mut body: Vec<&str> = Vec::new();
        let mut closed = false;
        for inner in lines.by_ref() {
            if inner.trim_start().starts_with("```") {
                closed = true;
                break;
            }
            body.push(inner);
        }

        if !closed {
            warn!("tool_call block missing closing fence");
            text_lines.push(line);
            text_lines.extend(body);
            break;
        }

        let json = body.join("\n");
        match parse_call(json.trim()) {
            Some(call) => calls.push(call),
            None => warn!(json = %json.trim(), "failed to parse tool_call JSON"),
        }
    }

    let text = text_lines.join("\n").trim().to_string();
    ParsedReply { text, calls }
}

fn is_opening_fence(line: &str) -> bool {
    line.trim()
        .strip_prefix("```")
        .is_some_and(|info| info.trim() == "tool_call")
}

fn parse_call(json: &str) -> Option<CapabilityInvocationRequest> {
    let value: Value = serde_json::from_str(json).ok()?;
    let obj = value.as_object()?;

    let name = obj
        .get("name")
        .or_else(|| obj.get("tool"))?
        .as_str()?
        .trim()
        .to_string();
    if name.is_empty() {
        return None;
    }

    let arguments = obj
        .get("arguments")
        .or_else(|| obj.get("params"))
        .cloned()
        .unwrap_or(Value::Null);
    Some(CapabilityInvocationRequest::new(name, super::decode_arguments(arguments)))
}
