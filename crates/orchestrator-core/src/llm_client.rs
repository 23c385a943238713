//! LLM Client (§4.7): one operation, `chat(...)`, sitting above the
//! backend-specific `Provider` impls in `orchestrator-llm`.
//!
//! Grounded in the teacher's `Provider` trait (kept in `provider.rs` as the
//! per-backend streaming seam) plus `qq-cli/src/agents/continuation.rs`'s
//! "inject a hint and retry" shape. This module owns everything the spec
//! calls backend-agnostic: the three enforced timeouts, delta accumulation,
//! JSON repair of streamed tool arguments, and the retry-with-hint policy.
//! `orchestrator-core` cannot depend on `orchestrator-llm` (that crate
//! depends on `orchestrator-core` for the `Provider` trait), so this stays
//! a generic wrapper over `Arc<dyn Provider>`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use crate::error::{Error, TimeoutKind};
use crate::message::{Message, StreamChunk, ToolCall, Usage};
use crate::provider::{CompletionRequest, FinishReason, Provider};
use crate::tool::ToolDefinition;

/// Whether the LLM must emit exactly one tool call this turn. The spec's
/// parallel-tool-calls-disabled rule (§5) means this is always `Required`
/// or `None` in practice, never "auto".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolChoice {
    Required,
    None,
}

#[derive(Debug, Clone)]
pub struct ChatTimeouts {
    /// Request-start to last chunk.
    pub overall: Duration,
    /// Between consecutive chunks after the first.
    pub inter_chunk: Duration,
    /// Connection + first chunk, enforced in the application layer.
    pub first_chunk: Duration,
}

impl Default for ChatTimeouts {
    fn default() -> Self {
        Self {
            overall: Duration::from_secs(600),
            inter_chunk: Duration::from_secs(20),
            first_chunk: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub history: Vec<Message>,
    pub model: String,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    pub tool_choice: ToolChoice,
    pub max_retries: u32,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub extra: HashMap<String, serde_json::Value>,
}

impl ChatRequest {
    pub fn new(history: Vec<Message>, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            history,
            model: model.into(),
            system_prompt: system_prompt.into(),
            tools: Vec::new(),
            tool_choice: ToolChoice::Required,
            max_retries: 3,
            temperature: None,
            max_tokens: None,
            extra: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub status: ChatStatus,
    pub output: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    pub model: String,
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Success,
    Error,
}

/// `LLMClient.chat(...)` (§4.7): streaming call with enforced timeouts,
/// retry-with-hint, and JSON repair, built once per process over a shared
/// `Arc<dyn Provider>` connection pool (§9 "one LLM connection pool per
/// process").
pub struct LlmClient {
    provider: Arc<dyn Provider>,
    timeouts: ChatTimeouts,
}

impl LlmClient {
    pub fn new(provider: Arc<dyn Provider>, timeouts: ChatTimeouts) -> Self {
        Self { provider, timeouts }
    }

    pub async fn chat(&self, request: ChatRequest) -> Result<ChatResponse, Error> {
        let mut system_prompt = request.system_prompt.clone();
        let mut attempt = 0u32;
        let mut free_retry_used = false;

        loop {
            let completion_request = self.build_completion_request(&request, &system_prompt);
            match self.stream_once(completion_request).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    if err.is_tool_argument_error() && !free_retry_used {
                        // One free immediate retry with an injected hint,
                        // not counted against max_retries (§4.7).
                        free_retry_used = true;
                        system_prompt.push_str(&format!("\n\n{}", hint_for(&err)));
                        continue;
                    }

                    if !err.is_retryable() || attempt >= request.max_retries {
                        return Ok(ChatResponse {
                            status: ChatStatus::Error,
                            output: String::new(),
                            tool_calls: Vec::new(),
                            model: request.model.clone(),
                            finish_reason: FinishReason::Error,
                            usage: None,
                            error: Some(err.to_string()),
                        });
                    }

                    attempt += 1;
                    system_prompt.push_str(&format!("\n\n{}", hint_for(&err)));
                    tokio::time::sleep(Duration::from_secs(2 * attempt as u64)).await;
                }
            }
        }
    }

    /// Tool schema building (§4.7): when `tool_choice == None`, tool
    /// definitions are omitted entirely — not merely the choice — because
    /// some backends reject "tool_choice without tools".
    fn build_completion_request(&self, request: &ChatRequest, system_prompt: &str) -> CompletionRequest {
        let mut messages = Vec::with_capacity(request.history.len() + 2);
        messages.push(Message::system(system_prompt));
        messages.extend(request.history.iter().cloned());
        messages.push(Message::user("emit the next action"));

        let tools = match request.tool_choice {
            ToolChoice::None => Vec::new(),
            ToolChoice::Required => request.tools.clone(),
        };

        let mut completion = CompletionRequest::new(messages)
            .with_model(request.model.clone())
            .with_tools(tools)
            .with_stream(true);
        if let Some(t) = request.temperature {
            completion = completion.with_temperature(t);
        }
        if let Some(m) = request.max_tokens {
            completion = completion.with_max_tokens(m);
        }
        if !request.extra.is_empty() {
            completion = completion.with_extra(request.extra.clone());
        }
        completion
    }

    async fn stream_once(&self, request: CompletionRequest) -> Result<ChatResponse, Error> {
        let model = request.model.clone().unwrap_or_default();

        let stream_future = self.provider.stream(request);
        let mut stream = tokio::time::timeout(self.timeouts.overall, stream_future)
            .await
            .map_err(|_| Error::timeout(TimeoutKind::Overall))??;

        let mut accumulator = Accumulator::default();
        let mut got_first_chunk = false;

        loop {
            let next = if !got_first_chunk {
                tokio::time::timeout(self.timeouts.first_chunk, stream.next())
                    .await
                    .map_err(|_| Error::timeout(TimeoutKind::FirstChunk))?
            } else {
                tokio::time::timeout(self.timeouts.inter_chunk, stream.next())
                    .await
                    .map_err(|_| Error::timeout(TimeoutKind::InterChunk))?
            };

            got_first_chunk = true;

            match next {
                None => break,
                Some(Ok(chunk)) => {
                    if accumulator.apply(chunk) {
                        break;
                    }
                }
                Some(Err(e)) => return Err(e),
            }
        }

        accumulator.into_response(model)
    }
}

/// Accumulates streamed text/tool-call deltas in order (§4.7: "Text deltas
/// are concatenated in order; tool-call deltas are keyed by their index and
/// the partial {id, name, arguments} are accumulated").
#[derive(Default)]
struct Accumulator {
    text: String,
    tool_calls: Vec<PartialToolCall>,
    usage: Option<Usage>,
    error: Option<String>,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl Accumulator {
    /// Returns `true` when the stream is logically done.
    fn apply(&mut self, chunk: StreamChunk) -> bool {
        match chunk {
            StreamChunk::Start { .. } | StreamChunk::ThinkingDelta { .. } => false,
            StreamChunk::Delta { content } => {
                self.text.push_str(&content);
                false
            }
            StreamChunk::ToolCallStart { id, name } => {
                self.tool_calls.push(PartialToolCall { id, name, arguments: String::new() });
                false
            }
            StreamChunk::ToolCallDelta { arguments } => {
                if let Some(last) = self.tool_calls.last_mut() {
                    last.arguments.push_str(&arguments);
                }
                false
            }
            StreamChunk::Done { usage } => {
                self.usage = usage;
                true
            }
            StreamChunk::Error { message } => {
                self.error = Some(message);
                true
            }
        }
    }

    fn into_response(self, model: String) -> Result<ChatResponse, Error> {
        if let Some(message) = self.error {
            return Err(Error::network(message));
        }

        let mut tool_calls = Vec::with_capacity(self.tool_calls.len());
        for partial in self.tool_calls {
            let arguments = parse_or_repair_arguments(&partial.name, &partial.arguments)?;
            tool_calls.push(ToolCall { id: partial.id, name: partial.name, arguments });
        }

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        };

        Ok(ChatResponse {
            status: ChatStatus::Success,
            output: self.text,
            tool_calls,
            model,
            finish_reason,
            usage: self.usage,
            error: None,
        })
    }
}

/// Parse a streamed tool-argument JSON string, attempting the two repairs
/// named in §4.7 before giving up and returning an empty object rather than
/// aborting the turn: strip trailing commas before `}`/`]`; balance
/// unclosed braces/brackets by appending the missing closers.
fn parse_or_repair_arguments(tool_name: &str, raw: &str) -> Result<serde_json::Value, Error> {
    if raw.trim().is_empty() {
        return Ok(serde_json::json!({}));
    }
    if let Ok(v) = serde_json::from_str(raw) {
        return Ok(v);
    }

    let repaired = repair_json(raw);
    match serde_json::from_str(&repaired) {
        Ok(v) => Ok(v),
        Err(e) => {
            tracing::warn!(tool = tool_name, error = %e, raw = %raw, "tool argument JSON unrepairable, using empty object");
            Ok(serde_json::json!({}))
        }
    }
}

/// Best-effort JSON repair for a streamed, possibly-truncated argument
/// string: strip trailing commas, then balance unclosed braces/brackets.
pub fn repair_json(raw: &str) -> String {
    let no_trailing_commas = strip_trailing_commas(raw);
    balance_braces(&no_trailing_commas)
}

fn strip_trailing_commas(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ',' {
            // Look ahead past whitespace for a closing bracket.
            let mut lookahead = chars.clone();
            let mut only_whitespace = true;
            let mut closes = false;
            for la in lookahead.by_ref() {
                if la.is_whitespace() {
                    continue;
                }
                only_whitespace = false;
                closes = la == '}' || la == ']';
                break;
            }
            if only_whitespace || closes {
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn balance_braces(input: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in input.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                if stack.last() == Some(&c) {
                    stack.pop();
                }
            }
            _ => {}
        }
    }
    let mut out = input.to_string();
    if in_string {
        out.push('"');
    }
    while let Some(closer) = stack.pop() {
        out.push(closer);
    }
    out
}

/// A short, stable contextual hint appended to the system prompt before the
/// next retry (§4.7: "generate a contextual hint from the error class").
fn hint_for(err: &Error) -> String {
    match err {
        Error::ToolArgument { tool, message } => format!(
            "Hint: your previous call to tool '{tool}' had a parameter type error: {message}. \
             Re-emit the call with correctly-typed arguments matching the tool's JSON schema."
        ),
        other => match other.hint_class() {
            "json-parse" => "Hint: your previous response contained malformed JSON. Emit valid JSON only.".to_string(),
            "rate-limit" => "Hint: the previous request was rate-limited; retrying shortly.".to_string(),
            "auth" => "Hint: authentication failed; check API credentials.".to_string(),
            "timeout" => "Hint: the previous request timed out; retrying.".to_string(),
            "network" => "Hint: a transient network error occurred; retrying.".to_string(),
            "unknown-tool" => "Hint: the previous tool name was not recognized. Use only tools listed in available_tools.".to_string(),
            _ => format!("Hint: the previous attempt failed ({other}); retrying."),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn test_repair_json_strips_trailing_comma() {
        let repaired = repair_json(r#"{"a": 1, "b": 2,}"#);
        let parsed: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(parsed["a"], 1);
        assert_eq!(parsed["b"], 2);
    }

    #[test]
    fn test_repair_json_balances_unclosed_braces() {
        let repaired = repair_json(r#"{"a": {"b": 1"#);
        let parsed: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(parsed["a"]["b"], 1);
    }

    #[test]
    fn test_repair_json_balances_unclosed_array() {
        let repaired = repair_json(r#"{"a": [1, 2"#);
        let parsed: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(parsed["a"][0], 1);
    }

    #[test]
    fn test_unrepairable_arguments_become_empty_object() {
        let result = parse_or_repair_arguments("t", "not json at all {{{").unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[test]
    fn test_empty_arguments_become_empty_object() {
        let result = parse_or_repair_arguments("t", "").unwrap();
        assert_eq!(result, serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_tool_choice_none_omits_tools_entirely() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_stream(vec![
            StreamChunk::Delta { content: "hi".into() },
            StreamChunk::Done { usage: None },
        ]);
        let client = LlmClient::new(provider.clone(), ChatTimeouts::default());

        let mut request = ChatRequest::new(vec![], "test-model", "sys");
        request.tool_choice = ToolChoice::None;
        request.tools = vec![ToolDefinition::new("echo", "echoes")];

        client.chat(request).await.unwrap();
        let captured = provider.last_stream_request().unwrap();
        assert!(captured.tools.is_empty());
    }

    #[tokio::test]
    async fn test_chat_accumulates_text_and_tool_calls() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_stream(vec![
            StreamChunk::Delta { content: "thinking".into() },
            StreamChunk::ToolCallStart { id: "c1".into(), name: "final_output".into() },
            StreamChunk::ToolCallDelta { arguments: r#"{"status":"#.into() },
            StreamChunk::ToolCallDelta { arguments: r#""success","output":"done"}"#.into() },
            StreamChunk::Done { usage: Some(Usage::new(10, 5)) },
        ]);
        let client = LlmClient::new(provider, ChatTimeouts::default());

        let response = client.chat(ChatRequest::new(vec![], "m", "sys")).await.unwrap();
        assert_eq!(response.status, ChatStatus::Success);
        assert_eq!(response.output, "thinking");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments["output"], "done");
    }

    #[tokio::test]
    async fn test_retryable_error_retries_then_succeeds() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_stream_error(Error::network("boom"));
        provider.queue_stream(vec![
            StreamChunk::ToolCallStart { id: "c1".into(), name: "final_output".into() },
            StreamChunk::ToolCallDelta { arguments: r#"{"output":"ok"}"#.into() },
            StreamChunk::Done { usage: None },
        ]);
        let client = LlmClient::new(provider, ChatTimeouts::default());

        let response = client.chat(ChatRequest::new(vec![], "m", "sys")).await.unwrap();
        assert_eq!(response.status, ChatStatus::Success);
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_stream_error(Error::auth("bad key"));
        let client = LlmClient::new(provider, ChatTimeouts::default());

        let response = client.chat(ChatRequest::new(vec![], "m", "sys")).await.unwrap();
        assert_eq!(response.status, ChatStatus::Error);
        assert!(response.error.unwrap().contains("bad key"));
    }
}
