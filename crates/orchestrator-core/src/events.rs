//! Structured JSONL event stream (§6): one `Event` per emitted line, with a
//! `type` field in `{start, progress, token, tool_call, agent_call, notice,
//! warn, error, result, end}`. The sink is constructed once per driver
//! invocation and threaded explicitly into the `AgentExecutor`, mirroring
//! the teacher's `AgentProgressHandler`/`AgentEventBus` pattern in
//! `qq-cli/src/event_bus.rs` rather than a process-wide singleton.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Start {
        agent: String,
    },
    Progress {
        agent: String,
        text: String,
    },
    Token {
        agent: String,
        text: String,
    },
    ToolCall {
        agent: String,
        tool_name: String,
        parameters: serde_json::Value,
    },
    AgentCall {
        agent: String,
        tool_name: String,
    },
    Notice {
        agent: String,
        text: String,
    },
    Warn {
        agent: String,
        text: String,
    },
    Error {
        agent: String,
        text: String,
    },
    Result {
        agent: String,
        ok: bool,
        summary: String,
    },
    End {
        status: String,
        duration_ms: u64,
    },
}

/// Receives `Event`s as the executor produces them. Implementations decide
/// how to render them (JSONL to stdout, a broadcast channel for a TUI,
/// dropped entirely via `NullEventSink`).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event);
}

/// The default sink: discards every event. Used when no front end is
/// attached, so the executor never has to special-case "no listener".
pub struct NullEventSink;

#[async_trait]
impl EventSink for NullEventSink {
    async fn emit(&self, _event: Event) {}
}
