//! JSONL rendering of the orchestrator's event stream (§6): one `Event` per
//! line on stdout. Constructed once per driver invocation and handed to the
//! `AgentExecutor` via `with_event_sink`, per §9's "construct at driver
//! entry, pass explicitly" note — no process-wide singleton.

use std::io::Write;
use std::sync::Mutex;

use async_trait::async_trait;
use orchestrator_core::{Event, EventSink};

pub struct JsonlEventSink {
    out: Mutex<std::io::Stdout>,
}

impl JsonlEventSink {
    pub fn new() -> Self {
        Self { out: Mutex::new(std::io::stdout()) }
    }
}

impl Default for JsonlEventSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventSink for JsonlEventSink {
    async fn emit(&self, event: Event) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize event, dropping");
                return;
            }
        };
        let mut out = self.out.lock().unwrap();
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_does_not_panic() {
        let sink = JsonlEventSink::new();
        sink.emit(Event::Start { agent: "root_agent".to_string() }).await;
    }
}
