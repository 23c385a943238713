//! Tool Executor (§4.4): routes one tool call to its handler based on the
//! tool's configured kind, without the caller needing to know which kind it
//! invoked until the result comes back.
//!
//! Grounded in `original_source/core/tool_executor.py`'s three-way dispatch
//! (`final_output` handled inline, `tool_call_agent` -> HTTP call to the
//! tool server, `llm_call_agent` -> recursive sub-agent invocation) and in
//! the teacher's `agents/agent_tool.rs` for the Rust shape of "an agent
//! exposed as a callable tool" (trait-object indirection to keep the
//! recursive call out of a hard dependency cycle).

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::hierarchy::random8;
use crate::model::{ActionResult, ActionStatus, AgentLevel};

/// How one named tool resolves, per §9's design note replacing the
/// original's string-typed `tool_config["type"]` with a closed tagged
/// union decided once at config-load time.
#[derive(Debug, Clone)]
pub enum ToolKind {
    /// Terminates the calling agent; handled entirely in-process.
    FinalOutput,
    /// Dispatched over HTTP to the tool server.
    ExternalTool { schema: serde_json::Value },
    /// Recursively invokes another agent definition.
    SubAgent { agent_name: String, level: AgentLevel },
}

/// The resolved set of tools available to one agent, keyed by tool name.
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, ToolKind>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn insert(&mut self, name: impl Into<String>, kind: ToolKind) {
        self.tools.insert(name.into(), kind);
    }

    pub fn get(&self, name: &str) -> Option<&ToolKind> {
        self.tools.get(name)
    }
}

/// Arguments understood by the built-in `final_output` tool.
#[derive(Debug, Clone, Deserialize)]
pub struct FinalOutputArgs {
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error_information: String,
}

fn default_status() -> String {
    "success".to_string()
}

/// HTTP dispatch to the tool server (§6.1). Implemented by
/// `orchestrator-tools`; kept as a trait here so `orchestrator-core` does
/// not depend on the HTTP client crate.
#[async_trait]
pub trait ToolServerClient: Send + Sync {
    async fn execute(
        &self,
        task_id: &str,
        tool_name: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, Error>;
}

/// Manual-mode pre-execution confirmation channel (§4.4). Implemented by
/// `orchestrator-tools`'s `ConfirmationClient`, which creates the pending
/// confirmation on the tool server and polls it to resolution; kept as a
/// trait here for the same reason as `ToolServerClient`.
#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    /// Returns `Ok(true)` if approved, `Ok(false)` if rejected.
    async fn await_approval(
        &self,
        task_id: &str,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<bool, Error>;
}

/// Recursive sub-agent invocation. Implemented by `AgentExecutor` itself;
/// kept as a trait so `tool_executor` and `agent_executor` can reference
/// each other without either module needing the other's concrete type at
/// construction time (mirrors the original's function-local import of
/// `AgentExecutor` inside `_execute_sub_agent` to dodge a circular import,
/// and the teacher's trait-object `Arc<dyn Provider>` indirection).
#[async_trait]
pub trait SubAgentRunner: Send + Sync {
    async fn run_sub_agent(
        &self,
        agent_name: &str,
        level: AgentLevel,
        task_input: &str,
    ) -> Result<ActionResult, Error>;
}

pub struct ToolExecutor<'a> {
    catalog: &'a ToolCatalog,
    tool_server: &'a dyn ToolServerClient,
    sub_agent_runner: &'a dyn SubAgentRunner,
    manual_mode: Option<(&'a [String], &'a dyn ConfirmationGate)>,
}

impl<'a> ToolExecutor<'a> {
    pub fn new(
        catalog: &'a ToolCatalog,
        tool_server: &'a dyn ToolServerClient,
        sub_agent_runner: &'a dyn SubAgentRunner,
    ) -> Self {
        Self { catalog, tool_server, sub_agent_runner, manual_mode: None }
    }

    /// Gate external-tool calls named in `whitelist` behind `gate` (§4.4's
    /// pre-execution confirmation hook). A no-op unless manual mode is on.
    pub fn with_manual_mode(mut self, whitelist: &'a [String], gate: &'a dyn ConfirmationGate) -> Self {
        self.manual_mode = Some((whitelist, gate));
        self
    }

    /// Execute one tool call by name (§4.4). Unknown tool names resolve to
    /// an `Error` result rather than a fatal `Err`, since an unresolvable
    /// tool call is ordinary LLM-caused turn failure, not a defect in the
    /// executor itself.
    pub async fn execute(
        &self,
        task_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> ActionResult {
        let Some(kind) = self.catalog.get(tool_name) else {
            return ActionResult {
                status: ActionStatus::Error,
                output: String::new(),
                error_information: Some(format!("unknown tool: {}", tool_name)),
            };
        };

        if let ToolKind::ExternalTool { .. } = kind {
            if let Some((whitelist, gate)) = self.manual_mode {
                if whitelist.iter().any(|w| w == tool_name) {
                    match gate.await_approval(task_id, tool_name, &arguments).await {
                        Ok(true) => {}
                        Ok(false) => {
                            return ActionResult {
                                status: ActionStatus::Error,
                                output: String::new(),
                                error_information: Some(format!("tool '{}' rejected by user", tool_name)),
                            };
                        }
                        Err(e) => {
                            return ActionResult {
                                status: ActionStatus::Error,
                                output: String::new(),
                                error_information: Some(format!("confirmation failed: {}", e)),
                            };
                        }
                    }
                }
            }
        }

        match kind {
            ToolKind::FinalOutput => self.execute_final_output(arguments),
            ToolKind::ExternalTool { .. } => self.execute_external_tool(task_id, tool_name, arguments).await,
            ToolKind::SubAgent { agent_name, level } => {
                self.execute_sub_agent(agent_name, *level, arguments).await
            }
        }
    }

    fn execute_final_output(&self, arguments: serde_json::Value) -> ActionResult {
        let args: FinalOutputArgs = match serde_json::from_value(arguments) {
            Ok(a) => a,
            Err(e) => {
                return ActionResult {
                    status: ActionStatus::Error,
                    output: String::new(),
                    error_information: Some(format!("invalid final_output arguments: {}", e)),
                }
            }
        };

        let status = if args.status == "success" {
            ActionStatus::Success
        } else {
            ActionStatus::Error
        };
        ActionResult {
            status,
            output: args.output,
            error_information: if args.error_information.is_empty() {
                None
            } else {
                Some(args.error_information)
            },
        }
    }

    async fn execute_external_tool(
        &self,
        task_id: &str,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> ActionResult {
        match self.tool_server.execute(task_id, tool_name, &arguments).await {
            Ok(data) => ActionResult {
                status: ActionStatus::Success,
                output: serde_json::to_string_pretty(&data).unwrap_or_default(),
                error_information: None,
            },
            Err(e) => ActionResult {
                status: ActionStatus::Error,
                output: String::new(),
                error_information: Some(e.to_string()),
            },
        }
    }

    /// Recurse into a sub-agent. Applies the UUID cache-busting
    /// augmentation (§9): non-leaf sub-agent calls get a unique marker
    /// appended to `task_input` so identical task text does not collide
    /// with a cached LLM response across separate invocations.
    async fn execute_sub_agent(
        &self,
        agent_name: &str,
        level: AgentLevel,
        arguments: serde_json::Value,
    ) -> ActionResult {
        let task_input = arguments
            .get("task_input")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let augmented = if level > 0 {
            format!("{} [call-{}]", task_input, random8())
        } else {
            task_input
        };

        match self
            .sub_agent_runner
            .run_sub_agent(agent_name, level, &augmented)
            .await
        {
            Ok(result) => result,
            Err(e) => ActionResult {
                status: ActionStatus::Error,
                output: String::new(),
                error_information: Some(format!("sub-agent '{}' failed: {}", agent_name, e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubToolServer;

    #[async_trait]
    impl ToolServerClient for StubToolServer {
        async fn execute(
            &self,
            _task_id: &str,
            _tool_name: &str,
            _params: &serde_json::Value,
        ) -> Result<serde_json::Value, Error> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    struct StubSubAgentRunner;

    #[async_trait]
    impl SubAgentRunner for StubSubAgentRunner {
        async fn run_sub_agent(
            &self,
            agent_name: &str,
            _level: AgentLevel,
            task_input: &str,
        ) -> Result<ActionResult, Error> {
            Ok(ActionResult {
                status: ActionStatus::Success,
                output: format!("{} handled: {}", agent_name, task_input),
                error_information: None,
            })
        }
    }

    #[tokio::test]
    async fn test_final_output_dispatch() {
        let mut catalog = ToolCatalog::new();
        catalog.insert("final_output", ToolKind::FinalOutput);
        let server = StubToolServer;
        let runner = StubSubAgentRunner;
        let executor = ToolExecutor::new(&catalog, &server, &runner);

        let result = executor
            .execute(
                "task1",
                "final_output",
                serde_json::json!({"status": "success", "output": "done"}),
            )
            .await;

        assert_eq!(result.status, ActionStatus::Success);
        assert_eq!(result.output, "done");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error_result_not_panic() {
        let catalog = ToolCatalog::new();
        let server = StubToolServer;
        let runner = StubSubAgentRunner;
        let executor = ToolExecutor::new(&catalog, &server, &runner);

        let result = executor.execute("task1", "nonexistent", serde_json::json!({})).await;
        assert_eq!(result.status, ActionStatus::Error);
        assert!(result.error_information.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn test_external_tool_dispatch() {
        let mut catalog = ToolCatalog::new();
        catalog.insert(
            "search_web",
            ToolKind::ExternalTool { schema: serde_json::json!({}) },
        );
        let server = StubToolServer;
        let runner = StubSubAgentRunner;
        let executor = ToolExecutor::new(&catalog, &server, &runner);

        let result = executor.execute("task1", "search_web", serde_json::json!({"q": "x"})).await;
        assert_eq!(result.status, ActionStatus::Success);
        assert!(result.output.contains("ok"));
    }

    #[tokio::test]
    async fn test_sub_agent_dispatch_augments_task_input_for_non_leaf() {
        let mut catalog = ToolCatalog::new();
        catalog.insert(
            "Agent[researcher]",
            ToolKind::SubAgent { agent_name: "researcher".to_string(), level: 1 },
        );
        let server = StubToolServer;
        let runner = StubSubAgentRunner;
        let executor = ToolExecutor::new(&catalog, &server, &runner);

        let result = executor
            .execute(
                "task1",
                "Agent[researcher]",
                serde_json::json!({"task_input": "find facts"}),
            )
            .await;

        assert_eq!(result.status, ActionStatus::Success);
        assert!(result.output.contains("find facts"));
        assert!(result.output.contains("[call-"));
    }

    struct StubGate {
        approve: bool,
    }

    #[async_trait]
    impl ConfirmationGate for StubGate {
        async fn await_approval(
            &self,
            _task_id: &str,
            _tool_name: &str,
            _arguments: &serde_json::Value,
        ) -> Result<bool, Error> {
            Ok(self.approve)
        }
    }

    #[tokio::test]
    async fn test_manual_mode_blocks_whitelisted_tool_until_approved() {
        let mut catalog = ToolCatalog::new();
        catalog.insert("file_write", ToolKind::ExternalTool { schema: serde_json::json!({}) });
        let server = StubToolServer;
        let runner = StubSubAgentRunner;
        let whitelist = vec!["file_write".to_string()];
        let gate = StubGate { approve: true };
        let executor = ToolExecutor::new(&catalog, &server, &runner).with_manual_mode(&whitelist, &gate);

        let result = executor.execute("task1", "file_write", serde_json::json!({})).await;
        assert_eq!(result.status, ActionStatus::Success);
    }

    #[tokio::test]
    async fn test_manual_mode_rejected_tool_returns_error_result() {
        let mut catalog = ToolCatalog::new();
        catalog.insert("file_write", ToolKind::ExternalTool { schema: serde_json::json!({}) });
        let server = StubToolServer;
        let runner = StubSubAgentRunner;
        let whitelist = vec!["file_write".to_string()];
        let gate = StubGate { approve: false };
        let executor = ToolExecutor::new(&catalog, &server, &runner).with_manual_mode(&whitelist, &gate);

        let result = executor.execute("task1", "file_write", serde_json::json!({})).await;
        assert_eq!(result.status, ActionStatus::Error);
        assert!(result.error_information.unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_manual_mode_non_whitelisted_tool_bypasses_gate() {
        let mut catalog = ToolCatalog::new();
        catalog.insert("search_web", ToolKind::ExternalTool { schema: serde_json::json!({}) });
        let server = StubToolServer;
        let runner = StubSubAgentRunner;
        let whitelist = vec!["file_write".to_string()];
        let gate = StubGate { approve: false };
        let executor = ToolExecutor::new(&catalog, &server, &runner).with_manual_mode(&whitelist, &gate);

        let result = executor.execute("task1", "search_web", serde_json::json!({})).await;
        assert_eq!(result.status, ActionStatus::Success);
    }

    #[tokio::test]
    async fn test_sub_agent_dispatch_leaf_level_no_augmentation() {
        let mut catalog = ToolCatalog::new();
        catalog.insert(
            "Agent[leaf]",
            ToolKind::SubAgent { agent_name: "leaf".to_string(), level: 0 },
        );
        let server = StubToolServer;
        let runner = StubSubAgentRunner;
        let executor = ToolExecutor::new(&catalog, &server, &runner);

        let result = executor
            .execute("task1", "Agent[leaf]", serde_json::json!({"task_input": "find facts"}))
            .await;

        assert!(!result.output.contains("[call-"));
    }
}
