//! orchestrator-core: hierarchy manager, context builder, tool executor,
//! agent executor, LLM client, and state cleaner for the hierarchical
//! multi-agent orchestrator.
//!
//! This crate owns every piece of the orchestration engine that has no
//! external-process boundary: the call tree and activation stack, prompt
//! assembly and its three compression rules, dispatch of one tool call to
//! either the tool server or a recursive sub-agent, the perceive-act loop
//! that drives one agent turn to the next, and reconciliation of persisted
//! state across process restarts.

pub mod context_builder;
pub mod error;
pub mod events;
pub mod executor;
pub mod fingerprint;
pub mod hierarchy;
pub mod llm_client;
pub mod message;
pub mod model;
pub mod persistence;
pub mod provider;
pub mod state_cleaner;
pub mod tool;
pub mod tool_executor;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use context_builder::{
    build_prompt, compress_action_history, compress_structured_call_info,
    compress_user_agent_history, render_call_tree_json, PromptSections, RenderedTreeNode,
    Summarizer,
};
pub use error::{Error, TimeoutKind};
pub use events::{Event, EventSink, NullEventSink};
pub use fingerprint::{hash8, task_fingerprint};
pub use hierarchy::{random8, HierarchyManager, TaskContextSnapshot};
pub use llm_client::{ChatRequest, ChatResponse, ChatStatus, ChatTimeouts, LlmClient, ToolChoice};
pub use message::{
    strip_thinking_tags, Content, ContentPart, Message, Role, StreamChunk, ToolCall, ToolResult,
    Usage,
};
pub use model::{
    ActionRecord, ActionResult, ActionStatus, AgentActions, AgentId, AgentInstance, AgentLevel,
    AgentStatus, CallTree, CurrentTask, HierarchyNode, HistoryEntry, Instruction, PendingTool,
    StackFrame, TaskContext, HISTORICAL_SUMMARY_TOOL, NO_TOOL_CALL_TOOL,
};
pub use persistence::{PersistenceStore, RecordKind};
pub use provider::{CompletionRequest, CompletionResponse, FinishReason, Provider, StreamResult};
pub use state_cleaner::{clean_before_start, CleanOutcome};
pub use tool::{PropertySchema, ToolDefinition, ToolParameters};
pub use tool_executor::{
    ConfirmationGate, FinalOutputArgs, SubAgentRunner, ToolCatalog, ToolExecutor, ToolKind,
    ToolServerClient,
};
pub use executor::{AgentExecutor, AgentExecutorConfig, AgentLibrary, AgentSpec, TurnOutcome};

pub type Result<T> = std::result::Result<T, Error>;
