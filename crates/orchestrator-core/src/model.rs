//! The data model shared by the Hierarchy Manager, Context Builder, and
//! Agent Executor: instructions, agent instances, the call tree, the
//! activation stack, and per-agent action history.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Depth category of an agent instance. Level 0 is a leaf (cannot recurse
/// into further sub-agents); levels 1-3 may invoke subordinate agents.
pub type AgentLevel = u8;

/// Unique identifier for one agent instance within a task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        AgentId(s)
    }
}

/// A user request. Lifecycle: created by the Hierarchy Manager when a user
/// turn begins; `completion_time` is set when the root agent finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Instruction {
    pub id: String,
    pub instruction: String,
    pub start_time: DateTime<Utc>,
    pub completion_time: Option<DateTime<Utc>>,
}

/// Status of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Completed,
}

/// One activation of an agent definition.
///
/// Invariants: exactly one running agent per stack frame; `parent_id`
/// references an existing agent or is `None`; a completed agent has
/// non-empty `final_output`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInstance {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub level: AgentLevel,
    pub parent_id: Option<AgentId>,
    pub status: AgentStatus,
    pub latest_thinking: String,
    pub final_output: Option<String>,
    pub task_input: String,
}

impl AgentInstance {
    pub fn is_completed(&self) -> bool {
        self.status == AgentStatus::Completed
    }
}

/// One node of the call tree: the parent and the ordered list of children.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HierarchyNode {
    pub parent: Option<AgentId>,
    pub children: Vec<AgentId>,
}

/// The call tree: a forest `agent_id -> { parent, children[] }`.
///
/// Invariant: `children` of a node is exactly the set of agent_ids whose
/// `parent` is that node. Cycles are forbidden; traversal must detect and
/// short-circuit them (see `context_builder::render_call_tree`).
pub type CallTree = HashMap<AgentId, HierarchyNode>;

/// One currently-running frame, root to innermost. The top of the stack is
/// the agent whose LLM is currently being invoked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFrame {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub user_input: String,
    pub start_time: DateTime<Utc>,
}

/// The ordered list of currently-running frames, root to innermost.
pub type ActivationStack = Vec<StackFrame>;

/// Outcome of a single tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub status: ActionStatus,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_information: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Error,
}

/// A single tool invocation within an agent's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: HashMap<String, serde_json::Value>,
    pub result: ActionResult,
}

/// Synthetic tool name used for an LLM-summarized prefix of render history.
pub const HISTORICAL_SUMMARY_TOOL: &str = "_historical_summary";

/// Synthetic tool name recorded when the LLM returns no tool call (§4.5.d).
pub const NO_TOOL_CALL_TOOL: &str = "_no_tool_call";

/// An action recorded as about-to-execute, before the tool has returned. On
/// crash and resume, pending tools are re-executed (§4.5.3, §7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingTool {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: HashMap<String, serde_json::Value>,
}

/// Per-agent persisted state: both history lists, pending tools, and
/// turn-loop bookkeeping (§3 "Action Record", §4.5 checkpoint fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentActions {
    /// Working context handed to the LLM; lossy, subject to compression.
    pub render_history: Vec<ActionRecord>,
    /// Complete, never-compressed trace (audit log).
    pub fact_history: Vec<ActionRecord>,
    pub pending_tools: Vec<PendingTool>,
    pub latest_thinking: String,
    pub first_thinking_done: bool,
    pub current_turn: u64,
    pub tool_call_counter: u64,
    /// Last rendered system prompt snapshot, kept for diagnostics/resume.
    #[serde(default)]
    pub last_system_prompt: String,
}

impl Default for AgentActions {
    fn default() -> Self {
        Self {
            render_history: Vec::new(),
            fact_history: Vec::new(),
            pending_tools: Vec::new(),
            latest_thinking: String::new(),
            first_thinking_done: false,
            current_turn: 0,
            tool_call_counter: 0,
            last_system_prompt: String::new(),
        }
    }
}

impl AgentActions {
    /// True once a `final_output` call terminates the fact history (§8:
    /// "exactly one final_output action ends any completed agent's fact
    /// history; once present, subsequent run() invocations return without
    /// any new LLM calls").
    pub fn has_final_output(&self) -> bool {
        self.fact_history
            .last()
            .is_some_and(|r| r.tool_name == "final_output")
    }

    pub fn final_output_result(&self) -> Option<&ActionRecord> {
        self.fact_history
            .last()
            .filter(|r| r.tool_name == "final_output")
    }
}

/// The live, mutable half of a task: instructions, hierarchy, agent status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentTask {
    pub instructions: Vec<Instruction>,
    pub hierarchy: CallTree,
    pub agents_status: HashMap<AgentId, AgentInstance>,
    /// Memoized digest of prior instructions' outcomes (§4.3 rule 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compressed_user_agent_history: Option<String>,
    /// Memoized per-viewing-agent digest of the call tree (§4.3 rule 2).
    #[serde(default)]
    pub compressed_structured_call_info: HashMap<AgentId, String>,
}

impl Default for CurrentTask {
    fn default() -> Self {
        Self {
            instructions: Vec::new(),
            hierarchy: CallTree::new(),
            agents_status: HashMap::new(),
            compressed_user_agent_history: None,
            compressed_structured_call_info: HashMap::new(),
        }
    }
}

/// A prior instruction and its completed subtree, moved out of `current`
/// by `archive_current` / the State Cleaner's new-task mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub instructions: Vec<Instruction>,
    pub hierarchy: CallTree,
    pub agents_status: HashMap<AgentId, AgentInstance>,
    pub completion_time: DateTime<Utc>,
}

/// Per-task persisted object: `current` plus archived `history`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskContext {
    pub current: CurrentTask,
    pub history: Vec<HistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_actions_final_output_detection() {
        let mut actions = AgentActions::default();
        assert!(!actions.has_final_output());

        actions.fact_history.push(ActionRecord {
            call_id: "c1".into(),
            tool_name: "echo_tool".into(),
            arguments: HashMap::new(),
            result: ActionResult {
                status: ActionStatus::Success,
                output: "hi".into(),
                error_information: None,
            },
        });
        assert!(!actions.has_final_output());

        actions.fact_history.push(ActionRecord {
            call_id: "c2".into(),
            tool_name: "final_output".into(),
            arguments: HashMap::new(),
            result: ActionResult {
                status: ActionStatus::Success,
                output: "done".into(),
                error_information: None,
            },
        });
        assert!(actions.has_final_output());
        assert_eq!(actions.final_output_result().unwrap().call_id, "c2");
    }

    #[test]
    fn test_task_context_roundtrip() {
        let ctx = TaskContext::default();
        let json = serde_json::to_string(&ctx).unwrap();
        let back: TaskContext = serde_json::from_str(&json).unwrap();
        assert!(back.current.instructions.is_empty());
        assert!(back.history.is_empty());
    }
}
