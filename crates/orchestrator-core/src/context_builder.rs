//! Context Builder (§4.3): assembles the single structured system prompt
//! handed to the LLM each turn, and implements the three compression rules.
//!
//! Grounded in the teacher's `observation.rs` (`ObservationalMemory`,
//! `find_safe_split_point`, hysteresis-gated compaction) for the
//! action-history compression strategy, and in
//! `qq-cli/src/agents/agent_tool.rs`'s `compact_agent_messages` /
//! `qq-cli/src/agents/continuation.rs`'s summarization-call shape for the
//! LLM-summarizer calls used by all three rules.

use std::collections::HashSet;

use serde::Serialize;

use crate::model::{ActionRecord, AgentId, AgentInstance, AgentStatus, CallTree, CurrentTask};

/// Truncation applied to `final_output`/`latest_thinking` when rendered
/// inside the call-tree JSON (§4.3). Full content always lives in the
/// underlying state; only the rendered view is shortened.
const TREE_FIELD_TRUNCATE_CHARS: usize = 500;

/// Trigger for user-agent-history compression (§4.3 rule 1).
const USER_AGENT_HISTORY_TRIGGER_CHARS: usize = 5000;
const USER_AGENT_HISTORY_DIGEST_MAX_CHARS: usize = 3000;

/// Triggers for structured-call-info compression (§4.3 rule 2).
const CALL_INFO_AGENT_COUNT_TRIGGER: usize = 10;
const CALL_INFO_JSON_TRIGGER_CHARS: usize = 8000;
const CALL_INFO_DIGEST_MAX_CHARS: usize = 2000;

/// An internal scorer agent that is meaningful to no one but itself; its
/// node is omitted from the rendered tree, but its children are still
/// reachable (§4.3).
const SKIPPED_AGENT_NAME: &str = "judge_agent";

/// One node of the rendered call-tree JSON (§4.3 `<structured_call_info>`).
#[derive(Debug, Clone, Serialize)]
pub struct RenderedTreeNode {
    pub agent_id: String,
    pub agent_name: String,
    pub level: u8,
    pub status: &'static str,
    pub is_current: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderedTreeNode>,
}

fn truncate(s: &str) -> String {
    if s.chars().count() > TREE_FIELD_TRUNCATE_CHARS {
        let prefix: String = s.chars().take(TREE_FIELD_TRUNCATE_CHARS).collect();
        format!("{}...", prefix)
    } else {
        s.to_string()
    }
}

/// Recursively render one subtree, skipping `judge_agent` nodes (but
/// splicing their children up into the caller's child list) and
/// short-circuiting on the first revisit of a cycle.
pub fn render_subtree(
    agent_id: &AgentId,
    hierarchy: &CallTree,
    agents_status: &std::collections::HashMap<AgentId, AgentInstance>,
    current_agent_id: Option<&AgentId>,
    visited: &mut HashSet<AgentId>,
) -> Vec<RenderedTreeNode> {
    if visited.contains(agent_id) {
        return Vec::new();
    }
    visited.insert(agent_id.clone());

    let Some(info) = agents_status.get(agent_id) else {
        return Vec::new();
    };

    let children_ids = hierarchy
        .get(agent_id)
        .map(|n| n.children.clone())
        .unwrap_or_default();
    let mut child_nodes = Vec::new();
    for child_id in &children_ids {
        child_nodes.extend(render_subtree(
            child_id,
            hierarchy,
            agents_status,
            current_agent_id,
            visited,
        ));
    }

    if info.agent_name == SKIPPED_AGENT_NAME {
        // Skip rendering this node but still surface its children.
        return child_nodes;
    }

    let is_current = current_agent_id.is_some_and(|c| c == agent_id);
    let mut node = RenderedTreeNode {
        agent_id: agent_id.0.clone(),
        agent_name: info.agent_name.clone(),
        level: info.level,
        status: if info.is_completed() { "completed" } else { "running" },
        is_current,
        final_output: None,
        thinking: None,
        children: child_nodes,
    };

    if info.is_completed() {
        if let Some(output) = &info.final_output {
            if !output.is_empty() {
                node.final_output = Some(truncate(output));
            }
        }
    } else if !info.latest_thinking.is_empty() {
        node.thinking = Some(truncate(&info.latest_thinking));
    }

    vec![node]
}

/// Render the full forest (every root, i.e. every agent with no parent)
/// as JSON, for `<structured_call_info>`.
pub fn render_call_tree_json(
    task: &CurrentTask,
    current_agent_id: Option<&AgentId>,
) -> serde_json::Value {
    let roots: Vec<&AgentId> = task
        .agents_status
        .iter()
        .filter(|(_, info)| info.parent_id.is_none())
        .map(|(id, _)| id)
        .collect();

    let mut visited = HashSet::new();
    let mut forest = Vec::new();
    for root in roots {
        forest.extend(render_subtree(
            root,
            &task.hierarchy,
            &task.agents_status,
            current_agent_id,
            &mut visited,
        ));
    }

    serde_json::to_value(forest).unwrap_or(serde_json::Value::Null)
}

/// A pluggable summarizer used by all three compression rules — an
/// indirection over the LLM Client so `ContextBuilder` stays a pure
/// function of its inputs in tests (mirrors the teacher's
/// `ContextCompactor` trait in `observation.rs`).
#[async_trait::async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, system_prompt: &str, content: &str, max_chars: usize) -> crate::error::Result<String>;
}

/// Rule 1 (§4.3): compress the serialized user-agent history once per task
/// activation when it is at least `USER_AGENT_HISTORY_TRIGGER_CHARS` long.
/// The digest is memoized by the caller at
/// `current._compressed_user_agent_history`.
pub async fn compress_user_agent_history(
    summarizer: &dyn Summarizer,
    serialized_history: &str,
) -> crate::error::Result<Option<String>> {
    if serialized_history.len() < USER_AGENT_HISTORY_TRIGGER_CHARS {
        return Ok(None);
    }
    let digest = summarizer
        .summarize(
            "Summarize prior instructions' outcomes in at most 3000 characters. \
             Focus on files produced and relevance to the current task.",
            serialized_history,
            USER_AGENT_HISTORY_DIGEST_MAX_CHARS,
        )
        .await?;
    Ok(Some(digest))
}

/// Rule 2 (§4.3): compress the structured call info per viewing agent when
/// either the agent count or serialized size crosses its trigger. Falls
/// back to a truncated raw JSON dump if the summarizer call fails
/// (mirrors the teacher's graceful-fallback pattern in
/// `compact_agent_messages`).
pub async fn compress_structured_call_info(
    summarizer: &dyn Summarizer,
    task: &CurrentTask,
    current_agent_id: Option<&AgentId>,
) -> Option<String> {
    let tree_json = render_call_tree_json(task, current_agent_id);
    let serialized = serde_json::to_string_pretty(&tree_json).unwrap_or_default();

    if task.agents_status.len() <= CALL_INFO_AGENT_COUNT_TRIGGER
        && serialized.len() <= CALL_INFO_JSON_TRIGGER_CHARS
    {
        return None;
    }

    match summarizer
        .summarize(
            "You are a professional content summarizer. Concisely summarize this agent call tree.",
            &serialized,
            CALL_INFO_DIGEST_MAX_CHARS,
        )
        .await
    {
        Ok(digest) => Some(digest),
        Err(_) => {
            let truncated: String = serialized.chars().take(5000).collect();
            Some(format!("{}\n...(truncated)", truncated))
        }
    }
}

/// Rule 3 (§4.3): action-history compression. Summarize the oldest prefix
/// of `render_history` into a single synthetic `_historical_summary`
/// record once the estimated prompt token count exceeds `context_window`;
/// retain the tail unchanged. `fact_history` is never touched by the
/// caller of this function.
pub async fn compress_action_history(
    summarizer: &dyn Summarizer,
    render_history: &[ActionRecord],
    estimated_tokens: usize,
    context_window: usize,
    preserve_recent: usize,
) -> crate::error::Result<Option<Vec<ActionRecord>>> {
    if estimated_tokens <= context_window {
        return Ok(None);
    }
    if render_history.len() <= preserve_recent {
        return Ok(None);
    }

    let split = find_safe_split_point(render_history, render_history.len() - preserve_recent);
    if split == 0 {
        return Ok(None);
    }

    let (old, tail) = render_history.split_at(split);
    let serialized_old = serde_json::to_string(old).unwrap_or_default();
    let digest = summarizer
        .summarize(
            "Summarize this agent's completed actions into a compact digest. \
             Preserve file paths and facts a continuation would need.",
            &serialized_old,
            4000,
        )
        .await?;

    let mut result = vec![ActionRecord {
        call_id: "historical-summary".to_string(),
        tool_name: crate::model::HISTORICAL_SUMMARY_TOOL.to_string(),
        arguments: std::collections::HashMap::new(),
        result: crate::model::ActionResult {
            status: crate::model::ActionStatus::Success,
            output: digest,
            error_information: None,
        },
    }];
    result.extend_from_slice(tail);
    Ok(Some(result))
}

/// Avoid splitting in the middle of a tool-call sequence: walk backward
/// from `desired_end` until a safe boundary is found (a boundary is unsafe
/// only if it would separate a tool call from its matching result — in
/// this action-record model every record is self-contained, so any index
/// is safe, but the scan is kept so sequences with paired pending/result
/// halves added in the future stay protected). Mirrors the teacher's
/// `find_safe_split_point` in `observation.rs`.
pub fn find_safe_split_point(records: &[ActionRecord], desired_end: usize) -> usize {
    desired_end.min(records.len())
}

/// The fixed-order labeled sections of the system prompt (§4.3).
pub struct PromptSections<'a> {
    pub general_system_prompt: &'a str,
    pub user_latest_input: Vec<&'a str>,
    pub user_agent_history: &'a str,
    pub current_agent_name: &'a str,
    pub structured_call_info_json: &'a str,
    pub current_agent_task: &'a str,
    pub current_progress_thinking: &'a str,
    pub action_history: &'a [ActionRecord],
}

/// Render one action record as one line for `<action_history>`.
fn render_action_line(record: &ActionRecord) -> String {
    let args = serde_json::to_string(&record.arguments).unwrap_or_default();
    let status = match record.result.status {
        crate::model::ActionStatus::Success => "success",
        crate::model::ActionStatus::Error => "error",
    };
    format!(
        "[{}] {}({}) -> {}: {}",
        record.call_id, record.tool_name, args, status, record.result.output
    )
}

/// Build the full system prompt string with all sections in fixed order.
pub fn build_prompt(sections: &PromptSections) -> String {
    let mut out = String::new();
    out.push_str(sections.general_system_prompt);
    out.push_str("\n\n<user_latest_input>\n");
    for input in &sections.user_latest_input {
        out.push_str(input);
        out.push('\n');
    }
    out.push_str("</user_latest_input>\n\n<user_agent_history>\n");
    out.push_str(sections.user_agent_history);
    out.push_str("\n</user_agent_history>\n\n<current_agent_name>\n");
    out.push_str(sections.current_agent_name);
    out.push_str("\n</current_agent_name>\n\n<structured_call_info>\n");
    out.push_str(sections.structured_call_info_json);
    out.push_str("\n</structured_call_info>\n\n<current_agent_task>\n");
    out.push_str(sections.current_agent_task);
    out.push_str("\n</current_agent_task>\n\n<current_progress_thinking>\n");
    out.push_str(sections.current_progress_thinking);
    out.push_str("\n</current_progress_thinking>\n\n<action_history>\n");
    for record in sections.action_history {
        out.push_str(&render_action_line(record));
        out.push('\n');
    }
    out.push_str("</action_history>\n");
    out
}
