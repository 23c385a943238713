//! State Cleaner / Resume (§4.6): reconciles persisted state before a new
//! user turn begins.
//!
//! Grounded precisely in `original_source/core/state_cleaner.py`'s
//! `clean_before_start`: classify agents into completed/running, decide
//! same-task vs new-task by comparing the new input against the last
//! persisted instruction's text, archive an interrupted task's top-level
//! running agent into history when the task changed, and always clear the
//! activation stack.

use std::collections::HashMap;

use chrono::Utc;

use crate::model::{AgentId, AgentInstance, AgentStatus, CallTree, CurrentTask, HistoryEntry};

const ARCHIVE_HEADER: &str = "【中断任务归档】";
const NO_THINKING_PLACEHOLDER: &str = "(无思考记录)";

/// Outcome of one `clean_before_start` pass, for logging/testing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    /// `current` was empty; nothing to do.
    NothingToClean,
    /// Input matched the last instruction: running agents are kept as-is.
    ResumedSameTask { running: usize, completed: usize },
    /// Input differed: running agents were archived (if any) and `current`
    /// was reset for a fresh task.
    ArchivedAndReset { archived: bool, completed_kept: usize },
}

/// Reconcile `current` in place before starting `new_user_input`. Always
/// returns a `CurrentTask` with the stack-clearing already implied — the
/// caller is responsible for calling `HierarchyManager::clear_stack`
/// afterward, since the stack itself is not part of `CurrentTask`.
///
/// Returns `(new_current, outcome, archived_history_entry)`; the caller
/// pushes the third element onto `TaskContext::history` when present. This
/// is returned directly rather than stashed in a side channel so the
/// result cannot be read back on the wrong executor thread under tokio's
/// multi-threaded scheduler.
pub fn clean_before_start(
    current: CurrentTask,
    new_user_input: Option<&str>,
) -> (CurrentTask, CleanOutcome, Option<HistoryEntry>) {
    if current.agents_status.is_empty() {
        return (current, CleanOutcome::NothingToClean, None);
    }

    let is_same_task = match (current.instructions.last(), new_user_input) {
        (Some(last), Some(input)) => last.instruction == input,
        _ => false,
    };

    let mut completed_agents: HashMap<AgentId, AgentInstance> = HashMap::new();
    let mut completed_hierarchy: CallTree = CallTree::new();
    let mut running_agents: HashMap<AgentId, AgentInstance> = HashMap::new();

    for (id, info) in current.agents_status.iter() {
        if info.status == AgentStatus::Completed {
            completed_agents.insert(id.clone(), info.clone());
            if let Some(node) = current.hierarchy.get(id) {
                completed_hierarchy.insert(id.clone(), node.clone());
            }
        } else {
            running_agents.insert(id.clone(), info.clone());
        }
    }

    // Drop child references to agents that did not survive into
    // completed_hierarchy (mirrors the Python's children-filter pass).
    for node in completed_hierarchy.values_mut() {
        node.children.retain(|c| completed_agents.contains_key(c));
    }

    let running_count = running_agents.len();
    let mut archived = false;
    let mut history_entry: Option<HistoryEntry> = None;

    if running_count > 0 && !is_same_task {
        let top_running = running_agents
            .iter()
            .find(|(id, _)| current.hierarchy.get(*id).and_then(|n| n.parent.as_ref()).is_none());

        if let Some((top_id, top_info)) = top_running {
            let top_id = top_id.clone();
            let mut top_info = top_info.clone();

            let thinking = if top_info.latest_thinking.is_empty() {
                NO_THINKING_PLACEHOLDER.to_string()
            } else {
                top_info.latest_thinking.clone()
            };

            let mut children_outputs = Vec::new();
            let mut entry_agents = HashMap::new();
            let mut entry_hierarchy = CallTree::new();

            for (child_id, child_info) in completed_agents.iter() {
                let child_parent = completed_hierarchy.get(child_id).and_then(|n| n.parent.clone());
                if child_parent.as_ref() == Some(&top_id) {
                    if let Some(output) = &child_info.final_output {
                        if !output.is_empty() {
                            children_outputs.push(format!("【{}】\n{}", child_info.agent_name, output));
                        }
                    }
                    entry_agents.insert(child_id.clone(), child_info.clone());
                    if let Some(node) = completed_hierarchy.get(child_id) {
                        entry_hierarchy.insert(child_id.clone(), node.clone());
                    }
                }
            }

            let mut final_output = format!("{}\n\n## 最新思考\n{}\n\n", ARCHIVE_HEADER, thinking);
            if children_outputs.is_empty() {
                final_output.push_str("## 已完成的子任务\n(无)");
            } else {
                final_output.push_str("## 已完成的子任务\n");
                final_output.push_str(&children_outputs.join("\n\n"));
            }

            top_info.status = AgentStatus::Completed;
            top_info.final_output = Some(final_output);

            entry_agents.insert(top_id.clone(), top_info);
            if let Some(node) = current.hierarchy.get(&top_id) {
                entry_hierarchy.insert(top_id.clone(), node.clone());
            }

            history_entry = Some(HistoryEntry {
                instructions: current.instructions.clone(),
                hierarchy: entry_hierarchy,
                agents_status: entry_agents,
                completion_time: Utc::now(),
            });
            archived = true;
        }
    }

    let mut new_current = if is_same_task {
        let mut merged = CurrentTask {
            instructions: current.instructions,
            hierarchy: current.hierarchy,
            agents_status: HashMap::new(),
            compressed_user_agent_history: current.compressed_user_agent_history,
            compressed_structured_call_info: current.compressed_structured_call_info,
        };
        merged.agents_status.extend(completed_agents.clone());
        merged.agents_status.extend(running_agents.clone());
        merged
    } else {
        CurrentTask {
            instructions: Vec::new(),
            hierarchy: CallTree::new(),
            agents_status: HashMap::new(),
            compressed_user_agent_history: None,
            compressed_structured_call_info: HashMap::new(),
        }
    };

    let outcome = if is_same_task {
        new_current.agents_status = {
            let mut merged = completed_agents.clone();
            merged.extend(running_agents.clone());
            merged
        };
        CleanOutcome::ResumedSameTask { running: running_count, completed: completed_agents.len() }
    } else {
        CleanOutcome::ArchivedAndReset { archived, completed_kept: completed_agents.len() }
    };

    // `history` itself is owned by the caller's `TaskContext`, not
    // `CurrentTask`; return it alongside so the caller can push it.
    (new_current, outcome, history_entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HierarchyNode, Instruction};

    fn agent(name: &str, parent: Option<AgentId>, status: AgentStatus, thinking: &str, output: Option<&str>) -> AgentInstance {
        AgentInstance {
            agent_id: AgentId(name.to_string()),
            agent_name: name.to_string(),
            level: 1,
            parent_id: parent,
            status,
            latest_thinking: thinking.to_string(),
            final_output: output.map(|s| s.to_string()),
            task_input: "x".to_string(),
        }
    }

    #[test]
    fn test_empty_current_is_noop() {
        let current = CurrentTask::default();
        let (_, outcome, _) = clean_before_start(current, Some("new task"));
        assert_eq!(outcome, CleanOutcome::NothingToClean);
    }

    #[test]
    fn test_same_task_resumes_without_archiving() {
        let mut current = CurrentTask::default();
        current.instructions.push(Instruction {
            id: "i1".into(),
            instruction: "do the thing".into(),
            start_time: Utc::now(),
            completion_time: None,
        });
        current
            .agents_status
            .insert(AgentId("root".into()), agent("root", None, AgentStatus::Running, "working", None));
        current
            .hierarchy
            .insert(AgentId("root".into()), HierarchyNode { parent: None, children: vec![] });

        let (new_current, outcome, archived) = clean_before_start(current, Some("do the thing"));
        assert_eq!(outcome, CleanOutcome::ResumedSameTask { running: 1, completed: 0 });
        assert!(new_current.agents_status.contains_key(&AgentId("root".into())));
        assert!(archived.is_none());
    }

    #[test]
    fn test_different_task_archives_top_level_running_agent() {
        let mut current = CurrentTask::default();
        current.instructions.push(Instruction {
            id: "i1".into(),
            instruction: "old task".into(),
            start_time: Utc::now(),
            completion_time: None,
        });
        current.agents_status.insert(
            AgentId("root".into()),
            agent("root", None, AgentStatus::Running, "halfway through", None),
        );
        current.agents_status.insert(
            AgentId("child".into()),
            agent("child", Some(AgentId("root".into())), AgentStatus::Completed, "", Some("child result")),
        );
        current.hierarchy.insert(
            AgentId("root".into()),
            HierarchyNode { parent: None, children: vec![AgentId("child".into())] },
        );
        current.hierarchy.insert(
            AgentId("child".into()),
            HierarchyNode { parent: Some(AgentId("root".into())), children: vec![] },
        );

        let (new_current, outcome, archived) = clean_before_start(current, Some("new task"));
        assert_eq!(outcome, CleanOutcome::ArchivedAndReset { archived: true, completed_kept: 1 });
        assert!(new_current.agents_status.is_empty());
        assert!(new_current.instructions.is_empty());

        let entry = archived.expect("expected archived entry");
        let root = entry.agents_status.get(&AgentId("root".into())).unwrap();
        assert_eq!(root.status, AgentStatus::Completed);
        let output = root.final_output.as_ref().unwrap();
        assert!(output.starts_with(ARCHIVE_HEADER));
        assert!(output.contains("halfway through"));
        assert!(output.contains("child result"));
    }

    #[test]
    fn test_archive_with_no_completed_children_uses_placeholder() {
        let mut current = CurrentTask::default();
        current.instructions.push(Instruction {
            id: "i1".into(),
            instruction: "old task".into(),
            start_time: Utc::now(),
            completion_time: None,
        });
        current
            .agents_status
            .insert(AgentId("root".into()), agent("root", None, AgentStatus::Running, "", None));
        current
            .hierarchy
            .insert(AgentId("root".into()), HierarchyNode { parent: None, children: vec![] });

        let (_, _, archived) = clean_before_start(current, Some("new task"));
        let entry = archived.unwrap();
        let root = entry.agents_status.get(&AgentId("root".into())).unwrap();
        let output = root.final_output.as_ref().unwrap();
        assert!(output.contains(NO_THINKING_PLACEHOLDER));
        assert!(output.contains("(无)"));
    }
}
