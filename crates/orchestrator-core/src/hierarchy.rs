//! Hierarchy Manager (§4.2): owns the Task Context and Activation Stack for
//! one task. Grounded in the teacher's `ExecutionContext` (an
//! `Arc<RwLock<Vec<...>>>` stack wrapper), generalized here to persist a
//! full call tree and agent status table rather than display-only labels,
//! and — unlike the teacher's eternal `Chat` root — the root frame here is
//! poppable at task completion.

use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tokio::sync::RwLock;

use crate::error::Error;
use crate::model::{
    ActionRecord, AgentId, AgentInstance, AgentStatus, CurrentTask, HierarchyNode, Instruction,
    StackFrame, TaskContext,
};
use crate::persistence::{PersistenceStore, RecordKind};

/// Snapshot of `{current, history}`, a deep copy safe to hand to the
/// Context Builder (§4.3: "a pure function of (Hierarchy Manager snapshot,
/// Executor's histories, config)").
pub type TaskContextSnapshot = TaskContext;

#[derive(Clone)]
pub struct HierarchyManager {
    store: Arc<PersistenceStore>,
    fingerprint: String,
    task: Arc<RwLock<TaskContext>>,
    stack: Arc<RwLock<Vec<StackFrame>>>,
}

impl HierarchyManager {
    /// Load (or initialize empty) the Task Context and Activation Stack for
    /// `fingerprint` from `store`.
    pub fn load(store: Arc<PersistenceStore>, fingerprint: impl Into<String>) -> Self {
        let fingerprint = fingerprint.into();
        let task: TaskContext = store
            .read(&fingerprint, RecordKind::Context, None)
            .unwrap_or_default();
        let stack: Vec<StackFrame> = store
            .read(&fingerprint, RecordKind::Stack, None)
            .unwrap_or_default();

        Self {
            store,
            fingerprint,
            task: Arc::new(RwLock::new(task)),
            stack: Arc::new(RwLock::new(stack)),
        }
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    async fn persist_context(&self, task: &TaskContext) -> Result<(), Error> {
        self.store
            .write(&self.fingerprint, RecordKind::Context, None, task)
    }

    async fn persist_stack(&self, stack: &[StackFrame]) -> Result<(), Error> {
        self.store
            .write(&self.fingerprint, RecordKind::Stack, None, &stack.to_vec())
    }

    /// `start_new_instruction(text) -> instruction_id`.
    pub async fn start_new_instruction(&self, text: &str) -> Result<String, Error> {
        let mut task = self.task.write().await;
        let id = format!("instr-{:08x}", rand::thread_rng().gen::<u32>());
        task.current.instructions.push(Instruction {
            id: id.clone(),
            instruction: text.to_string(),
            start_time: Utc::now(),
            completion_time: None,
        });
        self.persist_context(&task).await?;
        Ok(id)
    }

    /// `push_agent(agent_name, task_input) -> agent_id`. Allocates a new
    /// agent_id, sets parent to the current stack top (or null), inserts
    /// into hierarchy and agents_status with `status=running`, and pushes
    /// onto the stack. Persists both records.
    pub async fn push_agent(&self, agent_name: &str, level: u8, task_input: &str) -> Result<AgentId, Error> {
        let mut task = self.task.write().await;
        let mut stack = self.stack.write().await;

        let agent_id = AgentId(format!("{}-{:08x}", agent_name, rand::thread_rng().gen::<u32>()));
        let parent_id = stack.last().map(|f| f.agent_id.clone());

        task.current.agents_status.insert(
            agent_id.clone(),
            AgentInstance {
                agent_id: agent_id.clone(),
                agent_name: agent_name.to_string(),
                level,
                parent_id: parent_id.clone(),
                status: AgentStatus::Running,
                latest_thinking: String::new(),
                final_output: None,
                task_input: task_input.to_string(),
            },
        );

        task.current
            .hierarchy
            .insert(agent_id.clone(), HierarchyNode { parent: parent_id.clone(), children: Vec::new() });
        if let Some(parent) = &parent_id {
            task.current
                .hierarchy
                .entry(parent.clone())
                .or_insert_with(HierarchyNode::default)
                .children
                .push(agent_id.clone());
        }

        stack.push(StackFrame {
            agent_id: agent_id.clone(),
            agent_name: agent_name.to_string(),
            user_input: task_input.to_string(),
            start_time: Utc::now(),
        });

        self.persist_context(&task).await?;
        self.persist_stack(&stack).await?;

        Ok(agent_id)
    }

    /// `pop_agent(agent_id, final_output)`: marks `status=completed`, sets
    /// `final_output`, pops the stack. Fatal mismatch if the popped id does
    /// not match `agent_id`.
    pub async fn pop_agent(&self, agent_id: &AgentId, final_output: &str) -> Result<(), Error> {
        let mut task = self.task.write().await;
        let mut stack = self.stack.write().await;

        match stack.last() {
            Some(top) if &top.agent_id == agent_id => {
                stack.pop();
            }
            Some(top) => {
                return Err(Error::hierarchy(format!(
                    "pop_agent mismatch: expected to pop {}, stack top is {}",
                    agent_id, top.agent_id
                )));
            }
            None => {
                return Err(Error::hierarchy(format!(
                    "pop_agent({}) called on empty stack",
                    agent_id
                )));
            }
        }

        let instance = task.current.agents_status.get_mut(agent_id).ok_or_else(|| {
            Error::hierarchy(format!("pop_agent: unknown agent_id {}", agent_id))
        })?;
        instance.status = AgentStatus::Completed;
        instance.final_output = Some(final_output.to_string());

        self.persist_context(&task).await?;
        self.persist_stack(&stack).await?;
        Ok(())
    }

    pub async fn update_thinking(&self, agent_id: &AgentId, text: &str) -> Result<(), Error> {
        let mut task = self.task.write().await;
        let instance = task.current.agents_status.get_mut(agent_id).ok_or_else(|| {
            Error::hierarchy(format!("update_thinking: unknown agent_id {}", agent_id))
        })?;
        instance.latest_thinking = text.to_string();
        self.persist_context(&task).await
    }

    /// `add_action(agent_id, record)` — recorded for audit purposes at the
    /// Hierarchy Manager level; the Agent Executor owns the authoritative
    /// render/fact histories in its per-agent actions record, but the
    /// Hierarchy Manager keeps a cheap trace for cross-agent visibility.
    pub async fn add_action(&self, agent_id: &AgentId, _record: &ActionRecord) -> Result<(), Error> {
        // Existence check only; the record itself lives in AgentActions
        // (persisted separately, see agent_executor::checkpoint).
        let task = self.task.read().await;
        if !task.current.agents_status.contains_key(agent_id) {
            return Err(Error::hierarchy(format!(
                "add_action: unknown agent_id {}",
                agent_id
            )));
        }
        Ok(())
    }

    /// `get_context() -> snapshot`: deep copy of `{current, history}`.
    pub async fn get_context(&self) -> TaskContextSnapshot {
        self.task.read().await.clone()
    }

    /// Memoized digest from §4.3 rule 1, reused for every turn of this task
    /// activation once populated (cleared only by a fresh task via
    /// `archive_current`/`replace_current`).
    pub async fn get_compressed_user_agent_history(&self) -> Option<String> {
        self.task.read().await.current.compressed_user_agent_history.clone()
    }

    /// Persist the §4.3 rule 1 digest so later turns skip the summarizer
    /// call entirely.
    pub async fn set_compressed_user_agent_history(&self, digest: &str) -> Result<(), Error> {
        let mut task = self.task.write().await;
        task.current.compressed_user_agent_history = Some(digest.to_string());
        self.persist_context(&task).await
    }

    /// Memoized per-viewing-agent digest from §4.3 rule 2.
    pub async fn get_compressed_structured_call_info(&self, viewing_agent: &AgentId) -> Option<String> {
        self.task
            .read()
            .await
            .current
            .compressed_structured_call_info
            .get(viewing_agent)
            .cloned()
    }

    /// Persist the §4.3 rule 2 digest for `viewing_agent` so later turns of
    /// that agent skip the summarizer call. Each viewing agent gets its own
    /// entry because "the current agent" marker in the rendered tree differs.
    pub async fn set_compressed_structured_call_info(&self, viewing_agent: &AgentId, digest: &str) -> Result<(), Error> {
        let mut task = self.task.write().await;
        task.current
            .compressed_structured_call_info
            .insert(viewing_agent.clone(), digest.to_string());
        self.persist_context(&task).await
    }

    pub async fn get_stack(&self) -> Vec<StackFrame> {
        self.stack.read().await.clone()
    }

    pub async fn current_agent_id(&self) -> Option<AgentId> {
        self.stack.read().await.last().map(|f| f.agent_id.clone())
    }

    /// `archive_current()`: moves `current` into `history[]` with
    /// `completion_time` and resets `current`. Used by the State Cleaner.
    pub async fn archive_current(&self) -> Result<(), Error> {
        let mut task = self.task.write().await;
        let current = std::mem::take(&mut task.current);
        task.history.push(crate::model::HistoryEntry {
            instructions: current.instructions,
            hierarchy: current.hierarchy,
            agents_status: current.agents_status,
            completion_time: Utc::now(),
        });
        self.persist_context(&task).await?;
        self.persist_stack(&[]).await
    }

    /// Replace `current` wholesale (used by the State Cleaner after it has
    /// computed the reconciled state).
    pub async fn replace_current(&self, current: CurrentTask) -> Result<(), Error> {
        let mut task = self.task.write().await;
        task.current = current;
        self.persist_context(&task).await
    }

    /// Like `replace_current`, but also appends a `HistoryEntry` — the
    /// archived-interrupted-task record the State Cleaner's new-task mode
    /// produces alongside the reconciled `current` (§4.6).
    pub async fn replace_current_with_history(
        &self,
        current: CurrentTask,
        history_entry: crate::model::HistoryEntry,
    ) -> Result<(), Error> {
        let mut task = self.task.write().await;
        task.current = current;
        task.history.push(history_entry);
        self.persist_context(&task).await
    }

    pub async fn clear_stack(&self) -> Result<(), Error> {
        let mut stack = self.stack.write().await;
        stack.clear();
        self.persist_stack(&stack).await
    }

    /// Verify the invariants from §8: every stack agent_id is `running` in
    /// `agents_status`, and the stack is a root-to-leaf path in the
    /// hierarchy (parent chain matches).
    pub async fn check_invariants(&self) -> Result<(), Error> {
        let task = self.task.read().await;
        let stack = self.stack.read().await;

        let mut expected_parent: Option<AgentId> = None;
        for frame in stack.iter() {
            let instance = task.current.agents_status.get(&frame.agent_id).ok_or_else(|| {
                Error::hierarchy(format!("stack frame {} missing from agents_status", frame.agent_id))
            })?;
            if instance.status != AgentStatus::Running {
                return Err(Error::hierarchy(format!(
                    "stack frame {} is not running",
                    frame.agent_id
                )));
            }
            if instance.parent_id != expected_parent {
                return Err(Error::hierarchy(format!(
                    "stack frame {} parent mismatch: hierarchy says {:?}, stack says {:?}",
                    frame.agent_id, instance.parent_id, expected_parent
                )));
            }
            expected_parent = Some(frame.agent_id.clone());
        }
        Ok(())
    }
}

/// Generate an 8-character random suffix for the UUID-augmentation rule
/// (§4.4): `task_input` becomes `"{task_input} [call-{random8}]"`.
pub fn random8() -> String {
    let bytes: [u8; 4] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> Arc<PersistenceStore> {
        let dir = tempfile::tempdir().unwrap();
        Arc::new(PersistenceStore::new(dir.path().to_path_buf()))
    }

    #[tokio::test]
    async fn test_push_pop_agent_basic() {
        let mgr = HierarchyManager::load(store(), "fp1");
        let id = mgr.push_agent("researcher", 1, "look into X").await.unwrap();
        assert_eq!(mgr.get_stack().await.len(), 1);

        mgr.pop_agent(&id, "done").await.unwrap();
        assert_eq!(mgr.get_stack().await.len(), 0);

        let ctx = mgr.get_context().await;
        let instance = ctx.current.agents_status.get(&id).unwrap();
        assert_eq!(instance.status, AgentStatus::Completed);
        assert_eq!(instance.final_output.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_pop_agent_mismatch_is_fatal() {
        let mgr = HierarchyManager::load(store(), "fp1");
        let id1 = mgr.push_agent("a", 1, "x").await.unwrap();
        let _id2 = mgr.push_agent("b", 1, "y").await.unwrap();

        let result = mgr.pop_agent(&id1, "done").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_hierarchy_parent_child_linkage() {
        let mgr = HierarchyManager::load(store(), "fp1");
        let parent = mgr.push_agent("pm", 2, "top").await.unwrap();
        let child = mgr.push_agent("coder", 1, "sub").await.unwrap();

        let ctx = mgr.get_context().await;
        assert_eq!(
            ctx.current.agents_status.get(&child).unwrap().parent_id,
            Some(parent.clone())
        );
        assert!(ctx
            .current
            .hierarchy
            .get(&parent)
            .unwrap()
            .children
            .contains(&child));
    }

    #[tokio::test]
    async fn test_invariants_hold_after_push() {
        let mgr = HierarchyManager::load(store(), "fp1");
        mgr.push_agent("a", 1, "x").await.unwrap();
        mgr.push_agent("b", 1, "y").await.unwrap();
        mgr.check_invariants().await.unwrap();
    }

    #[tokio::test]
    async fn test_archive_current_moves_to_history() {
        let mgr = HierarchyManager::load(store(), "fp1");
        let id = mgr.push_agent("a", 0, "x").await.unwrap();
        mgr.pop_agent(&id, "done").await.unwrap();

        mgr.archive_current().await.unwrap();
        let ctx = mgr.get_context().await;
        assert!(ctx.current.agents_status.is_empty());
        assert_eq!(ctx.history.len(), 1);
    }

    #[tokio::test]
    async fn test_hierarchy_node_parent_field_matches_parent_id() {
        let mgr = HierarchyManager::load(store(), "fp1");
        let root = mgr.push_agent("pm", 2, "top").await.unwrap();
        let child = mgr.push_agent("coder", 1, "sub").await.unwrap();

        let ctx = mgr.get_context().await;
        assert_eq!(ctx.current.hierarchy.get(&root).unwrap().parent, None);
        assert_eq!(ctx.current.hierarchy.get(&child).unwrap().parent, Some(root));
    }

    #[test]
    fn test_random8_length() {
        let s = random8();
        assert_eq!(s.len(), 8);
        assert!(s.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
