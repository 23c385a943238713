//! Agent Executor (§4.5): the perceive-act loop driving one agent from
//! push to either a `final_output` result or a fatal/timeout error.
//!
//! Grounded in `original_source/core/agent_executor.py`'s six-step loop and
//! in the teacher's `agent.rs` for the Rust shape of a long-lived,
//! checkpointed async state machine (its `Agent::run` turn loop, adapted
//! here from a chat-history model to a fact/render-history + pending-tools
//! model). Recursion into sub-agents goes through `SubAgentRunner`
//! (`tool_executor.rs`) so this module and `ToolExecutor` never need each
//! other's concrete type, only the trait.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::context_builder::{
    build_prompt, compress_action_history, compress_structured_call_info,
    compress_user_agent_history, render_call_tree_json, PromptSections, Summarizer,
};
use crate::error::Error;
use crate::events::{Event, EventSink};
use crate::hierarchy::HierarchyManager;
use crate::llm_client::{ChatRequest, ChatStatus, LlmClient, ToolChoice};
use crate::message::Message;
use crate::model::{
    ActionRecord, ActionResult, ActionStatus, AgentActions, AgentId, AgentLevel, PendingTool,
    NO_TOOL_CALL_TOOL,
};
use crate::persistence::{PersistenceStore, RecordKind};
use crate::tool::ToolDefinition;
use crate::tool_executor::{
    ConfirmationGate, SubAgentRunner, ToolCatalog, ToolExecutor, ToolKind, ToolServerClient,
};

/// Default bound on perceive-act turns before an agent times out (§5).
pub const DEFAULT_MAX_TURNS: u32 = 200;
/// Consecutive no-tool-call responses tolerated before escalating (§4.5d).
pub const NO_TOOL_BACKOFF_LIMIT: u32 = 5;
/// How often (in tool calls) the Thinking sub-service re-plans (§4.5f).
pub const DEFAULT_THINKING_INTERVAL: u32 = 10;
/// Context-window estimate used to decide whether action history needs
/// LLM-summarization (§4.3 rule 3); overridable per agent spec.
const DEFAULT_CONTEXT_WINDOW_TOKENS: usize = 128_000;

/// One agent definition as resolved from `agent_library/<system>/*.yaml`
/// (§6): name, system prompt, available tools, and its place in the tree.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub agent_name: String,
    pub system_prompt: String,
    pub model: String,
    pub level: AgentLevel,
    pub catalog: ToolCatalog,
    pub tool_definitions: Vec<ToolDefinition>,
    pub thinking_interval: u32,
    pub max_turns: u32,
    pub context_window_tokens: usize,
}

impl AgentSpec {
    pub fn new(agent_name: impl Into<String>, system_prompt: impl Into<String>, model: impl Into<String>, level: AgentLevel) -> Self {
        Self {
            agent_name: agent_name.into(),
            system_prompt: system_prompt.into(),
            model: model.into(),
            level,
            catalog: ToolCatalog::new(),
            tool_definitions: Vec::new(),
            thinking_interval: DEFAULT_THINKING_INTERVAL,
            max_turns: DEFAULT_MAX_TURNS,
            context_window_tokens: DEFAULT_CONTEXT_WINDOW_TOKENS,
        }
    }

    pub fn with_tool(mut self, name: impl Into<String>, kind: ToolKind, definition: ToolDefinition) -> Self {
        self.catalog.insert(name, kind);
        self.tool_definitions.push(definition);
        self
    }
}

/// Resolves an agent name to its `AgentSpec`, standing in for the loaded
/// `agent_library/<system>/*.yaml` set (§6). Implemented by
/// `orchestrator-config` in the full workspace.
pub trait AgentLibrary: Send + Sync {
    fn get(&self, agent_name: &str) -> Option<AgentSpec>;
}

/// Outcome of one full `run` of the perceive-act loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The agent reached `final_output`.
    Done(ActionResult),
    /// `MAX_TURNS` exhausted without a `final_output`.
    TimedOut,
}

#[derive(Debug, Clone)]
pub struct AgentExecutorConfig {
    pub task_id: String,
}

/// Drives one agent's perceive-act loop end to end, recursing into
/// sub-agents by constructing a fresh `AgentExecutor` for them (this struct
/// itself implements `SubAgentRunner` for that purpose).
pub struct AgentExecutor {
    store: Arc<PersistenceStore>,
    hierarchy: HierarchyManager,
    llm: Arc<LlmClient>,
    library: Arc<dyn AgentLibrary>,
    tool_server: Arc<dyn ToolServerClient>,
    summarizer: Arc<dyn Summarizer>,
    config: AgentExecutorConfig,
    events: Arc<dyn EventSink>,
    confirmation: Option<(Vec<String>, Arc<dyn ConfirmationGate>)>,
}

impl AgentExecutor {
    pub fn new(
        store: Arc<PersistenceStore>,
        hierarchy: HierarchyManager,
        llm: Arc<LlmClient>,
        library: Arc<dyn AgentLibrary>,
        tool_server: Arc<dyn ToolServerClient>,
        summarizer: Arc<dyn Summarizer>,
        config: AgentExecutorConfig,
    ) -> Self {
        Self {
            store,
            hierarchy,
            llm,
            library,
            tool_server,
            summarizer,
            config,
            events: Arc::new(crate::events::NullEventSink),
            confirmation: None,
        }
    }

    /// Attach an `EventSink` for the JSONL event stream (§6). Constructed
    /// once at driver entry and threaded down rather than a global
    /// singleton (§9 "Global singletons").
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Enable manual mode (§4.4): external tools named in `whitelist` block
    /// on `gate` before dispatch.
    pub fn with_manual_mode(mut self, whitelist: Vec<String>, gate: Arc<dyn ConfirmationGate>) -> Self {
        self.confirmation = Some((whitelist, gate));
        self
    }

    fn clone_for_recursion(&self) -> Self {
        Self {
            store: self.store.clone(),
            hierarchy: self.hierarchy.clone(),
            llm: self.llm.clone(),
            library: self.library.clone(),
            tool_server: self.tool_server.clone(),
            summarizer: self.summarizer.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            confirmation: self.confirmation.clone(),
        }
    }

    /// Run one agent to completion (§4.5 steps 1-6).
    pub async fn run(&self, agent_name: &str, task_input: &str) -> Result<TurnOutcome, Error> {
        let spec = self
            .library
            .get(agent_name)
            .ok_or_else(|| Error::config(format!("unknown agent: {agent_name}")))?;

        // Step 1: push.
        let agent_id = self.hierarchy.push_agent(agent_name, spec.level, task_input).await?;
        self.events.emit(Event::Start { agent: agent_name.to_string() }).await;

        let result = self.run_pushed(&spec, &agent_id, task_input).await;

        match &result {
            Ok(TurnOutcome::Done(action_result)) => {
                self.hierarchy.pop_agent(&agent_id, &action_result.output).await?;
                self.events
                    .emit(Event::Result {
                        agent: agent_name.to_string(),
                        ok: action_result.status == ActionStatus::Success,
                        summary: action_result.output.clone(),
                    })
                    .await;
            }
            Ok(TurnOutcome::TimedOut) => {
                self.hierarchy
                    .pop_agent(&agent_id, "(timed out: MAX_TURNS exhausted)")
                    .await?;
                self.events
                    .emit(Event::Error { agent: agent_name.to_string(), text: "MAX_TURNS exhausted".to_string() })
                    .await;
            }
            Err(e) => {
                // Fatal exceptions pop with a synthetic error result whose
                // output embeds latest_thinking so work is not wholly lost.
                let thinking = self.load_actions(&agent_id).map(|a| a.latest_thinking).unwrap_or_default();
                let embedded = format!("agent '{agent_name}' failed: {e}\n\nlatest thinking:\n{thinking}");
                let _ = self.hierarchy.pop_agent(&agent_id, &embedded).await;
                self.events.emit(Event::Error { agent: agent_name.to_string(), text: e.to_string() }).await;
            }
        }

        result
    }

    fn load_actions(&self, agent_id: &AgentId) -> Option<AgentActions> {
        self.store.read::<AgentActions>(self.hierarchy.fingerprint(), RecordKind::Actions, Some(&agent_id.0))
    }

    fn save_actions(&self, agent_id: &AgentId, actions: &AgentActions) -> Result<(), Error> {
        self.store
            .write(self.hierarchy.fingerprint(), RecordKind::Actions, Some(&agent_id.0), actions)
    }

    async fn run_pushed(
        &self,
        spec: &AgentSpec,
        agent_id: &AgentId,
        task_input: &str,
    ) -> Result<TurnOutcome, Error> {
        // Step 2: checkpoint load / idempotent re-entry.
        let mut actions = self.load_actions(agent_id).unwrap_or_default();

        if let Some(record) = actions.final_output_result() {
            return Ok(TurnOutcome::Done(record.result.clone()));
        }

        // Step 3: recover pending tools from a crash mid-invocation.
        if !actions.pending_tools.is_empty() {
            let pending = std::mem::take(&mut actions.pending_tools);
            for pending_tool in pending {
                if let Some(outcome) = self.execute_pending(spec, agent_id, &mut actions, pending_tool).await? {
                    return Ok(TurnOutcome::Done(outcome));
                }
            }
            self.save_actions(agent_id, &actions)?;
        }

        // Step 4: initial plan.
        if !actions.first_thinking_done {
            let thinking = self.invoke_thinking(spec, task_input, &actions).await?;
            actions.latest_thinking = thinking;
            actions.first_thinking_done = true;
            self.hierarchy.update_thinking(agent_id, &actions.latest_thinking).await?;
            self.save_actions(agent_id, &actions)?;
        }

        // Step 5: turn loop.
        let mut no_tool_streak = 0u32;
        let mut turn = actions.current_turn;
        while turn < spec.max_turns {
            actions.current_turn = turn;
            self.save_actions(agent_id, &actions)?;

            let prompt = self.build_prompt_for(spec, agent_id, task_input, &mut actions).await?;
            let history = vec![Message::user(prompt)];

            let mut request = ChatRequest::new(history, spec.model.clone(), spec.system_prompt.clone());
            request.tools = spec.tool_definitions.clone();
            request.tool_choice = ToolChoice::Required;

            let response = self.llm.chat(request).await?;

            if response.status != ChatStatus::Success {
                return Err(Error::network(response.error.unwrap_or_else(|| "LLM call failed".to_string())));
            }

            if response.tool_calls.is_empty() {
                no_tool_streak += 1;
                let record = ActionRecord {
                    call_id: format!("no-tool-{turn}"),
                    tool_name: NO_TOOL_CALL_TOOL.to_string(),
                    arguments: HashMap::new(),
                    result: ActionResult {
                        status: ActionStatus::Error,
                        output: String::new(),
                        error_information: Some("no tool call emitted".to_string()),
                    },
                };
                actions.render_history.push(record.clone());
                actions.fact_history.push(record);

                if no_tool_streak > NO_TOOL_BACKOFF_LIMIT {
                    self.events
                        .emit(Event::Warn {
                            agent: spec.agent_name.clone(),
                            text: format!("no tool call for {no_tool_streak} consecutive turns, escalating to re-plan"),
                        })
                        .await;
                    let thinking = self.invoke_thinking(spec, task_input, &actions).await?;
                    actions.latest_thinking = thinking;
                    self.hierarchy.update_thinking(agent_id, &actions.latest_thinking).await?;
                    self.save_actions(agent_id, &actions)?;
                    return Err(Error::invalid_request(format!(
                        "agent '{}' failed to emit a tool call after {} retries",
                        spec.agent_name, NO_TOOL_BACKOFF_LIMIT
                    )));
                }
                turn += 1;
                continue;
            }
            no_tool_streak = 0;

            for tool_call in response.tool_calls {
                let pending = PendingTool {
                    call_id: tool_call.id.clone(),
                    tool_name: tool_call.name.clone(),
                    arguments: value_to_map(&tool_call.arguments),
                };
                actions.pending_tools.push(pending.clone());
                self.save_actions(agent_id, &actions)?;

                if let Some(outcome) = self.execute_pending(spec, agent_id, &mut actions, pending).await? {
                    return Ok(TurnOutcome::Done(outcome));
                }
            }

            self.save_actions(agent_id, &actions)?;

            // Periodic re-plan (§4.5f): bounds prompt growth by distilling
            // the raw trace into a fresh plan every THINKING_INTERVAL calls.
            if spec.thinking_interval > 0 && actions.tool_call_counter > 0 && actions.tool_call_counter % spec.thinking_interval == 0 {
                let thinking = self.invoke_thinking(spec, task_input, &actions).await?;
                actions.latest_thinking = thinking.clone();
                actions.render_history.clear();
                self.hierarchy.update_thinking(agent_id, &actions.latest_thinking).await?;
                self.save_actions(agent_id, &actions)?;
                self.events.emit(Event::Progress { agent: spec.agent_name.clone(), text: thinking }).await;
            }

            turn += 1;
        }

        actions.current_turn = turn;
        self.save_actions(agent_id, &actions)?;
        Ok(TurnOutcome::TimedOut)
    }

    /// Execute one pending tool call; if it resolves to `final_output`,
    /// returns `Some(result)` so the caller can pop and return immediately.
    async fn execute_pending(
        &self,
        spec: &AgentSpec,
        agent_id: &AgentId,
        actions: &mut AgentActions,
        pending: PendingTool,
    ) -> Result<Option<ActionResult>, Error> {
        let arguments = map_to_value(&pending.arguments);
        let is_sub_agent = matches!(spec.catalog.get(&pending.tool_name), Some(ToolKind::SubAgent { .. }));
        if is_sub_agent {
            self.events
                .emit(Event::AgentCall { agent: spec.agent_name.clone(), tool_name: pending.tool_name.clone() })
                .await;
        } else {
            self.events
                .emit(Event::ToolCall {
                    agent: spec.agent_name.clone(),
                    tool_name: pending.tool_name.clone(),
                    parameters: arguments.clone(),
                })
                .await;
        }

        let recursive = RecursiveRunner { executor: self.clone_for_recursion() };
        let mut tool_executor = ToolExecutor::new(&spec.catalog, self.tool_server.as_ref(), &recursive);
        if let Some((whitelist, gate)) = &self.confirmation {
            tool_executor = tool_executor.with_manual_mode(whitelist, gate.as_ref());
        }
        let result = tool_executor.execute(&self.config.task_id, &pending.tool_name, arguments).await;

        actions.pending_tools.retain(|p| p.call_id != pending.call_id);
        let record = ActionRecord {
            call_id: pending.call_id.clone(),
            tool_name: pending.tool_name.clone(),
            arguments: pending.arguments.clone(),
            result: result.clone(),
        };
        self.hierarchy.add_action(agent_id, &record).await?;
        actions.render_history.push(record.clone());
        actions.fact_history.push(record);
        actions.tool_call_counter += 1;
        self.save_actions(agent_id, actions)?;

        if pending.tool_name == "final_output" {
            return Ok(Some(result));
        }
        Ok(None)
    }

    /// The Thinking sub-service (§9): a stateless LLM call with no tools,
    /// against a meta-prompt producing a free-text plan. Initial planning
    /// and periodic re-plan share this one operation (§9 Open Question 1).
    async fn invoke_thinking(&self, spec: &AgentSpec, task_input: &str, actions: &AgentActions) -> Result<String, Error> {
        let system_prompt = format!(
            "{}\n\nYou are in planning mode. Produce a concise plan with <todo_list>, \
             <fixed_info>, and <next_n_steps> sections. Do not call any tools.",
            spec.system_prompt
        );
        let history_summary = render_action_history_brief(&actions.fact_history);
        let user_message = format!(
            "Task: {task_input}\n\nActions taken so far:\n{history_summary}\n\nProduce the plan now."
        );

        let mut request = ChatRequest::new(vec![Message::user(user_message)], spec.model.clone(), system_prompt);
        request.tool_choice = ToolChoice::None;
        request.tools = Vec::new();

        let response = self.llm.chat(request).await?;
        if response.status != ChatStatus::Success {
            return Err(Error::network(response.error.unwrap_or_else(|| "thinking call failed".to_string())));
        }
        Ok(response.output)
    }

    async fn build_prompt_for(
        &self,
        spec: &AgentSpec,
        agent_id: &AgentId,
        task_input: &str,
        actions: &mut AgentActions,
    ) -> Result<String, Error> {
        let snapshot = self.hierarchy.get_context().await;

        // Rule 1 (§4.3): the digest is memoized once per task activation at
        // `current.compressed_user_agent_history`; every later turn reuses
        // it instead of re-invoking the summarizer.
        let user_agent_history = match self.hierarchy.get_compressed_user_agent_history().await {
            Some(digest) => digest,
            None => {
                let raw = serde_json::to_string(&snapshot.current.instructions).unwrap_or_default();
                match compress_user_agent_history(self.summarizer.as_ref(), &raw).await {
                    Ok(Some(digest)) => {
                        if let Err(e) = self.hierarchy.set_compressed_user_agent_history(&digest).await {
                            tracing::warn!(error = %e, "failed to persist compressed user-agent history");
                        }
                        digest
                    }
                    Ok(None) => raw,
                    Err(e) => {
                        tracing::warn!(error = %e, "user-agent-history compression failed, falling back to raw");
                        raw
                    }
                }
            }
        };

        // Rule 2 (§4.3): memoized per viewing agent at
        // `current.compressed_structured_call_info[agent_id]`, since the
        // "current agent" marker in the rendered tree differs per viewer.
        let structured_call_info_json = match self.hierarchy.get_compressed_structured_call_info(agent_id).await {
            Some(digest) => digest,
            None => match compress_structured_call_info(self.summarizer.as_ref(), &snapshot.current, Some(agent_id)).await {
                Some(digest) => {
                    if let Err(e) = self.hierarchy.set_compressed_structured_call_info(agent_id, &digest).await {
                        tracing::warn!(error = %e, "failed to persist compressed structured call info");
                    }
                    digest
                }
                None => render_call_tree_json(&snapshot.current, Some(agent_id)).to_string(),
            },
        };

        let estimated_tokens = actions.render_history.iter().map(render_action_line_len).sum::<usize>() / 4;
        if estimated_tokens > spec.context_window_tokens {
            match compress_action_history(
                self.summarizer.as_ref(),
                &actions.render_history,
                estimated_tokens,
                spec.context_window_tokens,
                20,
            )
            .await
            {
                Ok(Some(compressed)) => actions.render_history = compressed,
                Ok(None) => {}
                Err(e) => tracing::warn!(error = %e, "action-history compression failed, keeping raw history"),
            }
        }

        let sections = PromptSections {
            general_system_prompt: &spec.system_prompt,
            user_latest_input: vec![task_input],
            user_agent_history: &user_agent_history,
            current_agent_name: &spec.agent_name,
            structured_call_info_json: &structured_call_info_json,
            current_agent_task: task_input,
            current_progress_thinking: &actions.latest_thinking,
            action_history: &actions.render_history,
        };

        Ok(build_prompt(&sections))
    }
}

/// Test-only entry point (§8 resume scenario): drives the checkpoint-load
/// path against a pre-seeded `agent_id` instead of pushing a fresh one, the
/// way a restarted process resumes an interrupted agent.
#[cfg(any(test, feature = "testing"))]
impl AgentExecutor {
    pub async fn run_for_test(&self, spec: &AgentSpec, agent_id: &AgentId, task_input: &str) -> Result<TurnOutcome, Error> {
        self.run_pushed(spec, agent_id, task_input).await
    }
}

fn render_action_line_len(record: &ActionRecord) -> usize {
    record.tool_name.len() + record.result.output.len() + 32
}

fn render_action_history_brief(history: &[ActionRecord]) -> String {
    if history.is_empty() {
        return "(none yet)".to_string();
    }
    history
        .iter()
        .rev()
        .take(20)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .map(|r| format!("- {} -> {}", r.tool_name, truncate_brief(&r.result.output)))
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate_brief(s: &str) -> String {
    if s.len() > 200 {
        format!("{}...", &s[..200])
    } else {
        s.to_string()
    }
}

fn value_to_map(value: &Value) -> HashMap<String, Value> {
    match value {
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => HashMap::new(),
    }
}

fn map_to_value(map: &HashMap<String, Value>) -> Value {
    Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

/// Adapts `AgentExecutor` to `SubAgentRunner` (§4.4) so `ToolExecutor` can
/// recurse into a sub-agent without depending on this module's concrete
/// type, dodging the cycle the same way the original dodges it with a
/// function-local import.
struct RecursiveRunner {
    executor: AgentExecutor,
}

#[async_trait]
impl SubAgentRunner for RecursiveRunner {
    async fn run_sub_agent(&self, agent_name: &str, _level: AgentLevel, task_input: &str) -> Result<ActionResult, Error> {
        match self.executor.run(agent_name, task_input).await? {
            TurnOutcome::Done(result) => Ok(result),
            TurnOutcome::TimedOut => Ok(ActionResult {
                status: ActionStatus::Error,
                output: String::new(),
                error_information: Some(format!("sub-agent '{agent_name}' timed out")),
            }),
        }
    }
}
