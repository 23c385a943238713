//! The driver (§2, §6): `Executor.Run(rootAgent, userInput)`. Constructs
//! the one event sink and one LLM connection pool for the process (§9
//! "Global singletons" — constructed here, passed explicitly, no
//! package-level mutable state), runs the State Cleaner, then drives the
//! root agent to completion.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use orchestrator_config::AgentLibraryConfig;
use orchestrator_core::{
    clean_before_start, AgentExecutor, AgentExecutorConfig, ChatTimeouts, Error, Event, EventSink,
    HierarchyManager, LlmClient, PersistenceStore,
};
use orchestrator_tools::{ConfirmationClient, HttpToolServerClient};

use crate::provider::build_provider;

pub struct RunArgs {
    pub task_path: PathBuf,
    pub input: String,
    pub agent_name: String,
    pub system: String,
}

/// Process exit code (§6): 0 success, 1 error or max-turns exceeded, 130
/// user interrupt.
pub async fn run(args: RunArgs, events: Arc<dyn EventSink>) -> i32 {
    let start = Instant::now();

    match run_inner(&args, events.clone()).await {
        Ok(true) => {
            events
                .emit(Event::End { status: "success".to_string(), duration_ms: start.elapsed().as_millis() as u64 })
                .await;
            0
        }
        Ok(false) => {
            events
                .emit(Event::End { status: "max_turns_exceeded".to_string(), duration_ms: start.elapsed().as_millis() as u64 })
                .await;
            1
        }
        Err(e) => {
            events.emit(Event::Error { agent: args.agent_name.clone(), text: e.to_string() }).await;
            events
                .emit(Event::End { status: "error".to_string(), duration_ms: start.elapsed().as_millis() as u64 })
                .await;
            1
        }
    }
}

async fn run_inner(args: &RunArgs, events: Arc<dyn EventSink>) -> Result<bool, Error> {
    let llm_config = orchestrator_config::load_llm_config()?;
    let tool_config = orchestrator_config::load_tool_config()?;

    let root = orchestrator_config::config_root();
    let library = Arc::new(AgentLibraryConfig::from_env_root(&args.system, llm_config.clone())?);

    let store = Arc::new(PersistenceStore::new(PersistenceStore::default_root()));
    let fingerprint = orchestrator_core::task_fingerprint(&args.task_path);
    let hierarchy = HierarchyManager::load(store.clone(), fingerprint);

    // State Cleaner (§4.6): reconcile any interrupted prior run before this
    // instruction starts.
    let snapshot = hierarchy.get_context().await;
    let (new_current, outcome, history_entry) = clean_before_start(snapshot.current, Some(&args.input));
    tracing::info!(?outcome, "state cleaner reconciled prior task context");
    match history_entry {
        Some(entry) => hierarchy.replace_current_with_history(new_current, entry).await?,
        None => hierarchy.replace_current(new_current).await?,
    }
    hierarchy.clear_stack().await?;
    hierarchy.start_new_instruction(&args.input).await?;

    let provider = build_provider(&llm_config);
    let timeouts = ChatTimeouts {
        overall: std::time::Duration::from_secs(llm_config.stream_timeout),
        inter_chunk: std::time::Duration::from_secs(20),
        first_chunk: std::time::Duration::from_secs(llm_config.first_chunk_timeout),
    };
    let llm = Arc::new(LlmClient::new(provider, timeouts));

    let tool_server = Arc::new(HttpToolServerClient::new(tool_config.tools_server.clone()));
    let default_model = llm_config
        .compressor_models
        .first()
        .or_else(|| llm_config.models.first())
        .map(|m| m.name().to_string())
        .unwrap_or_else(|| "default".to_string());
    let summarizer = Arc::new(LlmSummarizer { llm: llm.clone(), default_model });

    let config = AgentExecutorConfig { task_id: hierarchy.fingerprint().to_string() };
    let mut executor = AgentExecutor::new(store, hierarchy, llm, library, tool_server, summarizer, config)
        .with_event_sink(events);
    if tool_config.manual_mode {
        let gate = Arc::new(ConfirmationClient::new(tool_config.tools_server.clone()));
        executor = executor.with_manual_mode(tool_config.confirmation_whitelist.clone(), gate);
    }

    tracing::debug!(config_root = %root.display(), "resolved configuration root");

    let outcome = executor.run(&args.agent_name, &args.input).await?;
    match outcome {
        orchestrator_core::TurnOutcome::Done(result) => {
            Ok(result.status == orchestrator_core::ActionStatus::Success)
        }
        orchestrator_core::TurnOutcome::TimedOut => Ok(false),
    }
}

/// Adapts the process's `LlmClient` to the Context Builder's `Summarizer`
/// trait (§4.3), using a stateless `tool_choice=none` call the same way
/// `AgentExecutor::invoke_thinking` does for the Thinking sub-service.
struct LlmSummarizer {
    llm: Arc<LlmClient>,
    default_model: String,
}

#[async_trait::async_trait]
impl orchestrator_core::Summarizer for LlmSummarizer {
    async fn summarize(&self, system_prompt: &str, content: &str, max_chars: usize) -> Result<String, Error> {
        let mut request = orchestrator_core::ChatRequest::new(
            vec![orchestrator_core::Message::user(format!(
                "Summarize the following in at most {max_chars} characters:\n\n{content}"
            ))],
            self.default_model.clone(),
            system_prompt.to_string(),
        );
        request.tool_choice = orchestrator_core::ToolChoice::None;
        request.tools = Vec::new();

        let response = self.llm.chat(request).await?;
        if response.status != orchestrator_core::ChatStatus::Success {
            return Err(Error::network(response.error.unwrap_or_else(|| "summarization call failed".to_string())));
        }
        Ok(response.output.chars().take(max_chars).collect())
    }
}
