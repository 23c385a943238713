//! Loader for `agent_library/<system>/*.yaml` (§6): resolves agent names to
//! `orchestrator_core::executor::AgentSpec`, standing in for the YAML-driven
//! agent/tool definitions the executor is written against.
//!
//! Every agent, external tool, and `final_output` terminator in a system is
//! one YAML file: `{name, type, level, description, available_tools,
//! parameters, model_type?, prompts?}`. `general_prompts.yaml` holds the
//! one templated system-prompt shell shared by every `llm_call_agent` in
//! the directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use orchestrator_core::executor::{AgentLibrary, AgentSpec};
use orchestrator_core::tool_executor::{ToolKind, ToolCatalog};
use orchestrator_core::{Error, ToolDefinition, ToolParameters};
use serde::{Deserialize, Serialize};

use crate::LlmConfig;

/// One `agent_library/<system>/*.yaml` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AgentDefKind,
    #[serde(default)]
    pub level: u8,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub available_tools: Vec<String>,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub model_type: Option<String>,
    #[serde(default)]
    pub prompts: Option<AgentPrompts>,
    #[serde(default)]
    pub thinking_interval: Option<u32>,
    #[serde(default)]
    pub max_turns: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentDefKind {
    LlmCallAgent,
    ToolCallAgent,
    FinalOutput,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPrompts {
    #[serde(default)]
    pub agent_responsibility: String,
    #[serde(default)]
    pub agent_workflow: String,
}

/// `agent_library/<system>/general_prompts.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralPrompts {
    pub system_prompt_xml: String,
}

/// One loaded `agent_library/<system>/` directory: the shared prompt shell
/// plus every agent/tool definition, keyed by name.
pub struct AgentLibraryConfig {
    general_prompts: GeneralPrompts,
    defs: HashMap<String, AgentDef>,
    llm_config: LlmConfig,
}

impl AgentLibraryConfig {
    /// Load every `*.yaml` file directly under `dir` except
    /// `general_prompts.yaml`, which is parsed separately as the shared
    /// prompt template.
    pub fn load(dir: &Path, llm_config: LlmConfig) -> Result<Self, Error> {
        let general_path = dir.join("general_prompts.yaml");
        let general_raw = std::fs::read_to_string(&general_path)
            .map_err(|e| Error::config(format!("{}: {e}", general_path.display())))?;
        let general_prompts: GeneralPrompts = serde_yaml::from_str(&general_raw)
            .map_err(|e| Error::config(format!("{}: {e}", general_path.display())))?;

        let mut defs = HashMap::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| Error::config(format!("{}: {e}", dir.display())))?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::config(e.to_string()))?;
            let path = entry.path();
            if path.file_name().and_then(|n| n.to_str()) == Some("general_prompts.yaml") {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
                continue;
            }
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
            let def: AgentDef = serde_yaml::from_str(&raw)
                .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
            defs.insert(def.name.clone(), def);
        }

        Ok(Self { general_prompts, defs, llm_config })
    }

    pub fn from_env_root(system: &str, llm_config: LlmConfig) -> Result<Self, Error> {
        Self::load(&agent_library_dir(&crate::config_root(), system), llm_config)
    }

    fn render_system_prompt(&self, def: &AgentDef) -> String {
        let prompts = def.prompts.clone().unwrap_or(AgentPrompts {
            agent_responsibility: String::new(),
            agent_workflow: String::new(),
        });
        self.general_prompts
            .system_prompt_xml
            .replace("{agent_name}", &def.name)
            .replace("{agent_responsibility}", &prompts.agent_responsibility)
            .replace("{agent_workflow}", &prompts.agent_workflow)
    }

    /// Resolve the model name for `def`: `model_type` selects which of the
    /// three `llm_config` model lists to draw from (§6); falls back to the
    /// first of `models` when unset or empty.
    fn resolve_model(&self, def: &AgentDef) -> String {
        let list = match def.model_type.as_deref() {
            Some("figure") | Some("figure_models") => &self.llm_config.figure_models,
            Some("compressor") | Some("compressor_models") => &self.llm_config.compressor_models,
            _ => &self.llm_config.models,
        };
        list.first()
            .map(|m| m.name().to_string())
            .or_else(|| self.llm_config.models.first().map(|m| m.name().to_string()))
            .unwrap_or_else(|| "default".to_string())
    }

    fn tool_definition_for(&self, name: &str) -> ToolDefinition {
        match self.defs.get(name) {
            Some(def) if def.kind == AgentDefKind::LlmCallAgent => {
                // Sub-agent invocation always takes `task_input` (§4.4).
                ToolDefinition::new(format!("Agent[{}]", name), def.description.clone())
                    .with_parameters(
                        ToolParameters::new().add_property(
                            "task_input",
                            orchestrator_core::PropertySchema::string("The task to hand to this sub-agent"),
                            true,
                        ),
                    )
            }
            Some(def) => {
                let params: ToolParameters =
                    serde_json::from_value(def.parameters.clone()).unwrap_or_default();
                ToolDefinition::new(name, def.description.clone()).with_parameters(params)
            }
            None => ToolDefinition::new(name, String::new()),
        }
    }

    fn tool_kind_for(&self, name: &str) -> Option<ToolKind> {
        if name == "final_output" {
            return Some(ToolKind::FinalOutput);
        }
        match self.defs.get(name) {
            Some(def) => match def.kind {
                AgentDefKind::FinalOutput => Some(ToolKind::FinalOutput),
                AgentDefKind::ToolCallAgent => {
                    Some(ToolKind::ExternalTool { schema: def.parameters.clone() })
                }
                AgentDefKind::LlmCallAgent => {
                    Some(ToolKind::SubAgent { agent_name: def.name.clone(), level: def.level })
                }
            },
            None => None,
        }
    }

    /// The tool name exposed to the LLM: sub-agents are presented as
    /// `Agent[name]` (matching `tool_executor`'s dispatch key shape),
    /// everything else keeps its configured name verbatim.
    fn catalog_key_for(&self, name: &str) -> String {
        match self.defs.get(name) {
            Some(def) if def.kind == AgentDefKind::LlmCallAgent => format!("Agent[{}]", name),
            _ => name.to_string(),
        }
    }
}

impl AgentLibrary for AgentLibraryConfig {
    fn get(&self, agent_name: &str) -> Option<AgentSpec> {
        let def = self.defs.get(agent_name)?;
        if def.kind != AgentDefKind::LlmCallAgent {
            return None;
        }

        let mut spec = AgentSpec::new(
            def.name.clone(),
            self.render_system_prompt(def),
            self.resolve_model(def),
            def.level,
        );
        if let Some(interval) = def.thinking_interval {
            spec.thinking_interval = interval;
        }
        if let Some(max_turns) = def.max_turns {
            spec.max_turns = max_turns;
        }

        let mut catalog = ToolCatalog::new();
        let mut tool_definitions = Vec::new();
        for tool_name in &def.available_tools {
            let Some(kind) = self.tool_kind_for(tool_name) else { continue };
            let key = self.catalog_key_for(tool_name);
            tool_definitions.push(self.tool_definition_for(tool_name));
            catalog.insert(key, kind);
        }
        // `final_output` is always available even when a definition omits
        // it from `available_tools`, matching the original's implicit
        // built-in terminator.
        if !def.available_tools.iter().any(|t| t == "final_output") {
            catalog.insert("final_output", ToolKind::FinalOutput);
            tool_definitions.push(
                ToolDefinition::new("final_output", "Terminate this agent with a final result")
                    .with_parameters(
                        ToolParameters::new()
                            .add_property(
                                "status",
                                orchestrator_core::PropertySchema::enum_string(
                                    "success or error",
                                    vec!["success".to_string(), "error".to_string()],
                                ),
                                true,
                            )
                            .add_property(
                                "output",
                                orchestrator_core::PropertySchema::string("The final result text"),
                                true,
                            )
                            .add_property(
                                "error_information",
                                orchestrator_core::PropertySchema::string("Error details, if status is error"),
                                false,
                            ),
                    ),
            );
        }

        spec.catalog = catalog;
        spec.tool_definitions = tool_definitions;
        Some(spec)
    }
}

/// `agent_library/<system>/` under the resolved config root (§6).
pub fn agent_library_dir(config_root: &Path, system: &str) -> PathBuf {
    config_root.join("agent_library").join(system)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    fn sample_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        write_file(
            dir.path(),
            "general_prompts.yaml",
            "system_prompt_xml: |\n  You are {agent_name}.\n  Responsibility: {agent_responsibility}\n  Workflow: {agent_workflow}\n",
        );
        write_file(
            dir.path(),
            "researcher.yaml",
            r#"
name: researcher
type: llm_call_agent
level: 1
description: Researches a topic
available_tools: [search_web, final_output]
prompts:
  agent_responsibility: find facts
  agent_workflow: search then summarize
"#,
        );
        write_file(
            dir.path(),
            "search_web.yaml",
            r#"
name: search_web
type: tool_call_agent
description: Search the web
parameters:
  type: object
  properties:
    query:
      type: string
      description: search query
  required: [query]
"#,
        );
        write_file(
            dir.path(),
            "final_output.yaml",
            r#"
name: final_output
type: final_output
description: Terminates the agent
"#,
        );
        dir
    }

    #[test]
    fn test_load_parses_all_defs() {
        let dir = sample_dir();
        let lib = AgentLibraryConfig::load(dir.path(), LlmConfig::default()).unwrap();
        assert!(lib.defs.contains_key("researcher"));
        assert!(lib.defs.contains_key("search_web"));
    }

    #[test]
    fn test_get_builds_agent_spec_with_templated_prompt() {
        let dir = sample_dir();
        let lib = AgentLibraryConfig::load(dir.path(), LlmConfig::default()).unwrap();
        let spec = lib.get("researcher").unwrap();
        assert!(spec.system_prompt.contains("You are researcher"));
        assert!(spec.system_prompt.contains("find facts"));
        assert_eq!(spec.level, 1);
    }

    #[test]
    fn test_get_resolves_tool_catalog() {
        let dir = sample_dir();
        let lib = AgentLibraryConfig::load(dir.path(), LlmConfig::default()).unwrap();
        let spec = lib.get("researcher").unwrap();
        assert!(spec.catalog.get("search_web").is_some());
        assert!(spec.catalog.get("final_output").is_some());
        assert!(spec.tool_definitions.iter().any(|t| t.name == "search_web"));
    }

    #[test]
    fn test_get_on_non_agent_returns_none() {
        let dir = sample_dir();
        let lib = AgentLibraryConfig::load(dir.path(), LlmConfig::default()).unwrap();
        assert!(lib.get("search_web").is_none());
        assert!(lib.get("nonexistent").is_none());
    }

    #[test]
    fn test_final_output_implicitly_available() {
        let dir = sample_dir();
        write_file(
            dir.path(),
            "planner.yaml",
            r#"
name: planner
type: llm_call_agent
level: 2
description: Plans work
available_tools: [search_web]
"#,
        );
        let lib = AgentLibraryConfig::load(dir.path(), LlmConfig::default()).unwrap();
        let spec = lib.get("planner").unwrap();
        assert!(spec.catalog.get("final_output").is_some());
    }
}
