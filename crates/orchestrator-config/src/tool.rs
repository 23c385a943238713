use serde::{Deserialize, Serialize};

/// `run_env_config/tool_config.yaml` (§6): the endpoint the Tool Executor
/// dispatches external tool calls to, plus the manual-mode whitelist (§4.4)
/// that was a CLI session toggle in the original; since this workspace's
/// driver is a non-interactive binary (§9 Open Question), manual mode is
/// selected here instead of through an interactive prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_tools_server")]
    pub tools_server: String,

    #[serde(default)]
    pub manual_mode: bool,

    #[serde(default = "default_confirmation_whitelist")]
    pub confirmation_whitelist: Vec<String>,
}

fn default_tools_server() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_confirmation_whitelist() -> Vec<String> {
    vec!["file_write".to_string(), "execute_code".to_string(), "pip_install".to_string()]
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            tools_server: default_tools_server(),
            manual_mode: false,
            confirmation_whitelist: default_confirmation_whitelist(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tool_config() {
        let config = ToolConfig::default();
        assert_eq!(config.tools_server, "http://127.0.0.1:8000");
    }

    #[test]
    fn test_parse_tool_config_yaml() {
        let yaml = "tools_server: https://tools.internal.example/api";
        let config: ToolConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.tools_server, "https://tools.internal.example/api");
    }
}
