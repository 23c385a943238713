use serde::{Deserialize, Serialize};

/// A model listed under `models` / `figure_models` / `compressor_models`:
/// either a bare name, or a full entry carrying a provider override and
/// per-call header/body extras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelSpec {
    Name(String),
    Full(ModelSpecEntry),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpecEntry {
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub extra_headers: Option<std::collections::HashMap<String, String>>,
    #[serde(default)]
    pub extra_body: Option<serde_json::Value>,
}

impl ModelSpec {
    pub fn name(&self) -> &str {
        match self {
            ModelSpec::Name(n) => n,
            ModelSpec::Full(entry) => &entry.name,
        }
    }
}

/// `run_env_config/llm_config.yaml` — the LLM Client's connection and
/// model-selection parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_max_context_window")]
    pub max_context_window: usize,

    #[serde(default = "default_timeout")]
    pub timeout: u64,

    #[serde(default = "default_stream_timeout")]
    pub stream_timeout: u64,

    #[serde(default = "default_first_chunk_timeout")]
    pub first_chunk_timeout: u64,

    #[serde(default)]
    pub models: Vec<ModelSpec>,

    #[serde(default)]
    pub figure_models: Vec<ModelSpec>,

    #[serde(default)]
    pub compressor_models: Vec<ModelSpec>,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_context_window() -> usize {
    128_000
}

fn default_timeout() -> u64 {
    120
}

fn default_stream_timeout() -> u64 {
    300
}

fn default_first_chunk_timeout() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_context_window: default_max_context_window(),
            timeout: default_timeout(),
            stream_timeout: default_stream_timeout(),
            first_chunk_timeout: default_first_chunk_timeout(),
            models: Vec::new(),
            figure_models: Vec::new(),
            compressor_models: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_llm_config() {
        let config = LlmConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.max_context_window, 128_000);
    }

    #[test]
    fn test_parse_bare_model_name() {
        let yaml = "name: gpt-4o";
        let spec: ModelSpecEntry = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.name, "gpt-4o");
        assert!(spec.provider.is_none());
    }

    #[test]
    fn test_parse_model_spec_untagged() {
        let yaml = r#"
- gpt-4o
- name: claude-sonnet
  provider: anthropic
"#;
        let specs: Vec<ModelSpec> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name(), "gpt-4o");
        assert_eq!(specs[1].name(), "claude-sonnet");
        match &specs[1] {
            ModelSpec::Full(entry) => assert_eq!(entry.provider.as_deref(), Some("anthropic")),
            ModelSpec::Name(_) => panic!("expected full entry"),
        }
    }
}
