//! Resolves the configured `LlmConfig` to a concrete `Provider` backend
//! (§4.7: "selected by `model_type` / provider routing in
//! `run_env_config/llm_config.yaml`"), mirroring the teacher's
//! `qq-cli/src/main.rs` provider-selection match on `--provider`/config.

use std::sync::Arc;

use orchestrator_config::LlmConfig;
use orchestrator_core::Provider;
use orchestrator_llm::{AnthropicProvider, GeminiProvider, OpenAIProvider};

/// The backend family to dial, resolved from the first configured model's
/// `provider` field, falling back to a `base_url` heuristic.
fn resolve_provider_name(config: &LlmConfig) -> String {
    if let Some(spec) = config.models.first() {
        if let orchestrator_config::ModelSpec::Full(entry) = spec {
            if let Some(provider) = &entry.provider {
                return provider.to_lowercase();
            }
        }
    }
    if config.base_url.contains("anthropic") {
        "anthropic".to_string()
    } else if config.base_url.contains("generativelanguage") {
        "gemini".to_string()
    } else {
        "openai".to_string()
    }
}

pub fn build_provider(config: &LlmConfig) -> Arc<dyn Provider> {
    let default_model = config.models.first().map(|m| m.name().to_string());

    match resolve_provider_name(config).as_str() {
        "anthropic" => {
            let mut provider = AnthropicProvider::new(config.api_key.clone()).with_base_url(config.base_url.clone());
            if let Some(model) = default_model {
                provider = provider.with_default_model(model);
            }
            Arc::new(provider)
        }
        "gemini" => {
            let mut provider = GeminiProvider::new(config.api_key.clone()).with_base_url(config.base_url.clone());
            if let Some(model) = default_model {
                provider = provider.with_default_model(model);
            }
            Arc::new(provider)
        }
        _ => {
            let mut provider = OpenAIProvider::new(config.api_key.clone()).with_base_url(config.base_url.clone());
            if let Some(model) = default_model {
                provider = provider.with_default_model(model);
            }
            Arc::new(provider)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_provider_name_from_base_url() {
        let mut config = LlmConfig::default();
        config.base_url = "https://api.anthropic.com/v1".to_string();
        assert_eq!(resolve_provider_name(&config), "anthropic");
    }

    #[test]
    fn test_resolve_provider_name_defaults_to_openai() {
        let config = LlmConfig::default();
        assert_eq!(resolve_provider_name(&config), "openai");
    }

    #[test]
    fn test_resolve_provider_name_from_model_entry() {
        let mut config = LlmConfig::default();
        config.models.push(orchestrator_config::ModelSpec::Full(orchestrator_config::ModelSpecEntry {
            name: "gemini-2.5-pro".to_string(),
            provider: Some("Gemini".to_string()),
            extra_headers: None,
            extra_body: None,
        }));
        assert_eq!(resolve_provider_name(&config), "gemini");
    }
}
