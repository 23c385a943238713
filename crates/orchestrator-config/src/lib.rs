//! Layered configuration loading: built-in defaults, then
//! `run_env_config/*.yaml`, then `ORCHESTRATOR_*` environment overrides —
//! the same precedence order the teacher's `AgentsConfig::load()` and
//! `qq-cli` config layering use, adapted from TOML to YAML.

mod agent_library;
mod llm;
mod tool;

pub use agent_library::{agent_library_dir, AgentDef, AgentDefKind, AgentLibraryConfig, AgentPrompts, GeneralPrompts};
pub use llm::{LlmConfig, ModelSpec, ModelSpecEntry};
pub use tool::ToolConfig;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use orchestrator_core::Error;
use std::path::PathBuf;

/// Resolves the directory containing `run_env_config/` and
/// `agent_library/`. `ORCHESTRATOR_CONFIG_DIR` takes precedence; otherwise
/// falls back to the platform config directory, mirroring the teacher's
/// `dirs::config_dir()` use in `AgentsConfig::config_path()`.
pub fn config_root() -> PathBuf {
    if let Ok(dir) = std::env::var("ORCHESTRATOR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("orchestrator")
}

/// Loads `run_env_config/llm_config.yaml`, falling back to `Default` when
/// the file is missing, then applies `ORCHESTRATOR_<FIELD>` overrides.
pub fn load_llm_config() -> Result<LlmConfig, Error> {
    load_llm_config_from(&config_root())
}

pub fn load_llm_config_from(root: &std::path::Path) -> Result<LlmConfig, Error> {
    let path = root.join("run_env_config").join("llm_config.yaml");
    let mut figment = Figment::from(Serialized::defaults(LlmConfig::default()));
    if path.exists() {
        figment = figment.merge(Yaml::file(&path));
    }
    figment = figment.merge(Env::prefixed("ORCHESTRATOR_"));
    figment
        .extract()
        .map_err(|e| Error::config(format!("llm_config.yaml: {e}")))
}

/// Loads `run_env_config/tool_config.yaml`, falling back to `Default` when
/// the file is missing, then applies `ORCHESTRATOR_<FIELD>` overrides.
pub fn load_tool_config() -> Result<ToolConfig, Error> {
    load_tool_config_from(&config_root())
}

pub fn load_tool_config_from(root: &std::path::Path) -> Result<ToolConfig, Error> {
    let path = root.join("run_env_config").join("tool_config.yaml");
    let mut figment = Figment::from(Serialized::defaults(ToolConfig::default()));
    if path.exists() {
        figment = figment.merge(Yaml::file(&path));
    }
    figment = figment.merge(Env::prefixed("ORCHESTRATOR_"));
    figment
        .extract()
        .map_err(|e| Error::config(format!("tool_config.yaml: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_root_honors_env_override() {
        std::env::set_var("ORCHESTRATOR_CONFIG_DIR", "/tmp/orchestrator-test-config");
        assert_eq!(
            config_root(),
            PathBuf::from("/tmp/orchestrator-test-config")
        );
        std::env::remove_var("ORCHESTRATOR_CONFIG_DIR");
    }

    #[test]
    fn test_missing_llm_config_falls_back_to_default() {
        let dir = tempfile_dir();
        let config = load_llm_config_from(dir.path()).unwrap();
        assert_eq!(config, LlmConfig::default());
    }

    #[test]
    fn test_llm_config_file_overrides_defaults() {
        let dir = tempfile_dir();
        let run_env = dir.path().join("run_env_config");
        std::fs::create_dir_all(&run_env).unwrap();
        let mut file = std::fs::File::create(run_env.join("llm_config.yaml")).unwrap();
        writeln!(file, "base_url: https://example.invalid/v1").unwrap();
        writeln!(file, "temperature: 0.2").unwrap();
        drop(file);

        let config = load_llm_config_from(dir.path()).unwrap();
        assert_eq!(config.base_url, "https://example.invalid/v1");
        assert_eq!(config.temperature, 0.2);
    }

    #[test]
    fn test_missing_tool_config_falls_back_to_default() {
        let dir = tempfile_dir();
        let config = load_tool_config_from(dir.path()).unwrap();
        assert_eq!(config, ToolConfig::default());
    }

    fn tempfile_dir() -> TempGuard {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let id = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!("orchestrator-config-test-{}-{}", std::process::id(), id));
        let _ = std::fs::remove_dir_all(&path);
        std::fs::create_dir_all(&path).unwrap();
        TempGuard { path }
    }

    struct TempGuard {
        path: PathBuf,
    }

    impl TempGuard {
        fn path(&self) -> &std::path::Path {
            &self.path
        }
    }

    impl Drop for TempGuard {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }
}
