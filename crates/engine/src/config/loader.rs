use std::collections::HashMap;
use std::path::{Path, PathBuf};

use toolrelay_common::config::SystemConfig;

use super::validation;

/// Prompt template holding the system prompt preamble.
pub const SYSTEM_PROMPT: &str = "system";

/// Complete engine configuration loaded from the config directory.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// system.toml merged with environment overrides.
    pub system: SystemConfig,
    /// Prompt templates keyed by filename stem (e.g. "system").
    pub prompts: HashMap<String, String>,
    pub config_dir: PathBuf,
}

impl EngineConfig {
    /// Defaults only, no files read.
    pub fn new(system: SystemConfig) -> Self {
        Self {
            system,
            prompts: HashMap::new(),
            config_dir: PathBuf::from("config"),
        }
    }

    pub fn prompt(&self, name: &str) -> Option<&str> {
        self.prompts
            .get(name)
            .map(String::as_str)
            .filter(|p| !p.trim().is_empty())
    }
}

/// Load all configuration from the given config directory.
///
/// A missing system.toml or prompts directory falls back to defaults;
/// anything present but broken is an error. Validation failure refuses startup.
pub fn load_config(config_dir: &Path) -> Result<EngineConfig, ConfigError> {
    load_config_with(config_dir, |key| {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    })
}

/// Like [`load_config`], with environment lookups routed through `lookup`.
pub fn load_config_with<F>(config_dir: &Path, lookup: F) -> Result<EngineConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    tracing::info!(config_dir = %config_dir.display(), "Loading configuration");

    let mut system = load_system_config(&config_dir.join("system.toml"))?;
    system
        .apply_overrides(lookup)
        .map_err(|e| ConfigError::Environment(e.to_string()))?;

    let prompts = load_prompts(&config_dir.join("prompts"))?;

    let config = EngineConfig {
        system,
        prompts,
        config_dir: config_dir.to_path_buf(),
    };

    validation::validate(&config)?;

    tracing::info!(
        provider = %config.system.llm.provider,
        model = %config.system.llm.model,
        prompts = config.prompts.len(),
        "Configuration loaded successfully"
    );

    Ok(config)
}

fn load_system_config(path: &Path) -> Result<SystemConfig, ConfigError> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "system.toml not found, using defaults");
        return Ok(SystemConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&content).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

fn load_prompts(prompts_dir: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let mut prompts = HashMap::new();

    if !prompts_dir.exists() {
        tracing::warn!(
            path = %prompts_dir.display(),
            "Prompts directory does not exist, using built-in prompts"
        );
        return Ok(prompts);
    }

    let entries = std::fs::read_dir(prompts_dir).map_err(|e| ConfigError::FileRead {
        path: prompts_dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ConfigError::FileRead {
            path: prompts_dir.to_path_buf(),
            source: e,
        })?;

        let path = entry.path();
        if path
            .extension()
            .is_some_and(|ext| ext == "md" || ext == "txt")
        {
            let Some(name) = path.file_stem().and_then(|n| n.to_str()) else {
                continue;
            };

            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::FileRead {
                path: path.clone(),
                source: e,
            })?;

            tracing::debug!(prompt = %name, "Loaded prompt template");
            prompts.insert(name.to_string(), content);
        }
    }

    Ok(prompts)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {detail}")]
    Parse { path: PathBuf, detail: String },

    #[error("Invalid environment override: {0}")]
    Environment(String),

    #[error("Validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolrelay_common::config::{LlmProvider, TurnMode};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "toolrelay-config-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = scratch_dir("empty");
        let config = load_config_with(&dir, no_env).unwrap();
        assert_eq!(config.system.llm.provider, LlmProvider::Ollama);
        assert!(config.prompts.is_empty());
        assert!(config.prompt(SYSTEM_PROMPT).is_none());
    }

    #[test]
    fn test_loads_toml_prompts_and_env() {
        let dir = scratch_dir("full");
        std::fs::write(
            dir.join("system.toml"),
            "[llm]\nmodel = \"llama3.1\"\n\n[orchestration]\nturn_mode = \"fold_result\"\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.join("prompts")).unwrap();
        std::fs::write(dir.join("prompts").join("system.md"), "Be brief.").unwrap();
        std::fs::write(dir.join("prompts").join("notes.json"), "{}").unwrap();

        let config = load_config_with(&dir, |key| {
            (key == "OLLAMA_HOST").then(|| "http://gpu-box:11434".to_string())
        })
        .unwrap();

        assert_eq!(config.system.llm.model, "llama3.1");
        assert_eq!(config.system.llm.host, "http://gpu-box:11434");
        assert_eq!(config.system.orchestration.turn_mode, TurnMode::FoldResult);
        assert_eq!(config.prompt(SYSTEM_PROMPT), Some("Be brief."));
        assert_eq!(config.prompts.len(), 1);
    }

    #[test]
    fn test_broken_toml_is_parse_error() {
        let dir = scratch_dir("broken");
        std::fs::write(dir.join("system.toml"), "[llm\nmodel = ").unwrap();
        let err = load_config_with(&dir, no_env).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_merged_config_refuses_to_load() {
        let dir = scratch_dir("invalid");
        std::fs::write(dir.join("system.toml"), "[llm]\nmodel = \"\"\n").unwrap();
        let err = load_config_with(&dir, no_env).unwrap_err();
        assert!(err.to_string().contains("llm.model must not be empty"));
    }
}
