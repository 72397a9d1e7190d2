//! Configuration management for droid.toml

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub host: String,
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 11434,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Model the agent talks to
    pub model: String,
    /// Model round-trips before the run is declared exhausted
    pub max_iterations: usize,
    /// Overrides the built-in system prompt when set
    pub system_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            model: "gpt-oss:20b".to_string(),
            max_iterations: 10,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Device command timeout
    pub adb_secs: u64,
    /// Build API query timeout
    pub http_secs: u64,
    /// Artifact download timeout
    pub download_secs: u64,
    /// Package install timeout
    pub install_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            adb_secs: 30,
            http_secs: 10,
            download_secs: 60,
            install_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from droid.toml
    pub fn load() -> Result<Self> {
        Self::load_from(Self::find_config_path()?)
    }

    /// Try to load configuration, returning None if not found
    pub fn try_load() -> Option<Self> {
        Self::load().ok()
    }

    /// Minimal default configuration for when droid.toml is missing
    pub fn default_minimal() -> Self {
        Self::default()
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    /// Find droid.toml by searching current directory and parents
    pub fn find_config_path() -> Result<PathBuf> {
        let mut current = std::env::current_dir()?;

        for _ in 0..10 {
            let candidate = current.join("droid.toml");
            if candidate.exists() {
                return Ok(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        anyhow::bail!("droid.toml not found in current directory or parents")
    }

    /// Get Ollama base URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.ollama.host, self.ollama.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[ollama]
host = "127.0.0.1"
port = 11434

[agent]
model = "qwen3:8b"
max_iterations = 6

[timeouts]
adb_secs = 15
http_secs = 10
download_secs = 120
install_secs = 90
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.ollama.port, 11434);
        assert_eq!(config.agent.model, "qwen3:8b");
        assert_eq!(config.agent.max_iterations, 6);
        assert_eq!(config.timeouts.download_secs, 120);
        assert_eq!(config.ollama_url(), "http://127.0.0.1:11434");
    }

    #[test]
    fn test_missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("[agent]\nmodel = \"llama3.2\"\n").unwrap();
        assert_eq!(config.agent.model, "llama3.2");
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.ollama.port, 11434);
        assert_eq!(config.timeouts.adb_secs, 30);
        assert_eq!(config.timeouts.install_secs, 60);
    }

    #[test]
    fn test_default_minimal() {
        let config = Config::default_minimal();
        assert_eq!(config.ollama_url(), "http://127.0.0.1:11434");
        assert_eq!(config.agent.max_iterations, 10);
        assert!(config.agent.system_prompt.is_none());
    }
}
