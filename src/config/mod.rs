// Toolflow — Workflow client for external agent tool servers
// License: Apache-2.0

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("home directory not found")]
    NoHomeDir,
    #[error("no API key found for any provider")]
    MissingApiKey,
    #[error("invalid server configuration: {0}")]
    InvalidServer(String),
}

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workflows: WorkflowsConfig,
    #[serde(default)]
    pub run_log: RunLogConfig,
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefaults {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_tool_iterations: default_max_tool_iterations(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_tokens() -> usize {
    4096
}
fn default_temperature() -> f64 {
    0.0
}
fn default_max_tool_iterations() -> usize {
    20
}
fn default_max_retries() -> usize {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

// ---------------------------------------------------------------------------
// Providers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub openai: ProviderEntry,
    #[serde(default)]
    pub openrouter: ProviderEntry,
    #[serde(default)]
    pub groq: ProviderEntry,
    #[serde(default)]
    pub anthropic: ProviderEntry,
    #[serde(default)]
    pub vllm: ProviderEntry,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderEntry {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: String,
}

// ---------------------------------------------------------------------------
// Tool server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Stdio,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub transport: TransportKind,
    /// Executable to spawn (stdio transport).
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment for the spawned server.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Names of parent variables passed through on top of the base allowlist.
    #[serde(default)]
    pub pass_env: Vec<String>,
    /// Tool ids whose credentials are forwarded in addition to those named
    /// by workflows.
    #[serde(default)]
    pub credential_tools: Vec<String>,
    /// JSON-RPC endpoint (http transport).
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            pass_env: Vec::new(),
            credential_tools: Vec::new(),
            url: String::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    30
}

// ---------------------------------------------------------------------------
// Workflows / run log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkflowsConfig {
    /// Workflow definition file (JSON array, or YAML by extension).
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogConfig {
    #[serde(default = "default_run_log_path")]
    pub path: String,
}

impl Default for RunLogConfig {
    fn default() -> Self {
        Self {
            path: default_run_log_path(),
        }
    }
}

fn default_run_log_path() -> String {
    "~/.toolflow/logs/runs.log".to_string()
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a JSON file, falling back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            serde_json::from_str(&contents)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides (prefix: TOOLFLOW_)
    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TOOLFLOW_AGENT_MODEL") {
            self.agent.model = v;
        }
        if let Some(n) = lookup("TOOLFLOW_AGENT_MAX_TOOL_ITERATIONS").and_then(|v| v.parse().ok()) {
            self.agent.max_tool_iterations = n;
        }
        if let Some(n) = lookup("TOOLFLOW_AGENT_TEMPERATURE").and_then(|v| v.parse().ok()) {
            self.agent.temperature = n;
        }
        if let Some(v) = lookup("TOOLFLOW_PROVIDERS_OPENAI_API_KEY") {
            self.providers.openai.api_key = v;
        }
        if let Some(v) = lookup("TOOLFLOW_PROVIDERS_OPENAI_API_BASE") {
            self.providers.openai.api_base = v;
        }
        if let Some(v) = lookup("TOOLFLOW_PROVIDERS_OPENROUTER_API_KEY") {
            self.providers.openrouter.api_key = v;
        }
        if let Some(v) = lookup("TOOLFLOW_PROVIDERS_GROQ_API_KEY") {
            self.providers.groq.api_key = v;
        }
        if let Some(v) = lookup("TOOLFLOW_PROVIDERS_ANTHROPIC_API_KEY") {
            self.providers.anthropic.api_key = v;
        }
        if let Some(v) = lookup("TOOLFLOW_SERVER_URL") {
            self.server.url = v;
            self.server.transport = TransportKind::Http;
        }
        if let Some(v) = lookup("TOOLFLOW_SERVER_COMMAND") {
            self.server.command = v;
        }
        if let Some(v) = lookup("TOOLFLOW_WORKFLOWS_PATH") {
            self.workflows.path = v;
        }
        if let Some(v) = lookup("TOOLFLOW_RUN_LOG_PATH") {
            self.run_log.path = v;
        }
    }

    /// Get the default config file path: ~/.toolflow/config.json
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(".toolflow").join("config.json"))
    }

    pub fn run_log_path(&self) -> Result<PathBuf, ConfigError> {
        expand_home(&self.run_log.path)
    }

    /// Workflow file, if one is configured.
    pub fn workflows_path(&self) -> Result<Option<PathBuf>, ConfigError> {
        if self.workflows.path.trim().is_empty() {
            return Ok(None);
        }
        expand_home(&self.workflows.path).map(Some)
    }

    /// Find the API key and base URL for the configured model.
    /// Returns (api_key, api_base, provider_name).
    pub fn resolve_provider(&self) -> Option<(String, String, String)> {
        let model = self.agent.model.to_lowercase();

        let by_model: [(&str, &ProviderEntry, &str); 6] = [
            ("gpt", &self.providers.openai, "openai"),
            ("o1", &self.providers.openai, "openai"),
            ("o3", &self.providers.openai, "openai"),
            ("claude", &self.providers.anthropic, "anthropic"),
            ("llama", &self.providers.groq, "groq"),
            ("mixtral", &self.providers.groq, "groq"),
        ];

        for (prefix, entry, name) in by_model {
            if model.contains(prefix) && !entry.api_key.is_empty() {
                return Some((entry.api_key.clone(), api_base_for(name, entry), name.to_string()));
            }
        }

        if !self.providers.openrouter.api_key.is_empty() {
            return Some((
                self.providers.openrouter.api_key.clone(),
                api_base_for("openrouter", &self.providers.openrouter),
                "openrouter".to_string(),
            ));
        }

        let fallbacks: [(&str, &ProviderEntry); 4] = [
            ("openai", &self.providers.openai),
            ("anthropic", &self.providers.anthropic),
            ("groq", &self.providers.groq),
            ("vllm", &self.providers.vllm),
        ];

        fallbacks
            .into_iter()
            .find(|(_, entry)| !entry.api_key.is_empty())
            .map(|(name, entry)| (entry.api_key.clone(), api_base_for(name, entry), name.to_string()))
    }

    /// Validate configuration for basic correctness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolve_provider().is_none() {
            return Err(ConfigError::MissingApiKey);
        }
        self.validate_server()
    }

    /// Check only the tool server section.
    pub fn validate_server(&self) -> Result<(), ConfigError> {
        match self.server.transport {
            TransportKind::Stdio => {
                if self.server.command.trim().is_empty() {
                    return Err(ConfigError::InvalidServer(
                        "stdio transport requires server.command".to_string(),
                    ));
                }
            }
            TransportKind::Http => {
                let parsed = url::Url::parse(&self.server.url).map_err(|e| {
                    ConfigError::InvalidServer(format!("bad server.url '{}': {}", self.server.url, e))
                })?;
                if !matches!(parsed.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidServer(format!(
                        "server.url must be http(s), got '{}'",
                        parsed.scheme()
                    )));
                }
            }
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidServer(
                "server.request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configured base URL, or the provider's OpenAI-compatible endpoint.
/// Empty means the HTTP provider picks one from the key.
fn api_base_for(provider: &str, entry: &ProviderEntry) -> String {
    if !entry.api_base.is_empty() {
        return entry.api_base.clone();
    }
    match provider {
        "openrouter" => "https://openrouter.ai/api/v1".to_string(),
        "anthropic" => "https://api.anthropic.com/v1".to_string(),
        "groq" => "https://api.groq.com/openai/v1".to_string(),
        _ => String::new(),
    }
}

/// Expand a leading `~` to the home directory.
fn expand_home(path: &str) -> Result<PathBuf, ConfigError> {
    if let Some(stripped) = path.strip_prefix('~') {
        let home = dirs::home_dir().ok_or(ConfigError::NoHomeDir)?;
        Ok(home.join(stripped.trim_start_matches('/')))
    } else {
        Ok(PathBuf::from(path))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.agent.max_tool_iterations, 20);
        assert_eq!(cfg.server.transport, TransportKind::Stdio);
        assert_eq!(cfg.server.request_timeout_secs, 30);
        assert!(cfg.workflows_path().unwrap().is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "agent": {"model": "gpt-4o", "max_tool_iterations": 5},
            "providers": {"openai": {"api_key": "sk-test"}},
            "server": {"transport": "http", "url": "http://127.0.0.1:8000/rpc"},
            "workflows": {"path": "/etc/toolflow/workflows.json"},
            "run_log": {"path": "/tmp/runs.log"}
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.agent.max_tool_iterations, 5);
        assert_eq!(cfg.server.transport, TransportKind::Http);
        assert_eq!(
            cfg.workflows_path().unwrap().unwrap(),
            PathBuf::from("/etc/toolflow/workflows.json")
        );
        assert_eq!(cfg.run_log_path().unwrap(), PathBuf::from("/tmp/runs.log"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_run_log_path_tilde() {
        let cfg = Config::default();
        let path = cfg.run_log_path().unwrap();
        assert!(!path.to_string_lossy().starts_with('~'));
        assert!(path.ends_with(".toolflow/logs/runs.log"));
    }

    #[test]
    fn test_resolve_provider_by_model() {
        let json = r#"{
            "agent": {"model": "claude-3-5-sonnet"},
            "providers": {
                "openai": {"api_key": "sk-openai"},
                "anthropic": {"api_key": "sk-ant"}
            }
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        let (key, base, name) = cfg.resolve_provider().unwrap();
        assert_eq!(key, "sk-ant");
        assert_eq!(name, "anthropic");
        assert_eq!(base, "https://api.anthropic.com/v1");
    }

    #[test]
    fn test_resolve_provider_keeps_configured_base() {
        let json = r#"{
            "agent": {"model": "unknown-model"},
            "providers": {"anthropic": {"api_key": "sk-ant", "api_base": "http://proxy.local/v1"}}
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        let (_, base, name) = cfg.resolve_provider().unwrap();
        assert_eq!(name, "anthropic");
        assert_eq!(base, "http://proxy.local/v1");
    }

    #[test]
    fn test_resolve_provider_openrouter_fallback() {
        let json = r#"{
            "agent": {"model": "mistral-large"},
            "providers": {"openrouter": {"api_key": "sk-or-1"}}
        }"#;
        let cfg: Config = serde_json::from_str(json).unwrap();
        let (_, base, name) = cfg.resolve_provider().unwrap();
        assert_eq!(name, "openrouter");
        assert_eq!(base, "https://openrouter.ai/api/v1");
    }

    #[test]
    fn test_validate_requires_api_key() {
        let mut cfg = Config::default();
        cfg.server.command = "tool-server".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::MissingApiKey)));
    }

    #[test]
    fn test_validate_server() {
        let mut cfg = Config::default();
        assert!(cfg.validate_server().is_err());

        cfg.server.command = "tool-server".into();
        assert!(cfg.validate_server().is_ok());

        cfg.server.transport = TransportKind::Http;
        cfg.server.url = "ftp://example.com".into();
        assert!(cfg.validate_server().is_err());

        cfg.server.url = "not a url".into();
        assert!(cfg.validate_server().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut cfg = Config::default();
        cfg.apply_overrides_from(|key| match key {
            "TOOLFLOW_AGENT_MODEL" => Some("gpt-4.1".to_string()),
            "TOOLFLOW_AGENT_MAX_TOOL_ITERATIONS" => Some("not-a-number".to_string()),
            "TOOLFLOW_SERVER_URL" => Some("http://localhost:9000".to_string()),
            _ => None,
        });
        assert_eq!(cfg.agent.model, "gpt-4.1");
        assert_eq!(cfg.agent.max_tool_iterations, 20);
        assert_eq!(cfg.server.transport, TransportKind::Http);
        assert_eq!(cfg.server.url, "http://localhost:9000");
    }
}
