//! Configuration loading and validation for the hands-on agent runtime.
//!
//! Loads an optional TOML file (`$HANDSON_CONFIG`, else `./handson.toml`),
//! then applies environment variable overrides. The deployed service is
//! normally configured purely through the environment; the file exists for
//! local runs. Validated once at startup and then passed by value into every
//! component that needs it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit config file.
pub const CONFIG_PATH_ENV: &str = "HANDSON_CONFIG";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub aws: AwsConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub code_interpreter: CodeInterpreterConfig,

    #[serde(default)]
    pub browser: BrowserConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    /// Search gateway used by the research tool
    #[serde(default)]
    pub gateway: ToolGatewayConfig,

    #[serde(default)]
    pub session: SessionDefaults,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".into()
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            region: default_region(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// "bedrock" (Converse API) or "echo" (local reflection, no network)
    #[serde(default = "default_model_provider")]
    pub provider: String,

    #[serde(default = "default_model_id")]
    pub model_id: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Overrides the built-in system instruction
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_model_provider() -> String {
    "bedrock".into()
}
fn default_model_id() -> String {
    "global.anthropic.claude-haiku-4-5-20251001-v1:0".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_model_provider(),
            model_id: default_model_id(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Safety limit on model ↔ tool round trips per invocation
    #[serde(default = "default_max_iterations")]
    pub max_tool_iterations: u32,
}

fn default_max_iterations() -> u32 {
    25
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeInterpreterConfig {
    /// Custom code interpreter identifier; the tool is disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Custom browser identifier; the tool is disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
}

fn default_session_timeout() -> u64 {
    900
}

impl Default for CodeInterpreterConfig {
    fn default() -> Self {
        Self {
            id: None,
            session_timeout_secs: default_session_timeout(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            id: None,
            session_timeout_secs: default_session_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Memory store identifier; persistence is disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Most recent turns rehydrated per invocation
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

fn default_max_turns() -> usize {
    20
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            id: None,
            max_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolGatewayConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Only gateway tools whose name starts with this prefix are exposed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_prefix: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDefaults {
    /// Actor recorded in the memory store when a request names none
    #[serde(default = "default_actor_id")]
    pub default_actor_id: String,

    /// Session used by the local `run` command when none is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_session_id: Option<String>,
}

fn default_actor_id() -> String {
    "default-user".into()
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            default_actor_id: default_actor_id(),
            default_session_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Add `time_of_last_update` to the `/ping` payload
    #[serde(default)]
    pub extended_ping: bool,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            extended_ping: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound for a single remote API round trip
    #[serde(default = "default_remote_call_secs")]
    pub remote_call_secs: u64,

    /// Upper bound for one browser navigation
    #[serde(default = "default_navigation_secs")]
    pub navigation_secs: u64,

    /// Upper bound for a whole invocation, tools included
    #[serde(default = "default_invocation_secs")]
    pub invocation_secs: u64,
}

fn default_remote_call_secs() -> u64 {
    120
}
fn default_navigation_secs() -> u64 {
    60
}
fn default_invocation_secs() -> u64 {
    900
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            remote_call_secs: default_remote_call_secs(),
            navigation_secs: default_navigation_secs(),
            invocation_secs: default_invocation_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from the default path and the process environment.
    ///
    /// Recognized environment variables (highest priority):
    /// `AWS_REGION`, `MODEL_PROVIDER`, `MODEL_ID`, `CODE_INTERPRETER_ID`,
    /// `BROWSER_ID`, `MEMORY_ID`, `GATEWAY_URL`, `GATEWAY_ID`,
    /// `GATEWAY_TARGET_PREFIX`, `DEFAULT_SESSION_ID`, `DEFAULT_ACTOR_ID`,
    /// `HOST`, `PORT`, `LOG_JSON`.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("handson.toml"));
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path (defaults if missing).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup. Empty values count as unset.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(region) = get("AWS_REGION") {
            self.aws.region = region;
        }
        if let Some(provider) = get("MODEL_PROVIDER") {
            self.model.provider = provider;
        }
        if let Some(model_id) = get("MODEL_ID") {
            self.model.model_id = model_id;
        }
        if let Some(id) = get("CODE_INTERPRETER_ID") {
            self.code_interpreter.id = Some(id);
        }
        if let Some(id) = get("BROWSER_ID") {
            self.browser.id = Some(id);
        }
        if let Some(id) = get("MEMORY_ID") {
            self.memory.id = Some(id);
        }
        if let Some(url) = get("GATEWAY_URL") {
            self.gateway.url = Some(url);
        }
        if let Some(id) = get("GATEWAY_ID") {
            self.gateway.id = Some(id);
        }
        if let Some(prefix) = get("GATEWAY_TARGET_PREFIX") {
            self.gateway.tool_prefix = Some(prefix);
        }
        if let Some(session) = get("DEFAULT_SESSION_ID") {
            self.session.default_session_id = Some(session);
        }
        if let Some(actor) = get("DEFAULT_ACTOR_ID") {
            self.session.default_actor_id = actor;
        }
        if let Some(host) = get("HOST") {
            self.server.host = host;
        }
        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("PORT is not a port: {port}")))?;
        }
        if let Some(json) = get("LOG_JSON") {
            self.logging.json = matches!(json.trim(), "1" | "true" | "yes");
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.model.provider.as_str(), "bedrock" | "echo") {
            return Err(ConfigError::ValidationError(format!(
                "model.provider must be \"bedrock\" or \"echo\", got \"{}\"",
                self.model.provider
            )));
        }

        if !(0.0..=1.0).contains(&self.model.temperature) {
            return Err(ConfigError::ValidationError(
                "model.temperature must be between 0.0 and 1.0".into(),
            ));
        }

        if self.model.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "model.max_tokens must be > 0".into(),
            ));
        }

        if self.aws.region.trim().is_empty() {
            return Err(ConfigError::ValidationError("aws.region is empty".into()));
        }

        // A present-but-blank id would enable a feature against no resource.
        let optional = [
            ("code_interpreter.id", &self.code_interpreter.id),
            ("browser.id", &self.browser.id),
            ("memory.id", &self.memory.id),
            ("gateway.url", &self.gateway.url),
            ("gateway.id", &self.gateway.id),
            ("session.default_session_id", &self.session.default_session_id),
        ];
        for (key, value) in optional {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                return Err(ConfigError::ValidationError(format!(
                    "{key} is empty; remove it to leave it unset"
                )));
            }
        }

        if self.session.default_actor_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "session.default_actor_id is empty".into(),
            ));
        }

        if self.timeouts.remote_call_secs == 0
            || self.timeouts.navigation_secs == 0
            || self.timeouts.invocation_secs == 0
        {
            return Err(ConfigError::ValidationError(
                "timeouts must be > 0 seconds".into(),
            ));
        }

        Ok(())
    }

    /// Whether turns are persisted to a remote memory store.
    pub fn memory_enabled(&self) -> bool {
        self.memory.id.is_some()
    }

    /// Whether both gateway settings the research tool needs are present.
    pub fn gateway_configured(&self) -> bool {
        self.gateway.url.is_some() && self.gateway.id.is_some()
    }

    /// Render the effective configuration as TOML (for `status`).
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.aws.region, "us-east-1");
        assert!(!config.memory_enabled());
        assert!(!config.gateway_configured());
    }

    #[test]
    fn env_overrides_select_resources() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[
                ("AWS_REGION", "ap-northeast-1"),
                ("CODE_INTERPRETER_ID", "ci-123"),
                ("BROWSER_ID", "br-456"),
                ("MEMORY_ID", "mem-789"),
                ("GATEWAY_URL", "https://gw.example.com/mcp"),
                ("GATEWAY_ID", "gw-1"),
                ("GATEWAY_TARGET_PREFIX", "tavily"),
                ("DEFAULT_ACTOR_ID", "alice"),
                ("PORT", "9000"),
            ]))
            .unwrap();

        assert_eq!(config.aws.region, "ap-northeast-1");
        assert_eq!(config.code_interpreter.id.as_deref(), Some("ci-123"));
        assert_eq!(config.browser.id.as_deref(), Some("br-456"));
        assert!(config.memory_enabled());
        assert!(config.gateway_configured());
        assert_eq!(config.gateway.tool_prefix.as_deref(), Some("tavily"));
        assert_eq!(config.session.default_actor_id, "alice");
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("MEMORY_ID", ""), ("GATEWAY_URL", "  ")]))
            .unwrap();
        assert!(!config.memory_enabled());
        assert!(config.gateway.url.is_none());
    }

    #[test]
    fn bad_port_is_rejected() {
        let mut config = AppConfig::default();
        let err = config.apply_env(env(&[("PORT", "eighty")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn only_url_is_not_a_configured_gateway() {
        let mut config = AppConfig::default();
        config
            .apply_env(env(&[("GATEWAY_URL", "https://gw.example.com/mcp")]))
            .unwrap();
        assert!(!config.gateway_configured());
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut config = AppConfig::default();
        config.model.provider = "openai".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.model.temperature = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/handson.toml")).unwrap();
        assert_eq!(config.model.provider, "bedrock");
    }

    #[test]
    fn config_file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handson.toml");
        std::fs::write(
            &path,
            r#"
[model]
provider = "echo"

[memory]
id = "mem-1"
max_turns = 4

[server]
port = 18080
extended_ping = true
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.model.provider, "echo");
        assert_eq!(config.memory.max_turns, 4);
        assert!(config.server.extended_ping);
        assert_eq!(config.server.port, 18080);
        // Untouched sections keep defaults
        assert_eq!(config.agent.max_tool_iterations, 25);
    }

    #[test]
    fn blank_memory_id_in_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handson.toml");
        std::fs::write(&path, "[memory]\nid = \"\"\n").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref m) if m.contains("memory.id")));
    }

    #[test]
    fn blank_actor_and_gateway_ids_are_rejected() {
        let mut config = AppConfig::default();
        config.session.default_actor_id = "  ".into();
        assert!(config.validate().unwrap_err().to_string().contains("default_actor_id"));

        let mut config = AppConfig::default();
        config.gateway.url = Some("https://gw.example.com/mcp".into());
        config.gateway.id = Some(String::new());
        assert!(config.validate().unwrap_err().to_string().contains("gateway.id"));
    }

    #[test]
    fn malformed_config_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handson.toml");
        std::fs::write(&path, "[model\nprovider = ").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn toml_rendering_roundtrips() {
        let mut config = AppConfig::default();
        config.gateway.url = Some("https://gw.example.com/mcp".into());
        let parsed: AppConfig = toml::from_str(&config.to_toml()).unwrap();
        assert_eq!(parsed.gateway.url, config.gateway.url);
        assert_eq!(parsed.server.port, config.server.port);
    }
}
