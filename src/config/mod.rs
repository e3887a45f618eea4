pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Deadline in seconds for the whole upstream chat call, body included.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default)]
    pub base_path: String,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    180
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            base_path: String::new(),
        }
    }
}

/// Tagged-line chat upstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_path")]
    pub token_path: String,
    #[serde(default = "default_chat_path")]
    pub chat_path: String,
    /// `Referer` header sent upstream; `<base_url>/` when unset.
    #[serde(default)]
    pub referer: Option<String>,
    /// Logical model name reported to clients.
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_selected_chat_model")]
    pub selected_chat_model: String,
    #[serde(default = "default_token_timeout_secs")]
    pub token_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub forward_sampling_params: bool,
    #[serde(default = "default_user_agents")]
    pub user_agents: Vec<String>,
}

fn default_upstream_base_url() -> String {
    "https://app.unlimitedai.chat".to_string()
}
fn default_token_path() -> String {
    "/api/token".to_string()
}
fn default_chat_path() -> String {
    "/api/chat".to_string()
}
fn default_model_name() -> String {
    "UnlimitedAI".to_string()
}
fn default_selected_chat_model() -> String {
    "chat-model-reasoning".to_string()
}
fn default_token_timeout_secs() -> u64 {
    30
}
fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Linux; Android 14; A1008P Build/UP1A.231005.007) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.6998.135 Mobile Safari/537.36",
        "Mozilla/5.0 (iPhone; CPU iPhone OS 16_6 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/16.6 Mobile/15E148 Safari/604.1",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/134.0.0.0 Safari/537.36",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

impl UpstreamConfig {
    #[must_use]
    pub fn referer(&self) -> String {
        match self.referer.as_deref() {
            Some(referer) => referer.to_string(),
            None => format!("{}/", self.base_url.trim_end_matches('/')),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_upstream_base_url(),
            token_path: default_token_path(),
            chat_path: default_chat_path(),
            referer: None,
            model_name: default_model_name(),
            selected_chat_model: default_selected_chat_model(),
            token_timeout_secs: default_token_timeout_secs(),
            forward_sampling_params: true,
            user_agents: default_user_agents(),
        }
    }
}

/// Client authentication configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientAuthConfig {
    pub allowed_keys: Vec<String>,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Collapse all user turns into a single user message before forwarding.
    #[serde(default = "default_true")]
    pub merge_user_messages: bool,
    /// Strip one trailing newline from the last content fragment of a turn.
    #[serde(default)]
    pub strip_trailing_newline: bool,
    /// Emit an unterminated final line at clean end-of-stream instead of dropping it.
    #[serde(default = "default_true")]
    pub flush_unterminated_line: bool,
    #[serde(default)]
    pub stream_chunk_delay_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            merge_user_messages: true,
            strip_trailing_newline: false,
            flush_unterminated_line: true,
            stream_chunk_delay_ms: 0,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    pub client_authentication: ClientAuthConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or
/// [`ConfigError::Validation`] when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}
