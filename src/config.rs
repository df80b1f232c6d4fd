//! YAML configuration.
//!
//! Every field has a default, and a missing config file is the same as an
//! empty one, so the server starts with no configuration at all.

use std::io::ErrorKind;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::provider::ApiMode;
use crate::turn::TurnLimits;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_yaml::from_str(&contents)?)
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_seconds: default_request_timeout(),
            keep_alive_interval_seconds: default_keep_alive_interval(),
        }
    }
}

// ============================================================================
// ChatConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_max_session_id_chars")]
    pub max_session_id_chars: usize,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    /// Most recent turns sent to the provider; 0 sends the full history.
    #[serde(default = "default_max_context_turns")]
    pub max_context_turns: usize,
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_seconds: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_session_id_chars: default_max_session_id_chars(),
            max_input_chars: default_max_input_chars(),
            max_context_turns: default_max_context_turns(),
            generation_timeout_seconds: default_generation_timeout(),
        }
    }
}

impl ChatConfig {
    pub fn turn_limits(&self) -> TurnLimits {
        TurnLimits {
            max_session_id_chars: self.max_session_id_chars,
            max_input_chars: self.max_input_chars,
            max_context_turns: match self.max_context_turns {
                0 => None,
                n => Some(n),
            },
            generation_timeout: Duration::from_secs(self.generation_timeout_seconds),
        }
    }
}

// ============================================================================
// SessionsConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_max_idle")]
    pub max_idle_seconds: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_idle_seconds: default_max_idle(),
            sweep_interval_seconds: default_sweep_interval(),
        }
    }
}

// ============================================================================
// ProviderConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_mode")]
    pub api_mode: ApiMode,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_mode: default_api_mode(),
            temperature: None,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_backoff_base")]
    pub backoff_base_ms: u64,
    /// Cap on any single retry delay, including server Retry-After hints.
    #[serde(default = "default_retry_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            backoff_base_ms: default_retry_backoff_base(),
            backoff_max_ms: default_retry_backoff_max(),
        }
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    300
}

fn default_keep_alive_interval() -> u64 {
    15
}

fn default_max_session_id_chars() -> usize {
    128
}

fn default_max_input_chars() -> usize {
    2000
}

fn default_max_context_turns() -> usize {
    20
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_max_idle() -> u64 {
    3600
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3".to_string()
}

fn default_api_mode() -> ApiMode {
    ApiMode::Chat
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_base() -> u64 {
    200
}

fn default_retry_backoff_max() -> u64 {
    5000
}
