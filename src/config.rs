//! @ai:module:intent Configuration structs for the benchmark engine
//! @ai:module:layer infrastructure
//! @ai:module:public_api AppConfig, ProviderConfig, DatabaseConfig, ExecutionConfig, ReconcileConfig, LookupConfig, ServerConfig
//! @ai:module:stateless true

use crate::reconcile::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// @ai:intent Main configuration for the engine, CLI and server
/// @ai:effects pure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

/// @ai:intent Upstream provider connection settings
/// @ai:effects pure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_referer")]
    pub referer: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// 0 disables client-side throttling
    #[serde(default)]
    pub requests_per_minute: u32,
}

/// @ai:intent SQLite database location
/// @ai:effects pure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

/// @ai:intent Per-model execution defaults and bounds
/// @ai:effects pure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default = "default_model_timeout")]
    pub model_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,
}

/// @ai:intent Usage reconciliation tuning
/// @ai:effects pure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_grace_ms")]
    pub trailing_usage_grace_ms: u64,
    #[serde(default)]
    pub usage_lookup: LookupConfig,
    #[serde(default)]
    pub latency_lookup: LookupConfig,
    #[serde(default = "default_chars_per_token")]
    pub chars_per_token: u32,
}

/// @ai:intent Retry budget for a generation lookup
/// @ai:effects pure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupConfig {
    #[serde(default = "default_lookup_attempts")]
    pub attempts: u32,
    #[serde(default = "default_lookup_delay")]
    pub base_delay_ms: u64,
}

/// @ai:intent HTTP server settings
/// @ai:effects pure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            referer: default_referer(),
            title: default_title(),
            request_timeout_secs: default_request_timeout(),
            requests_per_minute: 0,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            model_timeout_secs: default_model_timeout(),
            default_max_tokens: default_max_tokens(),
            default_temperature: default_temperature(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            trailing_usage_grace_ms: default_grace_ms(),
            usage_lookup: LookupConfig::default(),
            latency_lookup: LookupConfig::default(),
            chars_per_token: default_chars_per_token(),
        }
    }
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            attempts: default_lookup_attempts(),
            base_delay_ms: default_lookup_delay(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".to_string()
}

fn default_referer() -> String {
    "https://modelbench.local".to_string()
}

fn default_title() -> String {
    "Modelbench".to_string()
}

fn default_request_timeout() -> u64 {
    300
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/modelbench.db")
}

fn default_model_timeout() -> u64 {
    600
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

fn default_grace_ms() -> u64 {
    1000
}

fn default_lookup_attempts() -> u32 {
    3
}

fn default_lookup_delay() -> u64 {
    2000
}

fn default_chars_per_token() -> u32 {
    4
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl AppConfig {
    /// @ai:intent Load configuration from a TOML file
    /// @ai:pre path exists and is readable
    /// @ai:effects fs:read
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// @ai:intent Save configuration to a TOML file
    /// @ai:effects fs:write
    pub fn save(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl ExecutionConfig {
    /// @ai:intent Upper bound for one model's provider phase
    /// @ai:effects pure
    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }
}

impl ReconcileConfig {
    /// @ai:intent Grace period for a trailing usage event after [DONE]
    /// @ai:effects pure
    pub fn trailing_usage_grace(&self) -> Duration {
        Duration::from_millis(self.trailing_usage_grace_ms)
    }
}

impl LookupConfig {
    /// @ai:intent Linear backoff policy built from this budget
    /// @ai:effects pure
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.attempts, Duration::from_millis(self.base_delay_ms))
    }
}
