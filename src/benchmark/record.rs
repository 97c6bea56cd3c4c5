//! @ai:module:intent Durable run and per-model response records
//! @ai:module:layer domain
//! @ai:module:public_api Run, RunStatus, ModelResponse, ResponseStatus, UsageSource
//! @ai:module:stateless true

use crate::benchmark::configuration::BenchmarkType;
use serde::{Deserialize, Serialize};

/// @ai:intent Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    /// @ai:intent Convert status to string representation
    /// @ai:effects pure
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// @ai:intent Parse the stored string form
    /// @ai:effects pure
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(RunStatus::Pending),
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// @ai:intent Lifecycle state of one model's response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl ResponseStatus {
    /// @ai:intent Convert status to string representation
    /// @ai:effects pure
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseStatus::Pending => "pending",
            ResponseStatus::Running => "running",
            ResponseStatus::Completed => "completed",
            ResponseStatus::Error => "error",
        }
    }

    /// @ai:intent Parse the stored string form
    /// @ai:effects pure
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ResponseStatus::Pending),
            "running" => Some(ResponseStatus::Running),
            "completed" => Some(ResponseStatus::Completed),
            "error" => Some(ResponseStatus::Error),
            _ => None,
        }
    }

    /// @ai:intent True once the response can no longer change state
    /// @ai:effects pure
    pub fn is_terminal(&self) -> bool {
        matches!(self, ResponseStatus::Completed | ResponseStatus::Error)
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// @ai:intent Which reconciliation tier supplied a response's usage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageSource {
    Inline,
    Generation,
    Estimated,
}

impl UsageSource {
    /// @ai:intent Convert source to string representation
    /// @ai:effects pure
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageSource::Inline => "inline",
            UsageSource::Generation => "generation",
            UsageSource::Estimated => "estimated",
        }
    }

    /// @ai:intent Parse the stored string form
    /// @ai:effects pure
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inline" => Some(UsageSource::Inline),
            "generation" => Some(UsageSource::Generation),
            "estimated" => Some(UsageSource::Estimated),
            _ => None,
        }
    }
}

/// @ai:intent One benchmark execution across a set of models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub benchmark_type: BenchmarkType,
    pub status: RunStatus,
    pub total_models: u32,
    pub completed_models: u32,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub json_schema: Option<String>,
    pub tool_definitions: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub total_cost: f64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// @ai:intent Outcome record of one model within a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelResponse {
    pub id: String,
    pub run_id: String,
    pub model_id: String,
    pub status: ResponseStatus,
    pub response_text: Option<String>,
    /// Compact JSON echo, structured runs only
    pub response_json: Option<String>,
    pub tool_calls: Option<String>,
    pub error_message: Option<String>,
    pub generation_id: Option<String>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub cost: Option<f64>,
    pub usage_source: Option<UsageSource>,
    pub pricing_missing: bool,
    pub latency_ms: Option<u64>,
    pub openrouter_latency_ms: Option<u64>,
    pub generation_time_ms: Option<u64>,
    pub moderation_latency_ms: Option<u64>,
    pub time_to_first_token_ms: Option<u64>,
    pub tokens_per_second: Option<f64>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// @ai:intent Derived throughput: completion tokens per wall-clock second
/// @ai:effects pure
pub fn tokens_per_second(completion_tokens: u64, elapsed_ms: u64) -> f64 {
    if completion_tokens == 0 || elapsed_ms == 0 {
        return 0.0;
    }
    completion_tokens as f64 / (elapsed_ms as f64 / 1000.0)
}
