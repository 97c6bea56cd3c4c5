//! @ai:module:intent Persistence boundary for runs, responses and cached pricing
//! @ai:module:layer infrastructure
//! @ai:module:public_api Store, ResponseCompletion, SqliteStore

pub mod sqlite;

use crate::benchmark::{BenchmarkConfiguration, ModelResponse, Run, RunStatus};
use crate::error::Result;
use crate::reconcile::{ProviderTiming, UsageOutcome};

pub use sqlite::SqliteStore;

/// @ai:intent Fields written when a response reaches `completed`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseCompletion {
    pub response_text: String,
    pub response_json: Option<String>,
    pub tool_calls: Option<String>,
    pub generation_id: Option<String>,
    pub latency_ms: u64,
    pub time_to_first_token_ms: Option<u64>,
    pub tokens_per_second: Option<f64>,
}

/// @ai:intent Durable store the coordinator writes through
///
/// Writes are guarded so that replays cannot regress state: usage is written
/// once, terminal states are final, run counters never decrease.
pub trait Store: Send + Sync + 'static {
    /// @ai:intent Insert a run in `running` state
    /// @ai:effects db:write
    fn create_run(&self, config: &BenchmarkConfiguration, total_models: u32) -> Result<Run>;

    /// @ai:intent Insert a `pending` response for one model
    /// @ai:effects db:write
    fn create_response(&self, run_id: &str, model_id: &str) -> Result<ModelResponse>;

    /// @ai:intent pending -> running
    /// @ai:effects db:write
    fn mark_response_running(&self, response_id: &str) -> Result<()>;

    /// @ai:intent Persist usage once; returns false when usage was already recorded
    /// @ai:effects db:write
    fn record_usage(
        &self,
        response_id: &str,
        usage: &UsageOutcome,
        tokens_per_second: Option<f64>,
    ) -> Result<bool>;

    /// @ai:intent running -> completed; returns false if already terminal
    /// @ai:effects db:write
    fn complete_response(&self, response_id: &str, completion: &ResponseCompletion) -> Result<bool>;

    /// @ai:intent running -> error; returns false if already terminal
    /// @ai:effects db:write
    fn fail_response(&self, response_id: &str, message: &str, latency_ms: Option<u64>) -> Result<bool>;

    /// @ai:intent Late provider-side timing; allowed after completion
    /// @ai:effects db:write
    fn record_provider_timing(&self, response_id: &str, timing: &ProviderTiming) -> Result<()>;

    /// @ai:intent Raise run counters; never lowers them
    /// @ai:effects db:write
    fn update_run_progress(&self, run_id: &str, completed_models: u32, total_cost: f64) -> Result<()>;

    /// @ai:intent Move a run to a terminal status and stamp completion
    /// @ai:effects db:write
    fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()>;

    fn get_run(&self, run_id: &str) -> Result<Run>;

    fn get_response(&self, response_id: &str) -> Result<ModelResponse>;

    /// @ai:intent Responses of a run in creation order
    fn list_responses(&self, run_id: &str) -> Result<Vec<ModelResponse>>;
}
