//! @ai:module:intent Drive a run: one model at a time, from request to reconciled record
//! @ai:module:layer application
//! @ai:module:public_api Coordinator, PreparedRun, RunHandle, ExecutionMode
//! @ai:module:stateless false

use crate::benchmark::{
    tokens_per_second, BenchmarkConfiguration, BenchmarkRequest, BenchmarkType, ModelResponse,
    Run, RunStatus, UsageSource,
};
use crate::config::AppConfig;
use crate::coordinator::aggregate::{RunAggregate, RunProgress, RunTransition};
use crate::coordinator::events::{BenchEvent, EventSink, NullSink};
use crate::error::{BenchError, Result};
use crate::provider::client::ProviderClient;
use crate::provider::types::{ChatRequest, ToolCall, UsageReport};
use crate::reconcile::{Reconciler, UsageOutcome};
use crate::request::build_chat_request;
use crate::store::{ResponseCompletion, Store};
use crate::stream::{RelayEvent, StreamRelay};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{error, info, warn};

const STRUCTURED_PLACEHOLDER: &str =
    r#"{"error": "Model returned empty response - may not support structured outputs"}"#;
const TOOL_PLACEHOLDER: &str = "Model returned empty response - may not support function calling";
const EMPTY_PLACEHOLDER: &str = "Model returned empty response";

/// @ai:intent Which provider call a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Whole-response chat calls
    Whole,
    /// Streaming chat calls relayed token by token
    Streaming,
}

/// @ai:intent Acknowledgement returned when a run is accepted
#[derive(Debug, Clone, PartialEq)]
pub struct RunHandle {
    pub run_id: String,
    pub response_ids: Vec<String>,
}

/// @ai:intent A validated, persisted run that has not started processing
#[derive(Debug, Clone)]
pub struct PreparedRun {
    pub run: Run,
    pub config: BenchmarkConfiguration,
    /// (model id, response id) in submission order
    pub models: Vec<(String, String)>,
}

impl PreparedRun {
    pub fn handle(&self) -> RunHandle {
        RunHandle {
            run_id: self.run.id.clone(),
            response_ids: self.models.iter().map(|(_, r)| r.clone()).collect(),
        }
    }
}

/// What a provider call produced before reconciliation
#[derive(Debug, Default)]
struct ModelReply {
    text: String,
    tool_calls: Vec<ToolCall>,
    generation_id: Option<String>,
    usage: Option<UsageReport>,
    first_token_ms: Option<u64>,
    /// Inline usage already charged mid-stream
    charged: Option<UsageOutcome>,
}

/// Result of a model pipeline that reached `completed`
struct ModelDone {
    text: String,
    latency_ms: u64,
    cost: f64,
    generation_id: Option<String>,
}

/// Identity of the model being processed
struct ModelSlot<'a> {
    run_id: &'a str,
    model_id: &'a str,
    response_id: &'a str,
}

/// @ai:intent Run coordinator with explicitly injected provider and store
pub struct Coordinator<P: ProviderClient, S: Store> {
    provider: Arc<P>,
    store: Arc<S>,
    config: Arc<AppConfig>,
}

impl<P: ProviderClient, S: Store> Clone for Coordinator<P, S> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
        }
    }
}

impl<P: ProviderClient, S: Store> Coordinator<P, S> {
    pub fn new(provider: Arc<P>, store: Arc<S>, config: Arc<AppConfig>) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// @ai:intent Validate a request and persist the run with one pending response per model
    /// @ai:post on a setup error nothing is written; if response creation fails the run is marked failed
    /// @ai:effects db:write
    pub fn prepare(&self, request: BenchmarkRequest) -> Result<PreparedRun> {
        let (config, model_ids) =
            BenchmarkConfiguration::from_request(request, &self.config.execution)?;

        let run = self.store.create_run(&config, model_ids.len() as u32)?;
        info!(
            "Created run {} ({}) for {} models",
            run.id,
            config.benchmark_type(),
            model_ids.len()
        );

        let mut models = Vec::with_capacity(model_ids.len());
        for model_id in model_ids {
            match self.store.create_response(&run.id, &model_id) {
                Ok(response) => models.push((model_id, response.id)),
                Err(e) => {
                    error!("Could not create response for {} in run {}: {}", model_id, run.id, e);
                    if let Err(mark) = self.store.finish_run(&run.id, RunStatus::Failed) {
                        error!("Could not mark run {} failed: {}", run.id, mark);
                    }
                    return Err(e);
                }
            }
        }

        Ok(PreparedRun { run, config, models })
    }

    /// @ai:intent Accept a run and process it in the background with whole-response calls
    /// @ai:effects db:write, spawn
    pub fn start_run(&self, request: BenchmarkRequest) -> Result<RunHandle> {
        let prepared = self.prepare(request)?;
        let handle = prepared.handle();

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator
                .execute(prepared, &NullSink, ExecutionMode::Whole)
                .await;
        });

        Ok(handle)
    }

    /// @ai:intent Run to completion, streaming every event to the sink
    /// @ai:effects db:write, network
    pub async fn stream_run<E: EventSink>(
        &self,
        request: BenchmarkRequest,
        sink: &E,
    ) -> Result<RunProgress> {
        let prepared = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(e) => {
                sink.emit(BenchEvent::Error {
                    error: e.to_string(),
                })
                .await;
                return Err(e);
            }
        };

        Ok(self.execute(prepared, sink, ExecutionMode::Streaming).await)
    }

    /// @ai:intent Process every model of a prepared run in submission order
    /// @ai:post the run is completed only if every response was durably moved to a terminal state; otherwise failed
    /// @ai:effects db:write, network, time
    pub async fn execute<E: EventSink>(
        &self,
        prepared: PreparedRun,
        sink: &E,
        mode: ExecutionMode,
    ) -> RunProgress {
        let run_id = prepared.run.id.clone();
        let mut aggregate = RunAggregate::new(prepared.models.len() as u32);

        sink.emit(BenchEvent::RunStarted {
            run_id: run_id.clone(),
            total_models: prepared.models.len() as u32,
            response_ids: prepared.handle().response_ids,
        })
        .await;

        for (model_id, response_id) in &prepared.models {
            let slot = ModelSlot {
                run_id: &run_id,
                model_id,
                response_id,
            };

            sink.emit(BenchEvent::ModelStarted {
                model_id: model_id.clone(),
                response_id: response_id.clone(),
            })
            .await;

            let started = Instant::now();
            let settled = match self
                .run_model(&prepared.config, &slot, &mut aggregate, sink, mode, started)
                .await
            {
                Ok(done) => {
                    info!("Model {} completed in {}ms", model_id, done.latency_ms);
                    sink.emit(BenchEvent::ModelCompleted {
                        model_id: model_id.clone(),
                        response_id: response_id.clone(),
                        response: done.text,
                        latency_ms: done.latency_ms,
                        cost: done.cost,
                        generation_id: done.generation_id,
                    })
                    .await;
                    true
                }
                Err(e) => {
                    warn!("Model {} failed: {}", model_id, e);
                    let message = e.to_string();
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let settled = self.record_failure(response_id, &message, latency_ms);
                    sink.emit(BenchEvent::ModelError {
                        model_id: model_id.clone(),
                        response_id: response_id.clone(),
                        error: message,
                    })
                    .await;
                    settled
                }
            };

            // Only a durably terminal response counts towards completion
            if settled {
                let progress = aggregate.apply(RunTransition::ModelFinished {
                    response_id: response_id.clone(),
                });
                self.persist_progress(&run_id, progress).await;
                sink.emit(BenchEvent::Progress(progress)).await;
            }
        }

        let progress = aggregate.progress();
        if !aggregate.is_complete() {
            let unsettled = progress.total_models - progress.completed_models;
            error!(
                "Run {} failed: {} responses could not be recorded as finished",
                run_id, unsettled
            );
            if let Err(e) = self.store.finish_run(&run_id, RunStatus::Failed) {
                error!("Could not mark run {} failed: {}", run_id, e);
            }
            sink.emit(BenchEvent::Error {
                error: format!("{} responses could not be recorded as finished", unsettled),
            })
            .await;
            return progress;
        }

        if let Err(e) = self.store.finish_run(&run_id, RunStatus::Completed) {
            error!("Could not complete run {}: {}", run_id, e);
        }

        info!(
            "Run {} completed: {}/{} models, ${:.6}",
            run_id, progress.completed_models, progress.total_models, progress.total_cost
        );
        sink.emit(BenchEvent::RunCompleted {
            run_id,
            total_cost: progress.total_cost,
            completed_models: progress.completed_models,
        })
        .await;

        progress
    }

    /// @ai:intent Run and its responses for display
    /// @ai:effects db:read
    pub fn load_run(&self, run_id: &str) -> Result<(Run, Vec<ModelResponse>)> {
        let run = self.store.get_run(run_id)?;
        let responses = self.store.list_responses(run_id)?;
        Ok((run, responses))
    }

    /// One model's pipeline: call, reconcile, persist, late timing
    async fn run_model<E: EventSink>(
        &self,
        config: &BenchmarkConfiguration,
        slot: &ModelSlot<'_>,
        aggregate: &mut RunAggregate,
        sink: &E,
        mode: ExecutionMode,
        started: Instant,
    ) -> Result<ModelDone> {
        self.store.mark_response_running(slot.response_id)?;

        let request = build_chat_request(config, slot.model_id);
        let reconciler = Reconciler::new(&*self.provider, &self.config.reconcile);
        let timeout = self.config.execution.model_timeout();

        let call = async {
            match mode {
                ExecutionMode::Whole => self.call_whole(&request).await,
                ExecutionMode::Streaming => {
                    self.call_streaming(&request, slot, &reconciler, aggregate, sink, started)
                        .await
                }
            }
        };
        let reply = tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| BenchError::Timeout(self.config.execution.model_timeout_secs))??;

        let latency_ms = started.elapsed().as_millis() as u64;
        let benchmark_type = config.benchmark_type();

        let (cost, tps) = match &reply.charged {
            // Inline usage was persisted and charged mid-stream
            Some(outcome) => (outcome.cost, None),
            None => {
                let completion_chars = completion_chars(&reply);
                let outcome = reconciler
                    .reconcile(
                        slot.model_id,
                        reply.usage,
                        reply.generation_id.as_deref(),
                        config.prompt_chars(),
                        completion_chars,
                    )
                    .await;
                let tps = tokens_per_second(outcome.usage.completion_tokens, latency_ms);
                self.charge(slot, &outcome, Some(tps), aggregate).await?;
                sink.emit(cost_update(slot, &outcome, Some(tps))).await;
                (outcome.cost, Some(tps))
            }
        };

        let text = final_text(benchmark_type, &reply.text, &reply.tool_calls);
        if reply.text.trim().is_empty() {
            warn!("Model {} returned an empty response", slot.model_id);
        }

        let tool_calls = if benchmark_type == BenchmarkType::Tool && !reply.tool_calls.is_empty() {
            Some(serde_json::to_string(&reply.tool_calls)?)
        } else {
            None
        };

        let response_json = if benchmark_type == BenchmarkType::Structured {
            serde_json::from_str::<serde_json::Value>(&text)
                .ok()
                .map(|v| v.to_string())
        } else {
            None
        };

        let completed = self.store.complete_response(
            slot.response_id,
            &ResponseCompletion {
                response_text: text.clone(),
                response_json,
                tool_calls,
                generation_id: reply.generation_id.clone(),
                latency_ms,
                time_to_first_token_ms: reply.first_token_ms,
                tokens_per_second: tps,
            },
        )?;
        if !completed {
            return Err(BenchError::Inactive(slot.response_id.to_string()));
        }

        if let Some(generation_id) = &reply.generation_id {
            if let Some(timing) = reconciler.lookup_timing(generation_id).await {
                match self.store.record_provider_timing(slot.response_id, &timing) {
                    Ok(()) => {
                        sink.emit(BenchEvent::MetricsUpdate {
                            model_id: slot.model_id.to_string(),
                            response_id: slot.response_id.to_string(),
                            open_router_latency_ms: timing.latency_ms,
                            generation_time_ms: timing.generation_time_ms,
                            moderation_latency_ms: timing.moderation_latency_ms,
                            time_to_first_token_ms: reply.first_token_ms,
                        })
                        .await
                    }
                    Err(e) => warn!("Could not record timing for {}: {}", slot.response_id, e),
                }
            }
        }

        Ok(ModelDone {
            text,
            latency_ms,
            cost,
            generation_id: reply.generation_id,
        })
    }

    async fn call_whole(&self, request: &ChatRequest) -> Result<ModelReply> {
        let response = self.provider.chat(request).await?;

        let (text, tool_calls) = match response.choices.into_iter().next() {
            Some(choice) => (
                choice.message.text(),
                choice.message.tool_calls.unwrap_or_default(),
            ),
            None => (String::new(), Vec::new()),
        };

        Ok(ModelReply {
            text,
            tool_calls,
            generation_id: response.id.filter(|id| !id.is_empty()),
            usage: response.usage.map(|u| u.normalize()),
            ..ModelReply::default()
        })
    }

    async fn call_streaming<E: EventSink>(
        &self,
        request: &ChatRequest,
        slot: &ModelSlot<'_>,
        reconciler: &Reconciler<'_, P>,
        aggregate: &mut RunAggregate,
        sink: &E,
        started: Instant,
    ) -> Result<ModelReply> {
        let body = self.provider.chat_stream(request).await?;
        let mut relay = StreamRelay::new(body, started, self.config.reconcile.trailing_usage_grace());
        let mut charged = None;

        while let Some(event) = relay.next_event().await? {
            match event {
                RelayEvent::FirstToken { elapsed_ms } => {
                    sink.emit(BenchEvent::FirstToken {
                        model_id: slot.model_id.to_string(),
                        response_id: slot.response_id.to_string(),
                        time_to_first_token: elapsed_ms,
                    })
                    .await
                }
                RelayEvent::Token(content) => {
                    sink.emit(BenchEvent::Token {
                        model_id: slot.model_id.to_string(),
                        response_id: slot.response_id.to_string(),
                        content,
                    })
                    .await
                }
                RelayEvent::Usage {
                    usage,
                    tokens_per_second,
                } => {
                    let outcome = reconciler.price_inline(slot.model_id, usage).await;
                    self.charge(slot, &outcome, Some(tokens_per_second), aggregate)
                        .await?;
                    sink.emit(cost_update(slot, &outcome, Some(tokens_per_second))).await;
                    charged = Some(outcome);
                }
            }
        }

        let outcome = relay.into_outcome();
        Ok(ModelReply {
            text: outcome.text,
            tool_calls: outcome.tool_calls,
            generation_id: outcome.generation_id,
            usage: outcome.usage,
            first_token_ms: outcome.first_token_ms,
            charged,
        })
    }

    /// @ai:intent Persist usage once and add its cost to the run exactly once
    /// @ai:effects db:write
    async fn charge(
        &self,
        slot: &ModelSlot<'_>,
        outcome: &UsageOutcome,
        tps: Option<f64>,
        aggregate: &mut RunAggregate,
    ) -> Result<()> {
        let response_id = slot.response_id.to_string();
        let usage = *outcome;
        let recorded = self
            .on_store(move |store| store.record_usage(&response_id, &usage, tps))
            .await?;
        if !recorded {
            warn!("Usage for {} was already recorded, not charging again", slot.response_id);
            return Ok(());
        }

        let progress = aggregate.apply(RunTransition::Charge {
            response_id: slot.response_id.to_string(),
            cost: outcome.cost,
        });
        self.persist_progress(slot.run_id, progress).await;
        Ok(())
    }

    /// @ai:intent Move a failed response to `error`
    /// @ai:post true only when the response is known to be terminal in the store
    /// @ai:effects db:write
    fn record_failure(&self, response_id: &str, message: &str, latency_ms: u64) -> bool {
        match self.store.fail_response(response_id, message, Some(latency_ms)) {
            Ok(true) => true,
            // Guard matched nothing; count it only if something else already finished it
            Ok(false) => match self.store.get_response(response_id) {
                Ok(response) => response.status.is_terminal(),
                Err(e) => {
                    error!("Could not read back response {}: {}", response_id, e);
                    false
                }
            },
            Err(e) => {
                error!("Could not record failure for {}: {}", response_id, e);
                false
            }
        }
    }

    async fn persist_progress(&self, run_id: &str, progress: RunProgress) {
        let id = run_id.to_string();
        let written = self
            .on_store(move |store| {
                store.update_run_progress(&id, progress.completed_models, progress.total_cost)
            })
            .await;
        if let Err(e) = written {
            error!("Could not persist progress for run {}: {}", run_id, e);
        }
    }

    /// Store call on the blocking pool, off the relay's worker
    async fn on_store<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&S) -> Result<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || op(store.as_ref()))
            .await
            .map_err(|e| BenchError::Task(format!("store call: {}", e)))?
    }
}

fn cost_update(slot: &ModelSlot<'_>, outcome: &UsageOutcome, tps: Option<f64>) -> BenchEvent {
    BenchEvent::CostUpdate {
        model_id: slot.model_id.to_string(),
        response_id: slot.response_id.to_string(),
        cost: outcome.cost,
        tokens_per_second: tps,
        usage: outcome.usage,
        estimated: outcome.source == UsageSource::Estimated,
    }
}

/// Characters the completion estimate is based on
fn completion_chars(reply: &ModelReply) -> usize {
    if reply.text.is_empty() && !reply.tool_calls.is_empty() {
        return serde_json::to_string(&reply.tool_calls)
            .map(|s| s.chars().count())
            .unwrap_or(0);
    }
    reply.text.chars().count()
}

/// @ai:intent Text persisted for a response; never blank
/// @ai:effects pure
fn final_text(benchmark_type: BenchmarkType, text: &str, tool_calls: &[ToolCall]) -> String {
    if !text.trim().is_empty() {
        return text.to_string();
    }

    if !tool_calls.is_empty() {
        let names: Vec<&str> = tool_calls.iter().map(|c| c.function.name.as_str()).collect();
        return format!("Model requested tool calls: {}", names.join(", "));
    }

    match benchmark_type {
        BenchmarkType::Structured => STRUCTURED_PLACEHOLDER.to_string(),
        BenchmarkType::Tool => TOOL_PLACEHOLDER.to_string(),
        _ => EMPTY_PLACEHOLDER.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::benchmark::ResponseStatus;
    use crate::config::LookupConfig;
    use crate::coordinator::events::ChannelSink;
    use crate::provider::mock::{ScriptedProvider, StreamStep};
    use crate::provider::types::{FunctionCall, GenerationDetails, ModelInfo, Pricing};
    use crate::reconcile::ProviderTiming;
    use crate::store::SqliteStore;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn app_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.reconcile.usage_lookup = LookupConfig {
            attempts: 2,
            base_delay_ms: 10,
        };
        config.reconcile.latency_lookup = LookupConfig {
            attempts: 2,
            base_delay_ms: 10,
        };
        config
    }

    fn coordinator(provider: ScriptedProvider) -> Coordinator<ScriptedProvider, SqliteStore> {
        Coordinator::new(
            Arc::new(provider),
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(app_config()),
        )
    }

    fn request(json: serde_json::Value) -> BenchmarkRequest {
        serde_json::from_value(json).unwrap()
    }

    fn text_request(models: &[&str]) -> BenchmarkRequest {
        request(serde_json::json!({
            "config": {"type": "text", "userPrompt": "2+2?", "maxTokens": 10},
            "modelIds": models
        }))
    }

    fn drain(rx: &mut tokio::sync::mpsc::Receiver<BenchEvent>) -> Vec<BenchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn names(events: &[BenchEvent]) -> Vec<&'static str> {
        events.iter().map(|e| e.name()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_whole_run_mixed_success_and_provider_error() {
        let coordinator = coordinator(
            ScriptedProvider::new()
                .with_chat(
                    "m1",
                    serde_json::json!({
                        "choices": [{"message": {"content": "4"}}],
                        "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6, "cost": 0.0001}
                    }),
                )
                .with_failure("m2", 500, "upstream exploded"),
        );

        let prepared = coordinator.prepare(text_request(&["m1", "m2"])).unwrap();
        let handle = prepared.handle();
        let progress = coordinator
            .execute(prepared, &NullSink, ExecutionMode::Whole)
            .await;

        assert_eq!(progress.completed_models, 2);
        assert_eq!(progress.total_cost, 0.0001);

        let (run, responses) = coordinator.load_run(&handle.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.completed_models, 2);
        assert_eq!(run.total_cost, 0.0001);

        assert_eq!(responses[0].status, ResponseStatus::Completed);
        assert_eq!(responses[0].response_text.as_deref(), Some("4"));
        assert_eq!(responses[0].cost, Some(0.0001));
        assert_eq!(responses[0].usage_source, Some(UsageSource::Inline));

        assert_eq!(responses[1].status, ResponseStatus::Error);
        assert_eq!(
            responses[1].error_message.as_deref(),
            Some("OpenRouter API error: 500 - upstream exploded")
        );
        assert_eq!(responses[1].cost, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_setup_error_creates_nothing() {
        let coordinator = coordinator(ScriptedProvider::new());
        let (sink, mut rx) = ChannelSink::new(16);

        let result = coordinator
            .stream_run(
                request(serde_json::json!({
                    "config": {"type": "text", "userPrompt": ""},
                    "modelIds": ["m1"]
                })),
                &sink,
            )
            .await;

        assert!(matches!(result, Err(BenchError::InvalidConfig(_))));
        assert_eq!(names(&drain(&mut rx)), vec!["error"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streamed_model_event_order() {
        let coordinator = coordinator(
            ScriptedProvider::new()
                .with_sse_events(
                    "m1",
                    &[
                        serde_json::json!({"id": "gen-1", "choices": [{"delta": {"content": "Hel"}}]}),
                        serde_json::json!({"id": "gen-1", "choices": [{"delta": {"content": "lo"}}]}),
                        serde_json::json!({
                            "id": "gen-1",
                            "choices": [],
                            "usage": {"prompt_tokens": 4, "completion_tokens": 2, "cost": 0.002}
                        }),
                    ],
                )
                .with_generation(
                    "gen-1",
                    vec![Some(GenerationDetails {
                        latency: Some(700.0),
                        generation_time: Some(650.0),
                        ..GenerationDetails::default()
                    })],
                ),
        );
        let (sink, mut rx) = ChannelSink::new(64);

        let progress = coordinator.stream_run(text_request(&["m1"]), &sink).await.unwrap();
        let events = drain(&mut rx);

        assert_eq!(
            names(&events),
            vec![
                "run_started",
                "model_started",
                "first_token",
                "token",
                "token",
                "cost_update",
                "metrics_update",
                "model_completed",
                "progress",
                "run_completed",
            ]
        );
        assert_eq!(progress.total_cost, 0.002);

        let response_id = events[1].response_id().unwrap().to_string();
        let stored = coordinator.store().get_response(&response_id).unwrap();
        assert_eq!(stored.response_text.as_deref(), Some("Hello"));
        assert_eq!(stored.generation_id.as_deref(), Some("gen-1"));
        assert_eq!(stored.usage_source, Some(UsageSource::Inline));
        assert_eq!(stored.openrouter_latency_ms, Some(700));
        assert!(stored.time_to_first_token_ms.is_some());
        assert!(stored.tokens_per_second.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_without_usage_or_generation_falls_back_to_estimate() {
        let coordinator = coordinator(
            ScriptedProvider::new()
                .with_sse_events(
                    "m1",
                    &[serde_json::json!({"choices": [{"delta": {"content": "four is the answer"}}]})],
                )
                .with_cached_pricing(
                    "m1",
                    Pricing {
                        prompt: 0.001,
                        completion: 0.002,
                    },
                ),
        );
        let (sink, mut rx) = ChannelSink::new(64);

        let progress = coordinator.stream_run(text_request(&["m1"]), &sink).await.unwrap();
        let events = drain(&mut rx);

        // "2+2?" -> 1 prompt token, 18 chars -> 5 completion tokens
        let expected_cost = 1.0 * 0.001 + 5.0 * 0.002;
        assert!((progress.total_cost - expected_cost).abs() < 1e-12);

        let estimated = events.iter().any(|e| {
            matches!(e, BenchEvent::CostUpdate { estimated: true, usage, .. } if usage.completion_tokens == 5)
        });
        assert!(estimated);

        let response_id = events[1].response_id().unwrap().to_string();
        let stored = coordinator.store().get_response(&response_id).unwrap();
        assert_eq!(stored.usage_source, Some(UsageSource::Estimated));
        assert!(!stored.pricing_missing);
        assert!(!names(&events).contains(&"metrics_update"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_estimate_without_cached_pricing_is_free_even_if_catalog_lists_it() {
        let coordinator = coordinator(
            ScriptedProvider::new()
                .with_sse_events(
                    "m1",
                    &[serde_json::json!({"choices": [{"delta": {"content": "four is the answer"}}]})],
                )
                .with_model(ModelInfo {
                    id: "m1".to_string(),
                    name: "m1".to_string(),
                    pricing: Some(Pricing {
                        prompt: 0.001,
                        completion: 0.002,
                    }),
                    ..ModelInfo::default()
                }),
        );
        let (sink, mut rx) = ChannelSink::new(64);

        let progress = coordinator.stream_run(text_request(&["m1"]), &sink).await.unwrap();
        let events = drain(&mut rx);

        assert_eq!(progress.total_cost, 0.0);
        let response_id = events[1].response_id().unwrap().to_string();
        let stored = coordinator.store().get_response(&response_id).unwrap();
        assert_eq!(stored.usage_source, Some(UsageSource::Estimated));
        assert_eq!(stored.cost, Some(0.0));
        assert!(stored.pricing_missing);
        assert_eq!(coordinator.provider.model_lookups(), 0);
    }

    /// SQLite store whose response writes can be made to fail or match nothing
    struct FlakyStore {
        inner: SqliteStore,
        fail_running: bool,
        fail_terminal: bool,
        refuse_completion: bool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: SqliteStore::in_memory().unwrap(),
                fail_running: false,
                fail_terminal: false,
                refuse_completion: false,
            }
        }

        fn broken() -> BenchError {
            BenchError::Database(rusqlite::Error::InvalidQuery)
        }
    }

    impl Store for FlakyStore {
        fn create_run(&self, config: &BenchmarkConfiguration, total_models: u32) -> Result<Run> {
            self.inner.create_run(config, total_models)
        }

        fn create_response(&self, run_id: &str, model_id: &str) -> Result<ModelResponse> {
            self.inner.create_response(run_id, model_id)
        }

        fn mark_response_running(&self, response_id: &str) -> Result<()> {
            if self.fail_running {
                return Err(Self::broken());
            }
            self.inner.mark_response_running(response_id)
        }

        fn record_usage(
            &self,
            response_id: &str,
            usage: &UsageOutcome,
            tokens_per_second: Option<f64>,
        ) -> Result<bool> {
            self.inner.record_usage(response_id, usage, tokens_per_second)
        }

        fn complete_response(
            &self,
            response_id: &str,
            completion: &ResponseCompletion,
        ) -> Result<bool> {
            if self.refuse_completion {
                return Ok(false);
            }
            self.inner.complete_response(response_id, completion)
        }

        fn fail_response(
            &self,
            response_id: &str,
            message: &str,
            latency_ms: Option<u64>,
        ) -> Result<bool> {
            if self.fail_terminal {
                return Err(Self::broken());
            }
            self.inner.fail_response(response_id, message, latency_ms)
        }

        fn record_provider_timing(&self, response_id: &str, timing: &ProviderTiming) -> Result<()> {
            self.inner.record_provider_timing(response_id, timing)
        }

        fn update_run_progress(
            &self,
            run_id: &str,
            completed_models: u32,
            total_cost: f64,
        ) -> Result<()> {
            self.inner.update_run_progress(run_id, completed_models, total_cost)
        }

        fn finish_run(&self, run_id: &str, status: RunStatus) -> Result<()> {
            self.inner.finish_run(run_id, status)
        }

        fn get_run(&self, run_id: &str) -> Result<Run> {
            self.inner.get_run(run_id)
        }

        fn get_response(&self, response_id: &str) -> Result<ModelResponse> {
            self.inner.get_response(response_id)
        }

        fn list_responses(&self, run_id: &str) -> Result<Vec<ModelResponse>> {
            self.inner.list_responses(run_id)
        }
    }

    fn answering_provider() -> ScriptedProvider {
        ScriptedProvider::new().with_chat(
            "m1",
            serde_json::json!({
                "choices": [{"message": {"content": "4"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "cost": 0.0001}
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecorded_terminal_state_fails_the_run() {
        let store = FlakyStore {
            fail_running: true,
            fail_terminal: true,
            ..FlakyStore::new()
        };
        let coordinator =
            Coordinator::new(Arc::new(answering_provider()), Arc::new(store), Arc::new(app_config()));
        let (sink, mut rx) = ChannelSink::new(64);

        let prepared = coordinator.prepare(text_request(&["m1"])).unwrap();
        let handle = prepared.handle();
        let progress = coordinator.execute(prepared, &sink, ExecutionMode::Whole).await;

        assert_eq!(progress.completed_models, 0);
        assert_eq!(
            names(&drain(&mut rx)),
            vec!["run_started", "model_started", "model_error", "error"]
        );

        let (run, responses) = coordinator.load_run(&handle.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.completed_models, 0);
        assert_eq!(responses[0].status, ResponseStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_completion_matching_no_row_is_reported_as_error() {
        let store = FlakyStore {
            refuse_completion: true,
            ..FlakyStore::new()
        };
        let coordinator =
            Coordinator::new(Arc::new(answering_provider()), Arc::new(store), Arc::new(app_config()));
        let (sink, mut rx) = ChannelSink::new(64);

        let prepared = coordinator.prepare(text_request(&["m1"])).unwrap();
        let handle = prepared.handle();
        let progress = coordinator.execute(prepared, &sink, ExecutionMode::Whole).await;

        let events = names(&drain(&mut rx));
        assert!(!events.contains(&"model_completed"));
        assert!(events.contains(&"model_error"));
        assert_eq!(progress.completed_models, 1);

        let (run, responses) = coordinator.load_run(&handle.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(responses[0].status, ResponseStatus::Error);
        assert_eq!(
            responses[0].error_message,
            Some(format!("Response {} is no longer active", handle.response_ids[0]))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_usage_is_charged_once() {
        let coordinator = coordinator(ScriptedProvider::new().with_stream(
            "m1",
            vec![
                StreamStep::Bytes(
                    "data: {\"choices\":[{\"delta\":{\"content\":\"4\"}}]}\n\ndata: [DONE]\n\n"
                        .to_string(),
                ),
                StreamStep::Pause(Duration::from_millis(200)),
                StreamStep::Bytes(
                    "data: {\"usage\":{\"prompt_tokens\":5,\"completion_tokens\":1,\"cost\":0.01}}\n\n"
                        .to_string(),
                ),
            ],
        ));
        let (sink, mut rx) = ChannelSink::new(64);

        let progress = coordinator.stream_run(text_request(&["m1"]), &sink).await.unwrap();
        let events = drain(&mut rx);

        assert_eq!(progress.total_cost, 0.01);
        let cost_updates = events.iter().filter(|e| e.name() == "cost_update").count();
        assert_eq!(cost_updates, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_structured_empty_response_gets_placeholder() {
        let coordinator = coordinator(ScriptedProvider::new().with_chat(
            "m1",
            serde_json::json!({
                "choices": [{"message": {"content": ""}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 0, "cost": 0.0}
            }),
        ));

        let prepared = coordinator
            .prepare(request(serde_json::json!({
                "config": {"type": "structured", "userPrompt": "json please", "jsonSchema": "{not json"},
                "modelIds": ["m1"]
            })))
            .unwrap();
        let handle = prepared.handle();
        coordinator.execute(prepared, &NullSink, ExecutionMode::Whole).await;

        let response = coordinator.store().get_response(&handle.response_ids[0]).unwrap();
        assert_eq!(response.status, ResponseStatus::Completed);
        assert_eq!(response.response_text.as_deref(), Some(STRUCTURED_PLACEHOLDER));
        assert_eq!(
            response.response_json.as_deref(),
            Some(r#"{"error":"Model returned empty response - may not support structured outputs"}"#)
        );
        // The invalid schema was dropped rather than failing the call
        assert!(coordinator_requests_have_no_format(&coordinator));
    }

    fn coordinator_requests_have_no_format(
        coordinator: &Coordinator<ScriptedProvider, SqliteStore>,
    ) -> bool {
        coordinator
            .provider
            .requests()
            .iter()
            .all(|r| r.response_format.is_none())
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_calls_are_persisted_and_summarized() {
        let coordinator = coordinator(ScriptedProvider::new().with_chat(
            "m1",
            serde_json::json!({
                "choices": [{"message": {
                    "content": null,
                    "tool_calls": [{"id": "call_1", "type": "function",
                                    "function": {"name": "add", "arguments": "{\"a\":1}"}}]
                }}],
                "usage": {"prompt_tokens": 20, "completion_tokens": 8, "cost": 0.0003}
            }),
        ));

        let prepared = coordinator
            .prepare(request(serde_json::json!({
                "config": {
                    "type": "tool",
                    "userPrompt": "add 1",
                    "toolDefinitions": [{"type": "function", "function": {"name": "add"}}]
                },
                "modelIds": ["m1"]
            })))
            .unwrap();
        let handle = prepared.handle();
        coordinator.execute(prepared, &NullSink, ExecutionMode::Whole).await;

        let response = coordinator.store().get_response(&handle.response_ids[0]).unwrap();
        assert_eq!(
            response.response_text.as_deref(),
            Some("Model requested tool calls: add")
        );
        let calls: Vec<ToolCall> =
            serde_json::from_str(response.tool_calls.as_deref().unwrap()).unwrap();
        assert_eq!(
            calls,
            vec![ToolCall {
                id: Some("call_1".to_string()),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: "add".to_string(),
                    arguments: "{\"a\":1}".to_string(),
                },
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_model_times_out_without_blocking_others() {
        let mut config = app_config();
        config.execution.model_timeout_secs = 5;
        let coordinator = Coordinator::new(
            Arc::new(
                ScriptedProvider::new().with_hang("slow").with_chat(
                    "fast",
                    serde_json::json!({
                        "choices": [{"message": {"content": "ok"}}],
                        "usage": {"prompt_tokens": 1, "completion_tokens": 1, "cost": 0.5}
                    }),
                ),
            ),
            Arc::new(SqliteStore::in_memory().unwrap()),
            Arc::new(config),
        );

        let prepared = coordinator.prepare(text_request(&["slow", "fast"])).unwrap();
        let handle = prepared.handle();
        let progress = coordinator.execute(prepared, &NullSink, ExecutionMode::Whole).await;

        assert_eq!(progress.completed_models, 2);
        let (_, responses) = coordinator.load_run(&handle.run_id).unwrap();
        assert_eq!(responses[0].status, ResponseStatus::Error);
        assert_eq!(
            responses[0].error_message.as_deref(),
            Some("Model call timed out after 5s")
        );
        assert_eq!(responses[1].status, ResponseStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_listener_does_not_stop_the_run() {
        let coordinator = coordinator(ScriptedProvider::new().with_sse_events(
            "m1",
            &[serde_json::json!({"choices": [{"delta": {"content": "4"}}],
                                 "usage": {"prompt_tokens": 5, "completion_tokens": 1, "cost": 0.1}})],
        ));
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);

        let progress = coordinator.stream_run(text_request(&["m1"]), &sink).await.unwrap();

        assert!(sink.is_closed());
        assert_eq!(progress.completed_models, 1);
        assert_eq!(progress.total_cost, 0.1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_run_returns_before_processing_finishes() {
        let coordinator = coordinator(ScriptedProvider::new().with_chat(
            "m1",
            serde_json::json!({
                "choices": [{"message": {"content": "4"}}],
                "usage": {"prompt_tokens": 5, "completion_tokens": 1, "cost": 0.0001}
            }),
        ));

        let handle = coordinator.start_run(text_request(&["m1"])).unwrap();
        assert_eq!(handle.response_ids.len(), 1);

        for _ in 0..100 {
            let run = coordinator.store().get_run(&handle.run_id).unwrap();
            if run.status == RunStatus::Completed {
                assert_eq!(run.completed_models, 1);
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("run never completed");
    }

    #[test]
    fn test_final_text_placeholders() {
        assert_eq!(final_text(BenchmarkType::Tool, " ", &[]), TOOL_PLACEHOLDER);
        assert_eq!(final_text(BenchmarkType::Text, "", &[]), EMPTY_PLACEHOLDER);
        assert_eq!(final_text(BenchmarkType::Vision, "a cat", &[]), "a cat");
    }
}
