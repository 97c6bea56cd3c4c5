//! @ai:module:intent Typed run events, their SSE framing, and delivery sinks
//! @ai:module:layer application
//! @ai:module:public_api BenchEvent, EventSink, ChannelSink, NullSink
//! @ai:module:stateless false

use crate::coordinator::aggregate::RunProgress;
use crate::error::Result;
use crate::provider::types::UsageReport;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// @ai:intent Everything a streaming caller can observe about a run
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged, rename_all_fields = "camelCase")]
pub enum BenchEvent {
    RunStarted {
        run_id: String,
        total_models: u32,
        response_ids: Vec<String>,
    },
    ModelStarted {
        model_id: String,
        response_id: String,
    },
    FirstToken {
        model_id: String,
        response_id: String,
        time_to_first_token: u64,
    },
    Token {
        model_id: String,
        response_id: String,
        content: String,
    },
    CostUpdate {
        model_id: String,
        response_id: String,
        cost: f64,
        tokens_per_second: Option<f64>,
        usage: UsageReport,
        estimated: bool,
    },
    MetricsUpdate {
        model_id: String,
        response_id: String,
        open_router_latency_ms: Option<u64>,
        generation_time_ms: Option<u64>,
        moderation_latency_ms: Option<u64>,
        time_to_first_token_ms: Option<u64>,
    },
    ModelCompleted {
        model_id: String,
        response_id: String,
        response: String,
        latency_ms: u64,
        cost: f64,
        generation_id: Option<String>,
    },
    ModelError {
        model_id: String,
        response_id: String,
        error: String,
    },
    Progress(RunProgress),
    RunCompleted {
        run_id: String,
        total_cost: f64,
        completed_models: u32,
    },
    Error {
        error: String,
    },
}

impl BenchEvent {
    /// @ai:intent Wire name of the event
    /// @ai:effects pure
    pub fn name(&self) -> &'static str {
        match self {
            BenchEvent::RunStarted { .. } => "run_started",
            BenchEvent::ModelStarted { .. } => "model_started",
            BenchEvent::FirstToken { .. } => "first_token",
            BenchEvent::Token { .. } => "token",
            BenchEvent::CostUpdate { .. } => "cost_update",
            BenchEvent::MetricsUpdate { .. } => "metrics_update",
            BenchEvent::ModelCompleted { .. } => "model_completed",
            BenchEvent::ModelError { .. } => "model_error",
            BenchEvent::Progress(_) => "progress",
            BenchEvent::RunCompleted { .. } => "run_completed",
            BenchEvent::Error { .. } => "error",
        }
    }

    /// @ai:intent Response id the event belongs to, if it is model-scoped
    /// @ai:effects pure
    pub fn response_id(&self) -> Option<&str> {
        match self {
            BenchEvent::ModelStarted { response_id, .. }
            | BenchEvent::FirstToken { response_id, .. }
            | BenchEvent::Token { response_id, .. }
            | BenchEvent::CostUpdate { response_id, .. }
            | BenchEvent::MetricsUpdate { response_id, .. }
            | BenchEvent::ModelCompleted { response_id, .. }
            | BenchEvent::ModelError { response_id, .. } => Some(response_id),
            _ => None,
        }
    }

    /// @ai:intent `event: <name>\ndata: <json>\n\n`
    /// @ai:effects pure
    pub fn to_sse_frame(&self) -> Result<String> {
        let data = serde_json::to_string(self)?;
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), data))
    }
}

/// @ai:intent Destination for run events
pub trait EventSink: Send + Sync {
    /// @ai:intent Deliver one event; delivery failures are absorbed
    fn emit(&self, event: BenchEvent) -> impl Future<Output = ()> + Send;
}

/// @ai:intent Sink for fire-and-forget runs
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    async fn emit(&self, _event: BenchEvent) {}
}

/// @ai:intent Bounded channel sink; goes quiet once the receiver is dropped
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::Sender<BenchEvent>,
    closed: AtomicBool,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BenchEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                closed: AtomicBool::new(false),
            },
            rx,
        )
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

impl EventSink for ChannelSink {
    /// @ai:effects channel
    async fn emit(&self, event: BenchEvent) {
        if self.is_closed() {
            return;
        }

        if self.tx.send(event).await.is_err() {
            debug!("Event receiver dropped, continuing run without a listener");
            self.closed.store(true, Ordering::Relaxed);
        }
    }
}
