//! @ai:module:intent Turn a provider delta stream into ordered relay events
//! @ai:module:layer application
//! @ai:module:public_api StreamRelay, RelayEvent, RelayOutcome
//! @ai:module:stateless false

use crate::benchmark::tokens_per_second;
use crate::error::{BenchError, Result};
use crate::provider::client::ByteStream;
use crate::provider::types::{FunctionCall, StreamChunk, ToolCall, ToolCallDelta, UsageReport};
use crate::stream::sse::{SseDecoder, SseFrame};
use futures_util::StreamExt;
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// @ai:intent Event surfaced to the caller while a stream is consumed
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    FirstToken { elapsed_ms: u64 },
    Token(String),
    /// First inline usage seen in the stream
    Usage {
        usage: UsageReport,
        tokens_per_second: f64,
    },
}

/// @ai:intent Everything accumulated once the stream is over
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayOutcome {
    pub text: String,
    pub first_token_ms: Option<u64>,
    pub generation_id: Option<String>,
    pub usage: Option<UsageReport>,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Streaming,
    /// After [DONE] with no usage yet; read until the deadline for a trailing usage frame
    Draining { deadline: Instant },
    Finished,
}

/// @ai:intent Pull-based relay over one provider stream
pub struct StreamRelay {
    body: ByteStream,
    decoder: SseDecoder,
    pending: VecDeque<RelayEvent>,
    started: Instant,
    grace: Duration,
    phase: Phase,
    outcome: RelayOutcome,
    tool_calls: BTreeMap<usize, ToolCall>,
}

impl StreamRelay {
    /// @ai:intent Wrap a raw body; `started` is when the request was sent
    /// @ai:effects pure
    pub fn new(body: ByteStream, started: Instant, grace: Duration) -> Self {
        Self {
            body,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
            started,
            grace,
            phase: Phase::Streaming,
            outcome: RelayOutcome::default(),
            tool_calls: BTreeMap::new(),
        }
    }

    /// @ai:intent Next event in arrival order, None once the stream is over
    /// @ai:post FirstToken precedes every Token
    /// @ai:effects network, time
    pub async fn next_event(&mut self) -> Result<Option<RelayEvent>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            match self.phase {
                Phase::Finished => return Ok(None),
                Phase::Streaming => match self.body.next().await {
                    Some(Ok(bytes)) => self.absorb(&bytes)?,
                    Some(Err(e)) => return Err(e),
                    None => {
                        if let Some(frame) = self.decoder.finish() {
                            self.handle_frame(frame)?;
                        }
                        self.phase = Phase::Finished;
                    }
                },
                Phase::Draining { deadline } => {
                    match tokio::time::timeout_at(deadline, self.body.next()).await {
                        Ok(Some(Ok(bytes))) => self.absorb(&bytes)?,
                        Ok(Some(Err(e))) => {
                            debug!("Stream error after end marker ignored: {}", e);
                            self.phase = Phase::Finished;
                        }
                        Ok(None) | Err(_) => self.phase = Phase::Finished,
                    }
                }
            }
        }
    }

    /// @ai:intent Accumulated outcome without reading further
    pub fn into_outcome(mut self) -> RelayOutcome {
        self.outcome.tool_calls = std::mem::take(&mut self.tool_calls).into_values().collect();
        self.outcome
    }

    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn absorb(&mut self, bytes: &[u8]) -> Result<()> {
        for frame in self.decoder.feed(bytes) {
            self.handle_frame(frame)?;
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: SseFrame) -> Result<()> {
        match frame {
            SseFrame::Done => {
                if self.phase == Phase::Streaming {
                    self.phase = if self.outcome.usage.is_some() {
                        Phase::Finished
                    } else {
                        Phase::Draining {
                            deadline: Instant::now() + self.grace,
                        }
                    };
                }
                Ok(())
            }
            SseFrame::Data(data) => {
                let chunk: StreamChunk = match serde_json::from_str(&data) {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!("Skipping unparsable stream payload: {}", e);
                        return Ok(());
                    }
                };
                self.handle_chunk(chunk)
            }
        }
    }

    fn handle_chunk(&mut self, chunk: StreamChunk) -> Result<()> {
        if let Some(error) = chunk.error {
            return Err(in_band_error(&error));
        }

        if self.outcome.generation_id.is_none() {
            self.outcome.generation_id = chunk.id.filter(|id| !id.is_empty());
        }

        for choice in chunk.choices.into_iter().take(1) {
            let content = choice.delta.content.filter(|c| !c.is_empty());
            let has_tool_delta = choice.delta.tool_calls.as_ref().is_some_and(|t| !t.is_empty());

            if (content.is_some() || has_tool_delta) && self.outcome.first_token_ms.is_none() {
                let elapsed_ms = self.elapsed_ms();
                self.outcome.first_token_ms = Some(elapsed_ms);
                self.pending.push_back(RelayEvent::FirstToken { elapsed_ms });
            }

            if let Some(content) = content {
                self.outcome.text.push_str(&content);
                self.pending.push_back(RelayEvent::Token(content));
            }

            for delta in choice.delta.tool_calls.unwrap_or_default() {
                self.merge_tool_call(delta);
            }
        }

        if let Some(usage) = chunk.usage {
            let report = usage.normalize();
            if self.outcome.usage.is_some() {
                debug!("Ignoring additional usage object in stream");
            } else if report.has_tokens() {
                let tps = tokens_per_second(report.completion_tokens, self.elapsed_ms());
                self.outcome.usage = Some(report);
                self.pending.push_back(RelayEvent::Usage {
                    usage: report,
                    tokens_per_second: tps,
                });
                if matches!(self.phase, Phase::Draining { .. }) {
                    self.phase = Phase::Finished;
                }
            }
        }

        Ok(())
    }

    fn merge_tool_call(&mut self, delta: ToolCallDelta) {
        let call = self.tool_calls.entry(delta.index).or_insert_with(|| ToolCall {
            id: None,
            kind: "function".to_string(),
            function: FunctionCall::default(),
        });

        if let Some(id) = delta.id.filter(|id| !id.is_empty()) {
            call.id = Some(id);
        }

        if let Some(function) = delta.function {
            if let Some(name) = function.name {
                call.function.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                call.function.arguments.push_str(&arguments);
            }
        }
    }
}

/// @ai:intent Provider error from an in-band `{"error": {...}}` payload
fn in_band_error(error: &serde_json::Value) -> BenchError {
    let status = error
        .get("code")
        .and_then(|c| c.as_u64())
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(502);
    let body = error
        .get("message")
        .and_then(|m| m.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| error.to_string());

    BenchError::Provider { status, body }
}
