//! @ai:module:intent Scripted in-memory provider for tests and dry runs
//! @ai:module:layer infrastructure
//! @ai:module:public_api ScriptedProvider, StreamStep
//! @ai:module:stateless false

use crate::error::{BenchError, Result};
use crate::provider::client::{ByteStream, ProviderClient};
use crate::provider::types::{ChatRequest, ChatResponse, GenerationDetails, ModelInfo, Pricing};
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// @ai:intent One step of a scripted stream body
#[derive(Debug, Clone)]
pub enum StreamStep {
    /// Raw bytes delivered as one network chunk
    Bytes(String),
    Pause(Duration),
    /// Transport failure mid-body
    Fail(String),
}

#[derive(Debug, Clone)]
enum Reply {
    Chat(serde_json::Value),
    Stream(Vec<StreamStep>),
    Fail { status: u16, body: String },
    Hang,
}

/// @ai:intent Provider whose replies are fixed per model id
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<HashMap<String, Reply>>,
    generations: Mutex<HashMap<String, VecDeque<Option<GenerationDetails>>>>,
    models: Mutex<HashMap<String, ModelInfo>>,
    cached_pricing: Mutex<HashMap<String, Pricing>>,
    requests: Mutex<Vec<ChatRequest>>,
    generation_lookups: Mutex<usize>,
    model_lookups: Mutex<usize>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// @ai:intent Reply to a whole-response call with this JSON body
    pub fn with_chat(self, model_id: &str, body: serde_json::Value) -> Self {
        self.set_reply(model_id, Reply::Chat(body));
        self
    }

    /// @ai:intent Reply to a streaming call with a sequence of steps
    pub fn with_stream(self, model_id: &str, steps: Vec<StreamStep>) -> Self {
        self.set_reply(model_id, Reply::Stream(steps));
        self
    }

    /// @ai:intent Reply to a streaming call with SSE data events and [DONE]
    pub fn with_sse_events(self, model_id: &str, events: &[serde_json::Value]) -> Self {
        let mut steps: Vec<StreamStep> = events
            .iter()
            .map(|e| StreamStep::Bytes(format!("data: {}\n\n", e)))
            .collect();
        steps.push(StreamStep::Bytes("data: [DONE]\n\n".to_string()));
        self.with_stream(model_id, steps)
    }

    /// @ai:intent Fail every call for the model with an HTTP status
    pub fn with_failure(self, model_id: &str, status: u16, body: &str) -> Self {
        self.set_reply(
            model_id,
            Reply::Fail {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    /// @ai:intent Never answer calls for the model
    pub fn with_hang(self, model_id: &str) -> Self {
        self.set_reply(model_id, Reply::Hang);
        self
    }

    /// @ai:intent Queue lookup results for a generation id; None means "not ready yet"
    pub fn with_generation(self, generation_id: &str, results: Vec<Option<GenerationDetails>>) -> Self {
        if let Ok(mut generations) = self.generations.lock() {
            generations.insert(generation_id.to_string(), results.into());
        }
        self
    }

    pub fn with_model(self, model: ModelInfo) -> Self {
        if let Ok(mut models) = self.models.lock() {
            models.insert(model.id.clone(), model);
        }
        self
    }

    /// @ai:intent Pricing held in the local cache, separate from the catalog
    pub fn with_cached_pricing(self, model_id: &str, pricing: Pricing) -> Self {
        if let Ok(mut cached) = self.cached_pricing.lock() {
            cached.insert(model_id.to_string(), pricing);
        }
        self
    }

    /// @ai:intent Every chat request received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    pub fn generation_lookups(&self) -> usize {
        self.generation_lookups.lock().map(|n| *n).unwrap_or(0)
    }

    pub fn model_lookups(&self) -> usize {
        self.model_lookups.lock().map(|n| *n).unwrap_or(0)
    }

    fn set_reply(&self, model_id: &str, reply: Reply) {
        if let Ok(mut replies) = self.replies.lock() {
            replies.insert(model_id.to_string(), reply);
        }
    }

    fn take_reply(&self, request: &ChatRequest) -> Option<Reply> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        self.replies
            .lock()
            .ok()
            .and_then(|replies| replies.get(&request.model).cloned())
    }
}

fn script_stream(steps: Vec<StreamStep>) -> ByteStream {
    Box::pin(futures_util::stream::unfold(
        VecDeque::from(steps),
        |mut steps| async move {
            loop {
                match steps.pop_front()? {
                    StreamStep::Pause(d) => tokio::time::sleep(d).await,
                    StreamStep::Bytes(text) => return Some((Ok(Bytes::from(text)), steps)),
                    StreamStep::Fail(reason) => {
                        steps.clear();
                        return Some((Err(BenchError::Decode(reason)), steps));
                    }
                }
            }
        },
    ))
}

impl ProviderClient for ScriptedProvider {
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        match self.take_reply(request) {
            Some(Reply::Chat(body)) => Ok(serde_json::from_value(body)?),
            Some(Reply::Fail { status, body }) => Err(BenchError::Provider { status, body }),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Stream(_)) | None => Err(BenchError::Provider {
                status: 404,
                body: format!("no scripted reply for {}", request.model),
            }),
        }
    }

    async fn chat_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        match self.take_reply(request) {
            Some(Reply::Stream(steps)) => Ok(script_stream(steps)),
            Some(Reply::Fail { status, body }) => Err(BenchError::Provider { status, body }),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Chat(_)) | None => Err(BenchError::Provider {
                status: 404,
                body: format!("no scripted stream for {}", request.model),
            }),
        }
    }

    async fn get_generation(&self, generation_id: &str) -> Result<GenerationDetails> {
        if let Ok(mut n) = self.generation_lookups.lock() {
            *n += 1;
        }

        let next = self
            .generations
            .lock()
            .ok()
            .and_then(|mut g| g.get_mut(generation_id).and_then(|q| q.pop_front()));

        match next {
            Some(Some(details)) => Ok(details),
            _ => Err(BenchError::Provider {
                status: 404,
                body: format!("generation {} not found", generation_id),
            }),
        }
    }

    async fn get_model_details(&self, model_id: &str) -> Result<ModelInfo> {
        if let Ok(mut n) = self.model_lookups.lock() {
            *n += 1;
        }

        self.models
            .lock()
            .ok()
            .and_then(|m| m.get(model_id).cloned())
            .ok_or_else(|| BenchError::NotFound(format!("model {}", model_id)))
    }

    fn cached_pricing(&self, model_id: &str) -> Result<Option<Pricing>> {
        Ok(self
            .cached_pricing
            .lock()
            .ok()
            .and_then(|c| c.get(model_id).copied()))
    }
}
