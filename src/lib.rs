//! @ai:module:intent Multi-model LLM benchmark execution engine
//! @ai:module:layer application
//! @ai:module:public_api benchmark, provider, request, stream, reconcile, store, coordinator, server, config, error

pub mod benchmark;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod provider;
pub mod reconcile;
pub mod request;
pub mod server;
pub mod store;
pub mod stream;

pub use benchmark::{BenchmarkConfiguration, BenchmarkRequest, BenchmarkType, ModelResponse, Run};
pub use config::AppConfig;
pub use coordinator::{BenchEvent, ChannelSink, Coordinator, EventSink, NullSink, RunHandle};
pub use error::{BenchError, Result};
pub use provider::{OpenRouterClient, ProviderClient, ScriptedProvider};
pub use store::{SqliteStore, Store};
