//! @ai:module:intent Run coordination: aggregate counters, events, and the per-model pipeline
//! @ai:module:layer application
//! @ai:module:public_api Coordinator, RunAggregate, BenchEvent, EventSink, ChannelSink, NullSink

pub mod aggregate;
pub mod events;
pub mod executor;

pub use aggregate::{RunAggregate, RunProgress, RunTransition};
pub use events::{BenchEvent, ChannelSink, EventSink, NullSink};
pub use executor::{Coordinator, ExecutionMode, PreparedRun, RunHandle};
