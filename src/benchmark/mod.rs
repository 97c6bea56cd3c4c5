//! @ai:module:intent Benchmark configuration, attachments and result records
//! @ai:module:layer domain
//! @ai:module:public_api BenchmarkConfiguration, BenchmarkSpec, BenchmarkType, Run, ModelResponse

pub mod attachment;
pub mod configuration;
pub mod record;

pub use attachment::{DocumentAttachment, DocumentFileType};
pub use configuration::{
    BenchmarkConfiguration, BenchmarkRequest, BenchmarkSpec, BenchmarkType, ConfigurationInput,
};
pub use record::{
    tokens_per_second, ModelResponse, ResponseStatus, Run, RunStatus, UsageSource,
};
