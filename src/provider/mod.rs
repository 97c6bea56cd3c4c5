//! @ai:module:intent Chat-completion provider access: wire types, HTTP client, pacing, scripted double
//! @ai:module:layer infrastructure
//! @ai:module:public_api ProviderClient, OpenRouterClient, ScriptedProvider, PricingCache, calculate_cost

pub mod client;
pub mod mock;
pub mod rate_limiter;
pub mod types;

pub use client::{calculate_cost, ByteStream, OpenRouterClient, PricingCache, ProviderClient};
pub use mock::{ScriptedProvider, StreamStep};
pub use rate_limiter::{RateLimiter, RateLimiterTrait};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ContentPart, GenerationDetails, MessageContent,
    ModelInfo, Pricing, Role, ToolCall, Usage, UsageReport,
};
