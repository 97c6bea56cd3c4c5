//! @ai:module:intent Usage reconciliation tiers and the retry policy they share
//! @ai:module:layer application
//! @ai:module:public_api Reconciler, UsageOutcome, ProviderTiming, RetryPolicy, retry_until

pub mod retry;
pub mod usage;

pub use retry::{retry_until, Backoff, RetryPolicy};
pub use usage::{estimate_tokens, ProviderTiming, Reconciler, UsageOutcome};
