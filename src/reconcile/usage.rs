//! @ai:module:intent Three-tier usage reconciliation and late provider timing lookup
//! @ai:module:layer application
//! @ai:module:public_api Reconciler, UsageOutcome, ProviderTiming, estimate_tokens
//! @ai:module:stateless true

use crate::benchmark::UsageSource;
use crate::config::ReconcileConfig;
use crate::provider::client::{calculate_cost, ProviderClient};
use crate::provider::types::{GenerationDetails, UsageReport};
use crate::reconcile::retry::retry_until;
use tracing::{debug, info, warn};

/// @ai:intent Usage and cost from exactly one tier
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageOutcome {
    pub usage: UsageReport,
    pub cost: f64,
    pub source: UsageSource,
    pub pricing_missing: bool,
}

/// @ai:intent Provider-reported timings for one generation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderTiming {
    pub latency_ms: Option<u64>,
    pub generation_time_ms: Option<u64>,
    pub moderation_latency_ms: Option<u64>,
}

impl ProviderTiming {
    fn from_details(details: &GenerationDetails) -> Option<Self> {
        let to_ms = |v: Option<f64>| v.filter(|v| v.is_finite() && *v >= 0.0).map(|v| v.round() as u64);
        let timing = Self {
            latency_ms: to_ms(details.latency),
            generation_time_ms: to_ms(details.generation_time),
            moderation_latency_ms: to_ms(details.moderation_latency),
        };

        let any = timing.latency_ms.is_some()
            || timing.generation_time_ms.is_some()
            || timing.moderation_latency_ms.is_some();
        any.then_some(timing)
    }
}

/// @ai:intent Tokens estimated from a character count, rounded up
/// @ai:pre chars_per_token > 0 (zero is treated as one)
/// @ai:effects pure
pub fn estimate_tokens(chars: usize, chars_per_token: u32) -> u64 {
    let per = u64::from(chars_per_token.max(1));
    (chars as u64).div_ceil(per)
}

/// @ai:intent Reconciles usage for one model against a provider
pub struct Reconciler<'a, P: ProviderClient> {
    provider: &'a P,
    config: &'a ReconcileConfig,
}

impl<'a, P: ProviderClient> Reconciler<'a, P> {
    pub fn new(provider: &'a P, config: &'a ReconcileConfig) -> Self {
        Self { provider, config }
    }

    /// @ai:intent Walk the tiers in trust order and return the first that yields tokens
    /// @ai:post exactly one tier supplies the outcome
    /// @ai:effects network, time
    pub async fn reconcile(
        &self,
        model_id: &str,
        inline: Option<UsageReport>,
        generation_id: Option<&str>,
        prompt_chars: usize,
        completion_chars: usize,
    ) -> UsageOutcome {
        if let Some(usage) = inline.filter(|u| u.has_tokens()) {
            return self.price_inline(model_id, usage).await;
        }

        if let Some(id) = generation_id {
            if let Some(outcome) = self.lookup_generation_usage(model_id, id).await {
                return outcome;
            }
        }

        self.estimate(model_id, prompt_chars, completion_chars)
    }

    /// @ai:intent Tier 1: trust inline counts; price them if the provider sent no cost
    /// @ai:effects network
    pub async fn price_inline(&self, model_id: &str, usage: UsageReport) -> UsageOutcome {
        let (cost, pricing_missing) = match usage.cost {
            Some(cost) => (cost, false),
            None => self.price(model_id, &usage).await,
        };

        UsageOutcome {
            usage,
            cost,
            source: UsageSource::Inline,
            pricing_missing,
        }
    }

    /// @ai:intent Tier 2: poll generation metadata until it carries token counts
    /// @ai:effects network, time
    pub async fn lookup_generation_usage(
        &self,
        model_id: &str,
        generation_id: &str,
    ) -> Option<UsageOutcome> {
        let policy = self.config.usage_lookup.policy();
        let usage = retry_until(&policy, "generation usage", move |_| async move {
            let details = self.provider.get_generation(generation_id).await?;
            Ok(details.usage_report())
        })
        .await?;

        let (cost, pricing_missing) = match usage.cost {
            Some(cost) => (cost, false),
            None => self.price(model_id, &usage).await,
        };

        debug!("Usage for {} recovered from generation {}", model_id, generation_id);
        Some(UsageOutcome {
            usage,
            cost,
            source: UsageSource::Generation,
            pricing_missing,
        })
    }

    /// @ai:intent Tier 3: character-count estimate priced from cached per-token rates
    /// @ai:post cost is 0 and pricing_missing is set when nothing is cached
    /// @ai:effects db:read
    pub fn estimate(
        &self,
        model_id: &str,
        prompt_chars: usize,
        completion_chars: usize,
    ) -> UsageOutcome {
        let prompt_tokens = estimate_tokens(prompt_chars, self.config.chars_per_token);
        let completion_tokens = estimate_tokens(completion_chars, self.config.chars_per_token);
        let usage = UsageReport {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost: None,
        };

        let (cost, pricing_missing) = self.price_from_cache(model_id, &usage);
        info!(
            "Estimated usage for {}: {} prompt + {} completion tokens",
            model_id, prompt_tokens, completion_tokens
        );

        UsageOutcome {
            usage,
            cost,
            source: UsageSource::Estimated,
            pricing_missing,
        }
    }

    /// @ai:intent Late lookup of provider-side latency figures
    /// @ai:post None when the budget runs out; never an error
    /// @ai:effects network, time
    pub async fn lookup_timing(&self, generation_id: &str) -> Option<ProviderTiming> {
        let policy = self.config.latency_lookup.policy();
        retry_until(&policy, "generation timing", move |_| async move {
            let details = self.provider.get_generation(generation_id).await?;
            Ok(ProviderTiming::from_details(&details))
        })
        .await
    }

    /// Cost from cached pricing only, and whether it was absent
    fn price_from_cache(&self, model_id: &str, usage: &UsageReport) -> (f64, bool) {
        match self.provider.cached_pricing(model_id) {
            Ok(Some(pricing)) => (
                calculate_cost(Some(&pricing), usage.prompt_tokens, usage.completion_tokens),
                false,
            ),
            Ok(None) => {
                warn!("No cached pricing for {}, estimated cost recorded as 0", model_id);
                (0.0, true)
            }
            Err(e) => {
                warn!("Pricing cache unavailable for {}: {}", model_id, e);
                (0.0, true)
            }
        }
    }

    /// Cost and whether pricing was unavailable; may fetch the catalog
    async fn price(&self, model_id: &str, usage: &UsageReport) -> (f64, bool) {
        match self.provider.get_model_details(model_id).await {
            Ok(model) => match model.pricing {
                Some(pricing) => (
                    calculate_cost(Some(&pricing), usage.prompt_tokens, usage.completion_tokens),
                    false,
                ),
                None => {
                    warn!("No pricing listed for {}, cost recorded as 0", model_id);
                    (0.0, true)
                }
            },
            Err(e) => {
                warn!("Pricing unavailable for {}: {}", model_id, e);
                (0.0, true)
            }
        }
    }
}
