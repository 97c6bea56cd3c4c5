//! @ai:module:intent OpenRouter-compatible provider client
//! @ai:module:layer infrastructure
//! @ai:module:public_api ProviderClient, OpenRouterClient, PricingCache, ByteStream, calculate_cost
//! @ai:module:stateless false

use crate::config::ProviderConfig;
use crate::error::{BenchError, Result};
use crate::provider::rate_limiter::{RateLimiter, RateLimiterTrait};
use crate::provider::types::{ChatRequest, ChatResponse, GenerationDetails, ModelInfo, Pricing};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Raw response body of a streaming chat call
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// @ai:intent Trait for a chat-completion provider
pub trait ProviderClient: Send + Sync + 'static {
    /// @ai:intent Whole-response chat completion
    fn chat(&self, request: &ChatRequest) -> impl Future<Output = Result<ChatResponse>> + Send;

    /// @ai:intent Streaming chat completion; yields the raw SSE body
    fn chat_stream(&self, request: &ChatRequest) -> impl Future<Output = Result<ByteStream>> + Send;

    /// @ai:intent Delayed metadata for one generation
    fn get_generation(
        &self,
        generation_id: &str,
    ) -> impl Future<Output = Result<GenerationDetails>> + Send;

    /// @ai:intent Catalog entry (with pricing) for one model
    fn get_model_details(&self, model_id: &str) -> impl Future<Output = Result<ModelInfo>> + Send;

    /// @ai:intent Pricing already held locally; never reaches the network
    /// @ai:post Ok(None) when nothing is cached for the model
    fn cached_pricing(&self, model_id: &str) -> Result<Option<Pricing>>;
}

/// @ai:intent Local source of model pricing consulted before the catalog
pub trait PricingCache: Send + Sync {
    fn cached_model(&self, model_id: &str) -> Result<Option<ModelInfo>>;
}

/// @ai:intent Dollar cost of a call from per-token prices; absent prices count as zero
/// @ai:effects pure
pub fn calculate_cost(pricing: Option<&Pricing>, prompt_tokens: u64, completion_tokens: u64) -> f64 {
    match pricing {
        Some(p) => prompt_tokens as f64 * p.prompt + completion_tokens as f64 * p.completion,
        None => 0.0,
    }
}

#[derive(Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

/// @ai:intent HTTP client for OpenRouter with rate limiting
pub struct OpenRouterClient {
    client: reqwest::Client,
    config: ProviderConfig,
    rate_limiter: Arc<RateLimiter>,
    api_key: String,
    pricing_cache: Option<Arc<dyn PricingCache>>,
}

impl OpenRouterClient {
    /// @ai:intent Create a client with an explicit key
    /// @ai:effects pure
    pub fn new(config: ProviderConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        let rate_limiter = Arc::new(RateLimiter::new(config.requests_per_minute));

        Ok(Self {
            client,
            config,
            rate_limiter,
            api_key,
            pricing_cache: None,
        })
    }

    /// @ai:intent Create a client reading the key from the configured variable
    /// @ai:pre the variable named by api_key_env is set
    /// @ai:effects env
    pub fn from_env(config: ProviderConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            BenchError::InvalidConfig(format!("{} not set in environment", config.api_key_env))
        })?;
        Self::new(config, api_key)
    }

    /// @ai:intent Attach a cache consulted before the /models catalog
    pub fn with_pricing_cache(mut self, cache: Arc<dyn PricingCache>) -> Self {
        self.pricing_cache = Some(cache);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }

    /// @ai:intent Download the full model catalog
    /// @ai:effects network
    pub async fn fetch_catalog(&self) -> Result<Vec<ModelInfo>> {
        self.rate_limiter.wait().await;
        let response = self
            .request(reqwest::Method::GET, "/models")
            .timeout(self.request_timeout())
            .send()
            .await?;
        let response = Self::check(response).await?;

        let envelope: DataEnvelope<Vec<ModelInfo>> = response
            .json()
            .await
            .map_err(|e| BenchError::Decode(format!("model catalog: {}", e)))?;
        Ok(envelope.data)
    }

    /// @ai:intent Turn a non-2xx response into a provider error
    /// @ai:effects network
    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BenchError::Provider {
            status: status.as_u16(),
            body,
        })
    }
}

impl ProviderClient for OpenRouterClient {
    /// @ai:effects network
    async fn chat(&self, request: &ChatRequest) -> Result<ChatResponse> {
        self.rate_limiter.wait().await;

        let mut body = request.clone();
        body.stream = false;

        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .timeout(self.request_timeout())
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| BenchError::Decode(format!("chat completion: {}", e)))
    }

    /// @ai:effects network
    async fn chat_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
        self.rate_limiter.wait().await;

        let mut body = request.clone();
        body.stream = true;

        let response = self
            .request(reqwest::Method::POST, "/chat/completions")
            .json(&body)
            .send()
            .await?;
        let response = Self::check(response).await?;

        debug!("Stream opened for {}", request.model);
        Ok(Box::pin(
            response.bytes_stream().map(|chunk| chunk.map_err(BenchError::from)),
        ))
    }

    /// @ai:effects network
    async fn get_generation(&self, generation_id: &str) -> Result<GenerationDetails> {
        self.rate_limiter.wait().await;

        let response = self
            .request(reqwest::Method::GET, "/generation")
            .query(&[("id", generation_id)])
            .timeout(self.request_timeout())
            .send()
            .await?;
        let response = Self::check(response).await?;

        let envelope: DataEnvelope<GenerationDetails> = response
            .json()
            .await
            .map_err(|e| BenchError::Decode(format!("generation {}: {}", generation_id, e)))?;
        Ok(envelope.data)
    }

    /// @ai:effects network, db:read
    async fn get_model_details(&self, model_id: &str) -> Result<ModelInfo> {
        if let Some(cache) = &self.pricing_cache {
            match cache.cached_model(model_id) {
                Ok(Some(model)) if model.pricing.is_some() => return Ok(model),
                Ok(_) => {}
                Err(e) => debug!("Pricing cache lookup failed for {}: {}", model_id, e),
            }
        }

        self.fetch_catalog()
            .await?
            .into_iter()
            .find(|m| m.id == model_id)
            .ok_or_else(|| BenchError::NotFound(format!("model {}", model_id)))
    }

    /// @ai:effects db:read
    fn cached_pricing(&self, model_id: &str) -> Result<Option<Pricing>> {
        match &self.pricing_cache {
            Some(cache) => Ok(cache.cached_model(model_id)?.and_then(|m| m.pricing)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_cost_uses_both_prices() {
        let pricing = Pricing {
            prompt: 0.000001,
            completion: 0.000002,
        };
        let cost = calculate_cost(Some(&pricing), 1000, 500);
        assert!((cost - 0.002).abs() < 1e-12);
    }

    #[test]
    fn test_calculate_cost_without_pricing_is_zero() {
        assert_eq!(calculate_cost(None, 1000, 500), 0.0);
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = ProviderConfig {
            base_url: "https://openrouter.ai/api/v1/".to_string(),
            ..ProviderConfig::default()
        };
        let client = OpenRouterClient::new(config, "sk-test".to_string()).unwrap();
        assert_eq!(
            client.url("/generation"),
            "https://openrouter.ai/api/v1/generation"
        );
    }

    struct OneModelCache(ModelInfo);

    impl PricingCache for OneModelCache {
        fn cached_model(&self, model_id: &str) -> Result<Option<ModelInfo>> {
            Ok((self.0.id == model_id).then(|| self.0.clone()))
        }
    }

    #[test]
    fn test_cached_pricing_reads_only_the_cache() {
        let pricing = Pricing {
            prompt: 0.001,
            completion: 0.002,
        };
        let client = OpenRouterClient::new(ProviderConfig::default(), "sk-test".to_string()).unwrap();
        assert_eq!(client.cached_pricing("m1").unwrap(), None);

        let client = client.with_pricing_cache(Arc::new(OneModelCache(ModelInfo {
            id: "m1".to_string(),
            pricing: Some(pricing),
            ..ModelInfo::default()
        })));
        assert_eq!(client.cached_pricing("m1").unwrap(), Some(pricing));
        assert_eq!(client.cached_pricing("m2").unwrap(), None);
    }

    #[test]
    fn test_from_env_requires_key() {
        let config = ProviderConfig {
            api_key_env: "MODELBENCH_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..ProviderConfig::default()
        };
        let result = OpenRouterClient::from_env(config);
        assert!(matches!(result, Err(BenchError::InvalidConfig(_))));
    }
}
