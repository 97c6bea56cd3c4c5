//! @ai:module:intent Wire types for the OpenRouter-compatible chat API
//! @ai:module:layer infrastructure
//! @ai:module:public_api ChatRequest, ChatMessage, ContentPart, ChatResponse, Usage, UsageReport, StreamChunk, GenerationDetails, ModelInfo, Pricing
//! @ai:module:stateless true

use serde::{Deserialize, Deserializer, Serialize};

/// @ai:intent Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// @ai:intent Provider-agnostic chat completion request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugins: Option<Vec<Plugin>>,
    pub usage: UsageDirective,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub stream: bool,
}

/// @ai:intent Asks the provider to account usage inline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UsageDirective {
    pub include: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// @ai:intent One part of a multi-part user message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: FilePart },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilePart {
    pub filename: String,
    pub file_data: String,
}

/// @ai:intent Strict JSON-schema response format directive
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub json_schema: JsonSchemaFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

/// @ai:intent Provider-side attachment processing directive
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plugin {
    pub id: String,
    pub pdf: PdfOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PdfOptions {
    pub engine: String,
}

/// @ai:intent Whole (non-streaming) chat completion response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseMessage {
    /// A string, an array of parts, or null
    #[serde(default)]
    pub content: Option<serde_json::Value>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ResponseMessage {
    /// @ai:intent Flatten message content to plain text
    /// @ai:effects pure
    pub fn text(&self) -> String {
        match &self.content {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(serde_json::Value::Array(parts)) => parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join(""),
            Some(other) => other.to_string(),
        }
    }
}

/// @ai:intent A complete function call requested by the model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default = "default_tool_type")]
    pub kind: String,
    #[serde(default)]
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

fn default_tool_type() -> String {
    "function".to_string()
}

/// @ai:intent Usage object exactly as the provider sent it
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: Option<u64>,
    #[serde(default)]
    pub completion_tokens: Option<u64>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub cost: Option<f64>,
}

/// @ai:intent Normalized token counts and optional provider cost
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UsageReport {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Usage {
    /// @ai:intent Fill missing counts; total defaults to prompt + completion
    /// @ai:effects pure
    pub fn normalize(&self) -> UsageReport {
        let prompt_tokens = self.prompt_tokens.unwrap_or(0);
        let completion_tokens = self.completion_tokens.unwrap_or(0);
        let total_tokens = self
            .total_tokens
            .filter(|t| *t > 0)
            .unwrap_or(prompt_tokens + completion_tokens);

        UsageReport {
            prompt_tokens,
            completion_tokens,
            total_tokens,
            cost: self.cost.filter(|c| c.is_finite() && *c >= 0.0),
        }
    }
}

impl UsageReport {
    /// @ai:intent True when the report carries any token counts
    /// @ai:effects pure
    pub fn has_tokens(&self) -> bool {
        self.prompt_tokens > 0 || self.completion_tokens > 0
    }
}

/// @ai:intent One decoded SSE delta event
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<StreamChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamChoice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Delta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

/// @ai:intent A fragment of a streamed tool call, merged by index
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub index: usize,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub function: Option<FunctionDelta>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionDelta {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// @ai:intent Delayed per-generation metadata
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GenerationDetails {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub latency: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub generation_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub moderation_latency: Option<f64>,
    #[serde(default)]
    pub tokens_prompt: Option<u64>,
    #[serde(default)]
    pub tokens_completion: Option<u64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub total_cost: Option<f64>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl GenerationDetails {
    /// @ai:intent Usage from the nested object or the flat token fields
    /// @ai:effects pure
    pub fn usage_report(&self) -> Option<UsageReport> {
        let report = match &self.usage {
            Some(usage) => usage.normalize(),
            None => Usage {
                prompt_tokens: self.tokens_prompt,
                completion_tokens: self.tokens_completion,
                total_tokens: None,
                cost: self.total_cost,
            }
            .normalize(),
        };

        report.has_tokens().then_some(report)
    }
}

/// @ai:intent Per-token prices in dollars
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default, deserialize_with = "lenient_price")]
    pub prompt: f64,
    #[serde(default, deserialize_with = "lenient_price")]
    pub completion: f64,
}

/// @ai:intent Catalog entry for a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub pricing: Option<Pricing>,
    #[serde(default)]
    pub context_length: Option<u64>,
}

/// @ai:intent Number, numeric string, or anything else as absent
/// @ai:effects pure
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_f64(deserializer)?
        .filter(|p| p.is_finite() && *p >= 0.0)
        .unwrap_or(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_usage_total_falls_back_to_sum() {
        let usage: Usage =
            serde_json::from_str(r#"{"prompt_tokens": 5, "completion_tokens": 1}"#).unwrap();
        let report = usage.normalize();
        assert_eq!(report.total_tokens, 6);
        assert_eq!(report.cost, None);
    }

    #[test]
    fn test_usage_cost_accepts_scientific_notation_and_strings() {
        let usage: Usage = serde_json::from_str(r#"{"prompt_tokens": 1, "cost": 1e-4}"#).unwrap();
        assert_eq!(usage.cost, Some(0.0001));

        let usage: Usage = serde_json::from_str(r#"{"cost": "0.002"}"#).unwrap();
        assert_eq!(usage.cost, Some(0.002));
    }

    #[test]
    fn test_pricing_treats_bad_strings_as_zero() {
        let pricing: Pricing =
            serde_json::from_str(r#"{"prompt": "0.0000008", "completion": "n/a"}"#).unwrap();
        assert_eq!(pricing.prompt, 0.0000008);
        assert_eq!(pricing.completion, 0.0);
    }

    #[test]
    fn test_message_text_joins_parts() {
        let message: ResponseMessage = serde_json::from_str(
            r#"{"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(message.text(), "ab");

        let message: ResponseMessage = serde_json::from_str(r#"{"content": null}"#).unwrap();
        assert_eq!(message.text(), "");
    }

    #[test]
    fn test_generation_usage_from_flat_fields() {
        let details: GenerationDetails = serde_json::from_str(
            r#"{"latency": 812, "tokens_prompt": 10, "tokens_completion": 20, "total_cost": 0.003}"#,
        )
        .unwrap();

        let report = details.usage_report().unwrap();
        assert_eq!(report.total_tokens, 30);
        assert_eq!(report.cost, Some(0.003));
    }

    #[test]
    fn test_generation_without_tokens_has_no_usage() {
        let details: GenerationDetails = serde_json::from_str(r#"{"latency": 812}"#).unwrap();
        assert_eq!(details.usage_report(), None);
    }

    #[test]
    fn test_multipart_request_serializes_tagged_parts() {
        let message = ChatMessage {
            role: Role::User,
            content: MessageContent::Parts(vec![
                ContentPart::Text {
                    text: "describe".to_string(),
                },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: "data:image/png;base64,AAAA".to_string(),
                    },
                },
            ]),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "role": "user",
                "content": [
                    {"type": "text", "text": "describe"},
                    {"type": "image_url", "image_url": {"url": "data:image/png;base64,AAAA"}}
                ]
            })
        );
    }
}
