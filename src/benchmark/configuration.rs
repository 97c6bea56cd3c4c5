//! @ai:module:intent Caller-supplied benchmark configuration and its validated form
//! @ai:module:layer domain
//! @ai:module:public_api BenchmarkType, ConfigurationInput, BenchmarkRequest, BenchmarkConfiguration, BenchmarkSpec
//! @ai:module:stateless true

use crate::benchmark::attachment::{validate_reference, DocumentAttachment};
use crate::config::ExecutionConfig;
use crate::error::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const DEFAULT_RUN_NAME: &str = "Untitled Benchmark";

/// @ai:intent Kind of benchmark being run
/// @ai:effects pure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkType {
    Text,
    Structured,
    Tool,
    Vision,
    Document,
}

impl BenchmarkType {
    /// @ai:intent Convert type to string representation
    /// @ai:effects pure
    pub fn as_str(&self) -> &'static str {
        match self {
            BenchmarkType::Text => "text",
            BenchmarkType::Structured => "structured",
            BenchmarkType::Tool => "tool",
            BenchmarkType::Vision => "vision",
            BenchmarkType::Document => "document",
        }
    }

    /// @ai:intent Parse the stored string form
    /// @ai:effects pure
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "text" => Some(BenchmarkType::Text),
            "structured" => Some(BenchmarkType::Structured),
            "tool" => Some(BenchmarkType::Tool),
            "vision" => Some(BenchmarkType::Vision),
            "document" => Some(BenchmarkType::Document),
            _ => None,
        }
    }
}

impl std::fmt::Display for BenchmarkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// @ai:intent Raw configuration as posted by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationInput {
    #[serde(rename = "type")]
    pub benchmark_type: BenchmarkType,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub user_prompt: String,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// A JSON string or an inline JSON value
    #[serde(default)]
    pub json_schema: Option<serde_json::Value>,
    /// A JSON string, one tool object, or an array of tools
    #[serde(default)]
    pub tool_definitions: Option<serde_json::Value>,
}

/// @ai:intent Body of a StartRun / StreamRun call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BenchmarkRequest {
    pub config: ConfigurationInput,
    #[serde(default)]
    pub model_ids: Vec<String>,
    #[serde(default)]
    pub image_data: Option<String>,
    #[serde(default)]
    pub document_data: Option<DocumentAttachment>,
}

/// @ai:intent Per-type payload of a validated configuration
#[derive(Debug, Clone, PartialEq)]
pub enum BenchmarkSpec {
    Text,
    /// Schema text as supplied; parsed (and possibly dropped) by the request builder
    Structured { json_schema: Option<String> },
    Tool { tool_definitions: Option<String> },
    Vision { image_url: Option<String> },
    Document { document: Option<DocumentAttachment> },
}

impl BenchmarkSpec {
    /// @ai:intent Benchmark type tag of this variant
    /// @ai:effects pure
    pub fn benchmark_type(&self) -> BenchmarkType {
        match self {
            BenchmarkSpec::Text => BenchmarkType::Text,
            BenchmarkSpec::Structured { .. } => BenchmarkType::Structured,
            BenchmarkSpec::Tool { .. } => BenchmarkType::Tool,
            BenchmarkSpec::Vision { .. } => BenchmarkType::Vision,
            BenchmarkSpec::Document { .. } => BenchmarkType::Document,
        }
    }
}

/// @ai:intent Immutable, validated configuration for one run
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfiguration {
    pub name: String,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub spec: BenchmarkSpec,
}

impl BenchmarkConfiguration {
    /// @ai:intent Validate a caller request into a configuration and model list
    /// @ai:pre none; every check happens here before any record exists
    /// @ai:post model ids are non-blank and unique, prompt is non-empty
    /// @ai:effects pure
    pub fn from_request(
        request: BenchmarkRequest,
        defaults: &ExecutionConfig,
    ) -> Result<(Self, Vec<String>)> {
        let model_ids = validate_model_ids(request.model_ids)?;
        let input = request.config;

        if input.user_prompt.trim().is_empty() {
            return Err(BenchError::InvalidConfig("user prompt is required".to_string()));
        }

        let max_tokens = input.max_tokens.unwrap_or(defaults.default_max_tokens);
        if max_tokens == 0 {
            return Err(BenchError::InvalidConfig("maxTokens must be positive".to_string()));
        }

        let temperature = input.temperature.unwrap_or(defaults.default_temperature);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(BenchError::InvalidConfig(format!(
                "temperature {} is outside [0, 2]",
                temperature
            )));
        }

        let spec = match input.benchmark_type {
            BenchmarkType::Text => BenchmarkSpec::Text,
            BenchmarkType::Structured => BenchmarkSpec::Structured {
                json_schema: input.json_schema.as_ref().and_then(json_text),
            },
            BenchmarkType::Tool => BenchmarkSpec::Tool {
                tool_definitions: input.tool_definitions.as_ref().and_then(json_text),
            },
            BenchmarkType::Vision => {
                let image_url = request
                    .image_data
                    .or_else(|| request.document_data.map(|d| d.data_url));
                if let Some(url) = &image_url {
                    validate_reference(url)?;
                }
                BenchmarkSpec::Vision { image_url }
            }
            BenchmarkType::Document => {
                if let Some(doc) = &request.document_data {
                    validate_reference(&doc.data_url)?;
                }
                BenchmarkSpec::Document {
                    document: request.document_data,
                }
            }
        };

        let name = input
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RUN_NAME.to_string());

        let config = Self {
            name,
            description: input.description.filter(|d| !d.is_empty()),
            system_prompt: input.system_prompt.filter(|s| !s.is_empty()),
            user_prompt: input.user_prompt,
            max_tokens,
            temperature,
            spec,
        };

        Ok((config, model_ids))
    }

    /// @ai:intent Benchmark type of this configuration
    /// @ai:effects pure
    pub fn benchmark_type(&self) -> BenchmarkType {
        self.spec.benchmark_type()
    }

    /// @ai:intent Character count of everything sent as prompt text
    /// @ai:effects pure
    pub fn prompt_chars(&self) -> usize {
        let system = self.system_prompt.as_deref().map(|s| s.chars().count()).unwrap_or(0);
        system + self.user_prompt.chars().count()
    }

    /// @ai:intent Schema text persisted with the run
    /// @ai:effects pure
    pub fn json_schema(&self) -> Option<&str> {
        match &self.spec {
            BenchmarkSpec::Structured { json_schema } => json_schema.as_deref(),
            _ => None,
        }
    }

    /// @ai:intent Tool definitions text persisted with the run
    /// @ai:effects pure
    pub fn tool_definitions(&self) -> Option<&str> {
        match &self.spec {
            BenchmarkSpec::Tool { tool_definitions } => tool_definitions.as_deref(),
            _ => None,
        }
    }
}

/// @ai:intent Normalize a string-or-value JSON field to its text form
/// @ai:effects pure
fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) if s.trim().is_empty() => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// @ai:intent Reject empty, blank or duplicated model ids
/// @ai:effects pure
fn validate_model_ids(model_ids: Vec<String>) -> Result<Vec<String>> {
    if model_ids.is_empty() {
        return Err(BenchError::InvalidConfig("at least one model id is required".to_string()));
    }

    let mut seen = HashSet::new();

    for id in &model_ids {
        if id.trim().is_empty() {
            return Err(BenchError::InvalidConfig("model ids must not be blank".to_string()));
        }

        if !seen.insert(id.as_str()) {
            return Err(BenchError::InvalidConfig(format!("duplicate model id: {}", id)));
        }
    }

    Ok(model_ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(json: serde_json::Value) -> BenchmarkRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_text_config_gets_defaults() {
        let (config, models) = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {"type": "text", "userPrompt": "2+2?"},
                "modelIds": ["m1", "m2"]
            })),
            &ExecutionConfig::default(),
        )
        .unwrap();

        assert_eq!(models, vec!["m1".to_string(), "m2".to_string()]);
        assert_eq!(config.name, "Untitled Benchmark");
        assert_eq!(config.max_tokens, 1000);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.spec, BenchmarkSpec::Text);
    }

    #[test]
    fn test_zero_temperature_is_kept() {
        let (config, _) = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {"type": "text", "userPrompt": "hi", "temperature": 0.0},
                "modelIds": ["m1"]
            })),
            &ExecutionConfig::default(),
        )
        .unwrap();

        assert_eq!(config.temperature, 0.0);
    }

    #[test]
    fn test_schema_object_is_normalized_to_text() {
        let (config, _) = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {
                    "type": "structured",
                    "userPrompt": "give json",
                    "jsonSchema": {"type": "object"}
                },
                "modelIds": ["m1"]
            })),
            &ExecutionConfig::default(),
        )
        .unwrap();

        assert_eq!(config.json_schema(), Some(r#"{"type":"object"}"#));
    }

    #[test]
    fn test_invalid_schema_string_is_kept_for_the_builder() {
        let (config, _) = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {"type": "structured", "userPrompt": "x", "jsonSchema": "{not json"},
                "modelIds": ["m1"]
            })),
            &ExecutionConfig::default(),
        )
        .unwrap();

        assert_eq!(config.json_schema(), Some("{not json"));
    }

    #[test]
    fn test_rejects_empty_model_list_and_prompt() {
        let empty_models = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {"type": "text", "userPrompt": "hi"},
                "modelIds": []
            })),
            &ExecutionConfig::default(),
        );
        assert!(matches!(empty_models, Err(BenchError::InvalidConfig(_))));

        let empty_prompt = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {"type": "text", "userPrompt": "  "},
                "modelIds": ["m1"]
            })),
            &ExecutionConfig::default(),
        );
        assert!(matches!(empty_prompt, Err(BenchError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_duplicate_models() {
        let result = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {"type": "text", "userPrompt": "hi"},
                "modelIds": ["m1", "m1"]
            })),
            &ExecutionConfig::default(),
        );
        assert!(matches!(result, Err(BenchError::InvalidConfig(_))));
    }

    #[test]
    fn test_vision_falls_back_to_document_url() {
        let (config, _) = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {"type": "vision", "userPrompt": "describe"},
                "modelIds": ["m1"],
                "documentData": {"dataUrl": "data:image/png;base64,AAAA", "fileType": "image"}
            })),
            &ExecutionConfig::default(),
        )
        .unwrap();

        assert_eq!(
            config.spec,
            BenchmarkSpec::Vision {
                image_url: Some("data:image/png;base64,AAAA".to_string())
            }
        );
    }

    #[test]
    fn test_prompt_chars_counts_system_and_user() {
        let (config, _) = BenchmarkConfiguration::from_request(
            request(serde_json::json!({
                "config": {"type": "text", "systemPrompt": "abcd", "userPrompt": "éé"},
                "modelIds": ["m1"]
            })),
            &ExecutionConfig::default(),
        )
        .unwrap();

        assert_eq!(config.prompt_chars(), 6);
    }
}
