//! @ai:module:intent Build provider chat requests from a benchmark configuration
//! @ai:module:layer application
//! @ai:module:public_api build_chat_request
//! @ai:module:stateless true

use crate::benchmark::{BenchmarkConfiguration, BenchmarkSpec, DocumentAttachment, DocumentFileType};
use crate::provider::types::{
    ChatMessage, ChatRequest, ContentPart, FilePart, ImageUrl, JsonSchemaFormat, MessageContent,
    PdfOptions, Plugin, ResponseFormat, Role, UsageDirective,
};
use tracing::warn;

const SCHEMA_NAME: &str = "structured_output";
const PDF_PLUGIN: &str = "file-parser";
const PDF_ENGINE: &str = "pdf-text";

/// @ai:intent Translate a configuration into one model's chat request
/// @ai:post malformed schema or tool directives are dropped, never fatal
/// @ai:effects pure
pub fn build_chat_request(config: &BenchmarkConfiguration, model_id: &str) -> ChatRequest {
    let mut messages = Vec::with_capacity(2);

    if let Some(system) = &config.system_prompt {
        messages.push(ChatMessage {
            role: Role::System,
            content: MessageContent::Text(system.clone()),
        });
    }

    let mut request = ChatRequest {
        model: model_id.to_string(),
        messages,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
        response_format: None,
        tools: None,
        tool_choice: None,
        plugins: None,
        usage: UsageDirective { include: true },
        stream: false,
    };

    let user_content = match &config.spec {
        BenchmarkSpec::Vision {
            image_url: Some(url),
        } => with_image(&config.user_prompt, url),
        BenchmarkSpec::Document {
            document: Some(document),
        } => match document.file_type {
            DocumentFileType::Pdf => {
                request.plugins = Some(vec![Plugin {
                    id: PDF_PLUGIN.to_string(),
                    pdf: PdfOptions {
                        engine: PDF_ENGINE.to_string(),
                    },
                }]);
                with_file(&config.user_prompt, document)
            }
            DocumentFileType::Image => with_image(&config.user_prompt, &document.data_url),
        },
        _ => MessageContent::Text(config.user_prompt.clone()),
    };

    request.messages.push(ChatMessage {
        role: Role::User,
        content: user_content,
    });

    match &config.spec {
        BenchmarkSpec::Structured {
            json_schema: Some(schema),
        } => {
            request.response_format = parse_schema(schema);
        }
        BenchmarkSpec::Tool {
            tool_definitions: Some(tools),
        } => {
            request.tools = parse_tools(tools);
            if request.tools.is_some() {
                request.tool_choice = Some("auto".to_string());
            }
        }
        _ => {}
    }

    request
}

fn with_image(prompt: &str, url: &str) -> MessageContent {
    MessageContent::Parts(vec![
        ContentPart::Text {
            text: prompt.to_string(),
        },
        ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: url.to_string(),
            },
        },
    ])
}

fn with_file(prompt: &str, document: &DocumentAttachment) -> MessageContent {
    MessageContent::Parts(vec![
        ContentPart::Text {
            text: prompt.to_string(),
        },
        ContentPart::File {
            file: FilePart {
                filename: document.file_name_or_default().to_string(),
                file_data: document.data_url.clone(),
            },
        },
    ])
}

/// @ai:intent Strict schema directive, or None when the schema text is not JSON
/// @ai:effects log
fn parse_schema(schema: &str) -> Option<ResponseFormat> {
    match serde_json::from_str::<serde_json::Value>(schema) {
        Ok(schema) => Some(ResponseFormat {
            kind: "json_schema".to_string(),
            json_schema: JsonSchemaFormat {
                name: SCHEMA_NAME.to_string(),
                strict: true,
                schema,
            },
        }),
        Err(e) => {
            warn!("Invalid JSON schema, proceeding without response_format: {}", e);
            None
        }
    }
}

/// @ai:intent Tool list from a single tool object or an array of tools
/// @ai:effects log
fn parse_tools(tools: &str) -> Option<Vec<serde_json::Value>> {
    match serde_json::from_str::<serde_json::Value>(tools) {
        Ok(serde_json::Value::Array(list)) if !list.is_empty() => Some(list),
        Ok(serde_json::Value::Object(tool)) => Some(vec![serde_json::Value::Object(tool)]),
        Ok(other) => {
            warn!("Ignoring tool definitions that are not an object or list: {}", other);
            None
        }
        Err(e) => {
            warn!("Invalid tool definitions, proceeding without tools: {}", e);
            None
        }
    }
}
