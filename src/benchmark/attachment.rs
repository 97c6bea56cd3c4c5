//! @ai:module:intent Image and document attachments carried as data URLs
//! @ai:module:layer domain
//! @ai:module:public_api DocumentAttachment, DocumentFileType, mime_type, base64_payload
//! @ai:module:stateless true

use crate::error::{BenchError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const BASE64_MARKER: &str = "base64,";

/// @ai:intent Kind of document uploaded for a document benchmark
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFileType {
    Pdf,
    Image,
}

impl DocumentFileType {
    /// @ai:intent Convert file type to string representation
    /// @ai:effects pure
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentFileType::Pdf => "pdf",
            DocumentFileType::Image => "image",
        }
    }
}

/// @ai:intent Document payload as sent by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAttachment {
    pub data_url: String,
    pub file_type: DocumentFileType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
}

impl DocumentAttachment {
    /// @ai:intent File name used for the provider file part
    /// @ai:effects pure
    pub fn file_name_or_default(&self) -> &str {
        self.file_name.as_deref().unwrap_or("document.pdf")
    }
}

/// @ai:intent Reject references the provider cannot fetch
/// @ai:pre reference is the raw caller string
/// @ai:effects pure
pub fn validate_reference(reference: &str) -> Result<()> {
    if reference.starts_with("data:") {
        base64_payload(reference)?;
        return Ok(());
    }

    if reference.starts_with("https://") {
        return Ok(());
    }

    Err(BenchError::InvalidConfig(
        "attachment must be a base64 data URL or an https URL".to_string(),
    ))
}

/// @ai:intent MIME type declared by a data URL
/// @ai:effects pure
pub fn mime_type(data_url: &str) -> &str {
    static MIME: OnceLock<Regex> = OnceLock::new();
    let re = MIME.get_or_init(|| Regex::new(r"^data:([^;,]+);").expect("static regex"));

    re.captures(data_url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("application/octet-stream")
}

/// @ai:intent Base64 body of a data URL
/// @ai:effects pure
pub fn base64_payload(data_url: &str) -> Result<&str> {
    data_url
        .find(BASE64_MARKER)
        .map(|idx| &data_url[idx + BASE64_MARKER.len()..])
        .ok_or_else(|| BenchError::InvalidConfig("invalid base64 data URL".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_type_from_data_url() {
        assert_eq!(mime_type("data:image/png;base64,AAAA"), "image/png");
        assert_eq!(mime_type("data:application/pdf;base64,JVBE"), "application/pdf");
        assert_eq!(mime_type("not a data url"), "application/octet-stream");
    }

    #[test]
    fn test_base64_payload() {
        assert_eq!(base64_payload("data:image/png;base64,AAAA").unwrap(), "AAAA");
        assert!(base64_payload("data:image/png,raw").is_err());
    }

    #[test]
    fn test_validate_reference() {
        assert!(validate_reference("data:image/jpeg;base64,/9j/").is_ok());
        assert!(validate_reference("https://example.com/cat.png").is_ok());
        assert!(validate_reference("http://example.com/cat.png").is_err());
        assert!(validate_reference("/tmp/cat.png").is_err());
    }

    #[test]
    fn test_document_deserializes_camel_case() {
        let doc: DocumentAttachment = serde_json::from_str(
            r#"{"dataUrl": "data:application/pdf;base64,JVBE", "fileType": "pdf"}"#,
        )
        .unwrap();
        assert_eq!(doc.file_type, DocumentFileType::Pdf);
        assert_eq!(doc.file_name_or_default(), "document.pdf");
    }
}
