//! LLM client abstraction and the Anthropic Messages API implementation.
//!
//! One call per request, no retries: the summarizer and the chat
//! orchestrator each make a single completion and surface failures as
//! [`KnowledgeError::ExternalService`].

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{KnowledgeError, Result};

const ANTHROPIC_MESSAGES_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_IMAGE_MEDIA_TYPE: &str = "image/jpeg";

/// A base64 image attached to a user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInput {
    pub media_type: String,
    /// Base64 payload without the data URL prefix.
    pub data: String,
}

/// Parse a `data:image/png;base64,...` URL, or bare base64 (assumed JPEG).
///
/// The payload is decoded once to make sure it is valid base64, but it is
/// passed on unchanged.
pub fn parse_image(raw: &str) -> Result<ImageInput> {
    let raw = raw.trim();
    let (media_type, data) = match raw.strip_prefix("data:") {
        Some(rest) => {
            let (header, payload) = rest.split_once(',').ok_or_else(|| {
                KnowledgeError::Validation("image data URL has no ',' separator".into())
            })?;
            let media_type = header
                .split(';')
                .next()
                .filter(|m| m.starts_with("image/"))
                .ok_or_else(|| {
                    KnowledgeError::Validation(format!("unsupported image media type '{}'", header))
                })?;
            (media_type.to_string(), payload)
        }
        None => (DEFAULT_IMAGE_MEDIA_TYPE.to_string(), raw),
    };

    if data.is_empty() {
        return Err(KnowledgeError::Validation("image payload is empty".into()));
    }
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| KnowledgeError::Validation(format!("image is not valid base64: {}", e)))?;

    Ok(ImageInput {
        media_type,
        data: data.to_string(),
    })
}

/// A single-turn completion request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system: String,
    /// Mark the system prompt for ephemeral prompt caching.
    pub cache_system: bool,
    pub user_text: String,
    pub images: Vec<ImageInput>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Default)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse>;
}

/// Anthropic Messages API client.
pub struct AnthropicClient {
    api_key: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(config: &LlmConfig, api_key: Option<&str>) -> Result<Self> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| KnowledgeError::Validation("Anthropic API key is required".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| KnowledgeError::external("anthropic", e.to_string(), false))?;

        Ok(Self {
            api_key: api_key.to_string(),
            client,
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = build_request_body(request);

        let response = self
            .client
            .post(ANTHROPIC_MESSAGES_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| KnowledgeError::external("anthropic", e.to_string(), true))?;

        let status = response.status();
        if !status.is_success() {
            let retryable = status.as_u16() == 429 || status.is_server_error();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(KnowledgeError::external(
                "anthropic",
                format!("Anthropic API error ({}): {}", status, error_text),
                retryable,
            ));
        }

        let parsed: MessagesResponse = response.json().await.map_err(|e| {
            KnowledgeError::external("anthropic", format!("unreadable response: {}", e), false)
        })?;
        Ok(parsed.into_response())
    }
}

pub fn create_llm_client(config: &LlmConfig, api_key: Option<&str>) -> Result<Box<dyn LlmClient>> {
    Ok(Box::new(AnthropicClient::new(config, api_key)?))
}

// ============ Wire types ============

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: Vec<SystemBlock<'a>>,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct SystemBlock<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache_control: Option<CacheControl>,
}

#[derive(Debug, Serialize)]
struct CacheControl {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: Vec<ContentBlock<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock<'a> {
    Text { text: &'a str },
    Image { source: ImageSource<'a> },
}

#[derive(Debug, Serialize)]
struct ImageSource<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    media_type: &'a str,
    data: &'a str,
}

fn build_request_body(request: &LlmRequest) -> MessagesRequest<'_> {
    let mut content = vec![ContentBlock::Text {
        text: &request.user_text,
    }];
    content.extend(request.images.iter().map(|img| ContentBlock::Image {
        source: ImageSource {
            kind: "base64",
            media_type: &img.media_type,
            data: &img.data,
        },
    }));

    MessagesRequest {
        model: &request.model,
        max_tokens: request.max_tokens,
        system: vec![SystemBlock {
            kind: "text",
            text: &request.system,
            cache_control: request
                .cache_system
                .then_some(CacheControl { kind: "ephemeral" }),
        }],
        messages: vec![WireMessage {
            role: "user",
            content,
        }],
    }
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
}

impl MessagesResponse {
    fn into_response(self) -> LlmResponse {
        let text = self
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        LlmResponse {
            text,
            model: self.model,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            cache_creation_tokens: self.usage.cache_creation_input_tokens.unwrap_or(0),
            cache_read_tokens: self.usage.cache_read_input_tokens.unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PIXEL: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

    #[test]
    fn test_parse_data_url_keeps_media_type() {
        let img = parse_image(&format!("data:image/png;base64,{}", PIXEL)).unwrap();
        assert_eq!(img.media_type, "image/png");
        assert_eq!(img.data, PIXEL);
    }

    #[test]
    fn test_bare_base64_defaults_to_jpeg() {
        let img = parse_image(PIXEL).unwrap();
        assert_eq!(img.media_type, "image/jpeg");
    }

    #[test]
    fn test_invalid_images_rejected() {
        assert!(parse_image("data:image/png;base64,@@@").is_err());
        assert!(parse_image("data:text/plain;base64,aGk=").is_err());
        assert!(parse_image("data:image/png;base64").is_err());
        assert!(parse_image("").is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let request = LlmRequest {
            model: "m".into(),
            system: "sys".into(),
            cache_system: true,
            user_text: "hello".into(),
            images: vec![ImageInput {
                media_type: "image/png".into(),
                data: PIXEL.into(),
            }],
            max_tokens: 10,
        };
        let json = serde_json::to_value(build_request_body(&request)).unwrap();
        assert_eq!(json["system"][0]["cache_control"]["type"], "ephemeral");
        let content = &json["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image");
        assert_eq!(content[1]["source"]["media_type"], "image/png");
    }

    #[test]
    fn test_uncached_system_has_no_cache_control() {
        let request = LlmRequest {
            model: "m".into(),
            system: "sys".into(),
            cache_system: false,
            user_text: "q".into(),
            images: Vec::new(),
            max_tokens: 10,
        };
        let json = serde_json::to_value(build_request_body(&request)).unwrap();
        assert!(json["system"][0].get("cache_control").is_none());
    }

    #[test]
    fn test_response_joins_text_blocks() {
        let raw = r#"{
            "model": "claude",
            "content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}],
            "usage": {"input_tokens": 3, "output_tokens": 4, "cache_read_input_tokens": 2}
        }"#;
        let parsed: MessagesResponse = serde_json::from_str(raw).unwrap();
        let resp = parsed.into_response();
        assert_eq!(resp.text, "ab");
        assert_eq!(resp.cache_read_tokens, 2);
        assert_eq!(resp.cache_creation_tokens, 0);
    }

    #[test]
    fn test_missing_key_rejected() {
        assert!(AnthropicClient::new(&LlmConfig::default(), Some("")).is_err());
    }
}
