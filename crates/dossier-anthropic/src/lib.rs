//! Anthropic Claude chat client.
//!
//! Implements the core [`ChatModel`] trait over the Messages API. JSON mode
//! has no native response-format switch on this API; the gateway's prompt
//! constraint carries that contract instead, so the flag is accepted and
//! ignored here.

use async_trait::async_trait;
use dossier::error::{Error, Result};
use dossier::language_models::{CallOptions, ChatModel, Message, Role};
use dossier::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde::{Deserialize, Serialize};

const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type")]
    error_type: String,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

/// Anthropic Claude chat model.
#[derive(Clone)]
pub struct ChatAnthropic {
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f32>,
    api_url: String,
    http_client: reqwest::Client,
}

// Custom Debug to keep the API key out of logs.
impl std::fmt::Debug for ChatAnthropic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatAnthropic")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl ChatAnthropic {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 4096,
            temperature: None,
            api_url: DEFAULT_API_URL.to_string(),
            http_client: create_http_client(),
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Point at a different endpoint (proxy, test server).
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> Error {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let error_type = parsed
            .as_ref()
            .map(|e| e.error.error_type.as_str())
            .unwrap_or("unknown_error");
        let message = parsed
            .as_ref()
            .map(|e| e.error.message.as_str())
            .unwrap_or(body)
            .trim();
        let message = if message.is_empty() { "Unknown error" } else { message };

        match (status, error_type) {
            (reqwest::StatusCode::TOO_MANY_REQUESTS, _) | (_, "rate_limit_error") => {
                Error::rate_limit(format!("429 {message}"))
            }
            (reqwest::StatusCode::UNAUTHORIZED, _)
            | (reqwest::StatusCode::FORBIDDEN, _)
            | (_, "authentication_error")
            | (_, "permission_error") => Error::authentication(format!("{status} {message}")),
            (reqwest::StatusCode::BAD_REQUEST, _)
            | (reqwest::StatusCode::NOT_FOUND, _)
            | (_, "invalid_request_error")
            | (_, "not_found_error") => Error::invalid_input(format!("{status} {message}")),
            (_, "overloaded_error") => Error::network(format!("overloaded: {message}")),
            _ if status.is_server_error() => Error::network(format!("{status} {message}")),
            _ => Error::api(format!("Anthropic API error ({status}): {message}")),
        }
    }
}

fn create_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
        .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[async_trait]
impl ChatModel for ChatAnthropic {
    async fn generate(&self, messages: &[Message], options: &CallOptions) -> Result<String> {
        // System messages ride in the dedicated field; the rest alternate.
        let mut system: Option<String> = None;
        let mut api_messages = Vec::new();
        for m in messages {
            match m.role {
                Role::System => match &mut system {
                    Some(existing) => {
                        existing.push('\n');
                        existing.push_str(&m.content);
                    }
                    None => system = Some(m.content.clone()),
                },
                Role::Human => api_messages.push(ApiMessage {
                    role: "user",
                    content: m.content.clone(),
                }),
                Role::Assistant => api_messages.push(ApiMessage {
                    role: "assistant",
                    content: m.content.clone(),
                }),
            }
        }

        let request = MessagesRequest {
            model: self.model.clone(),
            max_tokens: options.max_tokens.unwrap_or(self.max_tokens),
            messages: api_messages,
            system,
            temperature: options.temperature.or(self.temperature),
        };

        let response = self
            .http_client
            .post(&self.api_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::network(format!("Anthropic request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::network(format!("Anthropic response read failed: {e}")))?;
        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }

        let parsed: MessagesResponse = serde_json::from_str(&body)
            .map_err(|e| Error::api(format!("Anthropic response parse failed: {e}")))?;
        let text = parsed
            .content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "claude"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_debug_redacts_api_key() {
        let model = ChatAnthropic::new("sk-ant-secret", "claude-opus-4-5");
        let debug = format!("{model:?}");
        assert!(!debug.contains("sk-ant-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_map_http_error_rate_limit() {
        let err = ChatAnthropic::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"type": "error", "error": {"type": "rate_limit_error", "message": "slow down"}}"#,
        );
        assert!(matches!(err, Error::RateLimit(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn test_map_http_error_auth_is_permanent() {
        let err = ChatAnthropic::map_http_error(
            reqwest::StatusCode::UNAUTHORIZED,
            r#"{"type": "error", "error": {"type": "authentication_error", "message": "bad key"}}"#,
        );
        assert!(matches!(err, Error::Authentication(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_map_http_error_overloaded_is_network() {
        let err = ChatAnthropic::map_http_error(
            reqwest::StatusCode::OK,
            r#"{"type": "error", "error": {"type": "overloaded_error", "message": "busy"}}"#,
        );
        assert!(matches!(err, Error::Network(_)));
    }

    #[test]
    fn test_map_http_error_unparseable_body() {
        let err =
            ChatAnthropic::map_http_error(reqwest::StatusCode::INTERNAL_SERVER_ERROR, "oops");
        assert!(matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_generate_roundtrip_with_mock_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("anthropic-version", API_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "Hello from Claude"}],
                "model": "claude-opus-4-5",
                "usage": {"input_tokens": 10, "output_tokens": 5}
            })))
            .mount(&server)
            .await;

        let model = ChatAnthropic::new("key", "claude-opus-4-5")
            .with_api_url(format!("{}/v1/messages", server.uri()));
        let out = model
            .generate(
                &[Message::system("be brief"), Message::human("hi")],
                &CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, "Hello from Claude");
    }

    #[tokio::test]
    async fn test_generate_maps_429_to_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "type": "error",
                "error": {"type": "rate_limit_error", "message": "limited"}
            })))
            .mount(&server)
            .await;
        let model = ChatAnthropic::new("key", "claude-opus-4-5")
            .with_api_url(format!("{}/v1/messages", server.uri()));
        let err = model
            .generate(&[Message::human("hi")], &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimit(_)));
    }
}
