//! OpenAI chat client.
//!
//! Implements the core [`ChatModel`] trait over the Chat Completions API.
//! Because the endpoint is configurable, this client also serves proxy mode:
//! an OpenAI-compatible gateway can stand in for all three logical providers
//! by routing on model name.

use async_trait::async_trait;
use dossier::error::{Error, Result};
use dossier::language_models::{CallOptions, ChatModel, Message, Role};
use dossier::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde::{Deserialize, Serialize};

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default, rename = "type")]
    error_type: String,
}

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
struct ApiMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI (or OpenAI-compatible) chat model.
#[derive(Clone)]
pub struct ChatOpenAI {
    api_key: String,
    model: String,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    api_base: String,
    /// Provider tag reported to the gateway; proxy mode overrides this so
    /// fallback logs name the logical provider being impersonated.
    provider_tag: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for ChatOpenAI {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOpenAI")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("api_base", &self.api_base)
            .field("provider_tag", &self.provider_tag)
            .finish()
    }
}

impl ChatOpenAI {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: None,
            temperature: None,
            api_base: DEFAULT_API_BASE.to_string(),
            provider_tag: "openai".to_string(),
            http_client: create_http_client(),
        }
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Point at an OpenAI-compatible endpoint (proxy mode, test server).
    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Override the provider tag (proxy mode impersonating another provider).
    #[must_use]
    pub fn with_provider_tag(mut self, tag: impl Into<String>) -> Self {
        self.provider_tag = tag.into();
        self
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> Error {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let message = parsed
            .as_ref()
            .map(|e| e.error.message.as_str())
            .unwrap_or(body)
            .trim()
            .to_string();
        let error_type = parsed
            .map(|e| e.error.error_type)
            .unwrap_or_default();

        match status.as_u16() {
            429 => Error::rate_limit(format!("429 {message}")),
            401 | 403 => Error::authentication(format!("{status} {message}")),
            400 | 404 | 422 => Error::invalid_input(format!("{status} {message}")),
            s if s >= 500 => Error::network(format!("{status} {message}")),
            _ => Error::api(format!("OpenAI API error ({status}/{error_type}): {message}")),
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
impl ChatModel for ChatOpenAI {
    async fn generate(&self, messages: &[Message], options: &CallOptions) -> Result<String> {
        let api_messages = messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::System => "system",
                    Role::Human => "user",
                    Role::Assistant => "assistant",
                },
                content: m.content.clone(),
            })
            .collect();

        let request = ChatRequest {
            model: self.model.clone(),
            messages: api_messages,
            temperature: options.temperature.or(self.temperature),
            max_tokens: options.max_tokens.or(self.max_tokens),
            response_format: options.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::network(format!("OpenAI request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::network(format!("OpenAI response read failed: {e}")))?;
        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| Error::api(format!("OpenAI response parse failed: {e}")))?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::api("OpenAI response had no choices"))?;
        // Surface truncation so the gateway can drop the JSON constraint and retry.
        if choice.finish_reason.as_deref() == Some("length") && options.json_mode {
            let content = choice.message.content.as_deref().unwrap_or("");
            if serde_json::from_str::<serde_json::Value>(content).is_err() {
                return Err(Error::api(
                    "finish_reason: length response truncated before valid JSON completed",
                ));
            }
        }
        Ok(choice.message.content.unwrap_or_default())
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        &self.provider_tag
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_debug_redacts_api_key() {
        let model = ChatOpenAI::new("sk-secret", "gpt-4.1");
        assert!(!format!("{model:?}").contains("sk-secret"));
    }

    #[test]
    fn test_map_http_error_taxonomy() {
        assert!(matches!(
            ChatOpenAI::map_http_error(reqwest::StatusCode::TOO_MANY_REQUESTS, "{}"),
            Error::RateLimit(_)
        ));
        assert!(matches!(
            ChatOpenAI::map_http_error(reqwest::StatusCode::UNAUTHORIZED, "{}"),
            Error::Authentication(_)
        ));
        assert!(matches!(
            ChatOpenAI::map_http_error(reqwest::StatusCode::BAD_REQUEST, "{}"),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            ChatOpenAI::map_http_error(reqwest::StatusCode::BAD_GATEWAY, "{}"),
            Error::Network(_)
        ));
    }

    #[tokio::test]
    async fn test_generate_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "pong"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;
        let model = ChatOpenAI::new("key", "gpt-4.1").with_api_base(server.uri());
        let out = model
            .generate(&[Message::human("ping")], &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "pong");
    }

    #[tokio::test]
    async fn test_json_mode_sets_response_format() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "response_format": {"type": "json_object"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{}"}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let model = ChatOpenAI::new("key", "gpt-4.1").with_api_base(server.uri());
        let options = CallOptions {
            json_mode: true,
            ..Default::default()
        };
        model
            .generate(&[Message::human("give json")], &options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_truncated_json_surfaces_length_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{\"unterminated\": "}, "finish_reason": "length"}]
            })))
            .mount(&server)
            .await;
        let model = ChatOpenAI::new("key", "gpt-4.1").with_api_base(server.uri());
        let options = CallOptions {
            json_mode: true,
            ..Default::default()
        };
        let err = model
            .generate(&[Message::human("give json")], &options)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("finish_reason: length"));
    }

    #[test]
    fn test_proxy_tag_override() {
        let model = ChatOpenAI::new("key", "claude-opus-4-5").with_provider_tag("claude");
        assert_eq!(model.provider_name(), "claude");
    }
}
