//! Google Gemini chat client.
//!
//! Implements the core [`ChatModel`] trait over the `generateContent` API.
//! JSON mode maps to `responseMimeType: application/json`.

use async_trait::async_trait;
use dossier::error::{Error, Result};
use dossier::language_models::{CallOptions, ChatModel, Message, Role};
use dossier::{DEFAULT_HTTP_CONNECT_TIMEOUT, DEFAULT_HTTP_REQUEST_TIMEOUT};
use serde::{Deserialize, Serialize};

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate {
    content: Option<Content>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    status: String,
}

/// Google Gemini chat model.
#[derive(Clone)]
pub struct ChatGemini {
    api_key: String,
    model: String,
    max_output_tokens: Option<u32>,
    temperature: Option<f32>,
    api_base: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for ChatGemini {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatGemini")
            .field("api_key", &"[REDACTED]")
            .field("model", &self.model)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("temperature", &self.temperature)
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl ChatGemini {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            max_output_tokens: None,
            temperature: None,
            api_base: DEFAULT_API_BASE.to_string(),
            http_client: reqwest::Client::builder()
                .timeout(DEFAULT_HTTP_REQUEST_TIMEOUT)
                .connect_timeout(DEFAULT_HTTP_CONNECT_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    #[must_use]
    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> Error {
        let parsed = serde_json::from_str::<ErrorEnvelope>(body).ok();
        let (message, api_status) = parsed
            .map(|e| (e.error.message, e.error.status))
            .unwrap_or_else(|| (body.trim().to_string(), String::new()));

        match (status.as_u16(), api_status.as_str()) {
            (429, _) | (_, "RESOURCE_EXHAUSTED") => Error::rate_limit(format!("429 {message}")),
            (401 | 403, _) | (_, "PERMISSION_DENIED" | "UNAUTHENTICATED") => {
                Error::authentication(format!("{status} {message}"))
            }
            (400 | 404, _) | (_, "INVALID_ARGUMENT" | "NOT_FOUND") => {
                Error::invalid_input(format!("{status} {message}"))
            }
            (s, _) if s >= 500 => Error::network(format!("{status} {message}")),
            _ => Error::api(format!("Gemini API error ({status}): {message}")),
        }
    }
}

#[async_trait]
impl ChatModel for ChatGemini {
    async fn generate(&self, messages: &[Message], options: &CallOptions) -> Result<String> {
        let mut system_parts: Vec<Part> = Vec::new();
        let mut contents: Vec<Content> = Vec::new();
        for m in messages {
            match m.role {
                Role::System => system_parts.push(Part {
                    text: m.content.clone(),
                }),
                Role::Human => contents.push(Content {
                    role: Some("user".to_string()),
                    parts: vec![Part {
                        text: m.content.clone(),
                    }],
                }),
                Role::Assistant => contents.push(Content {
                    role: Some("model".to_string()),
                    parts: vec![Part {
                        text: m.content.clone(),
                    }],
                }),
            }
        }

        let request = GenerateContentRequest {
            contents,
            system_instruction: (!system_parts.is_empty()).then_some(Content {
                role: None,
                parts: system_parts,
            }),
            generation_config: Some(GenerationConfig {
                temperature: options.temperature.or(self.temperature),
                max_output_tokens: options.max_tokens.or(self.max_output_tokens),
                response_mime_type: options.json_mode.then_some("application/json"),
            }),
        };

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );
        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::network(format!("Gemini request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::network(format!("Gemini response read failed: {e}")))?;
        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| Error::api(format!("Gemini response parse failed: {e}")))?;
        let candidate = parsed
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::api("Gemini response had no candidates"))?;
        if candidate.finish_reason.as_deref() == Some("MAX_TOKENS") {
            return Err(Error::api(
                "max_tokens reached before the response completed",
            ));
        }
        let text = candidate
            .content
            .map(|c| {
                c.parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        Ok(text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "gemini"
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_debug_redacts_api_key() {
        let model = ChatGemini::new("AIza-secret", "gemini-2.5-pro");
        assert!(!format!("{model:?}").contains("AIza-secret"));
    }

    #[test]
    fn test_map_http_error_resource_exhausted() {
        let err = ChatGemini::map_http_error(
            reqwest::StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}}"#,
        );
        assert!(matches!(err, Error::RateLimit(_)));
    }

    #[test]
    fn test_map_http_error_permission_denied() {
        let err = ChatGemini::map_http_error(
            reqwest::StatusCode::FORBIDDEN,
            r#"{"error": {"code": 403, "message": "key not valid", "status": "PERMISSION_DENIED"}}"#,
        );
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[test]
    fn test_request_serialization_shape() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".into()),
                parts: vec![Part { text: "hi".into() }],
            }],
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part { text: "sys".into() }],
            }),
            generation_config: Some(GenerationConfig {
                temperature: Some(0.1),
                max_output_tokens: Some(100),
                response_mime_type: Some("application/json"),
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "sys");
        assert_eq!(json["generationConfig"]["responseMimeType"], "application/json");
        assert_eq!(json["generationConfig"]["maxOutputTokens"], 100);
    }

    #[tokio::test]
    async fn test_generate_roundtrip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/models/gemini-2\.5-pro:generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{
                    "content": {"role": "model", "parts": [{"text": "Gemini says hi"}]},
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;
        let model = ChatGemini::new("key", "gemini-2.5-pro").with_api_base(server.uri());
        let out = model
            .generate(&[Message::human("hello")], &CallOptions::default())
            .await
            .unwrap();
        assert_eq!(out, "Gemini says hi");
    }
}
