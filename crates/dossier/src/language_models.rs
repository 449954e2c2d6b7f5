// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The chat-model seam between the gateway and provider crates.
//!
//! Provider crates (`dossier-anthropic`, `dossier-openai`, `dossier-gemini`)
//! implement [`ChatModel`] over their raw HTTP APIs; the gateway only sees
//! this trait.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message role on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-call options the gateway resolves before dispatch.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub temperature: Option<f32>,
    /// Overrides the model's configured max tokens when set.
    pub max_tokens: Option<u32>,
    /// Request a JSON-object response format where the provider supports it;
    /// providers without the facility ignore the flag.
    pub json_mode: bool,
}

/// A chat-completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Generate a completion for the given messages.
    async fn generate(&self, messages: &[Message], options: &CallOptions) -> Result<String>;

    /// Model identifier (e.g. "claude-opus-4-5"), used for reasoning-model
    /// detection and fallback logging.
    fn model_name(&self) -> &str;

    /// Provider tag for logs ("claude", "openai", "gemini").
    fn provider_name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let m = Message::system("be terse");
        assert_eq!(m.role, Role::System);
        let m = Message::human("hello");
        assert_eq!(m.role, Role::Human);
        assert_eq!(m.content, "hello");
    }
}
