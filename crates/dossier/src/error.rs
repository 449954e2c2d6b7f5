// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Error types for the investigation engine.
//!
//! A single error enum covers the whole workspace; integration crates map
//! their HTTP/driver failures onto it through the constructor helpers. The
//! gateway's retry policy never inspects error variants directly; it runs
//! [`classify`] over the message text, so classification stays a pure,
//! testable predicate.

use thiserror::Error;

/// Result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// How the gateway should treat a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rate limit, 5xx, timeout, connection: safe to retry.
    Transient,
    /// Invalid API key, bad request, malformed response: do not retry.
    Permanent,
}

/// Classify an error message as transient or permanent for retry policy.
///
/// Permanent markers are checked first so "401 Unauthorized: connection
/// rejected" is not retried. Unknown failures default to transient.
pub fn classify(message: &str) -> ErrorClass {
    let msg = message.to_lowercase();
    const PERMANENT: &[&str] = &[
        "401", "403", "invalid", "api key", "expired", "400", "malformed", "schema",
    ];
    if PERMANENT.iter().any(|m| msg.contains(m)) {
        return ErrorClass::Permanent;
    }
    const TRANSIENT: &[&str] = &[
        "429", "500", "503", "rate", "timeout", "connection", "reset",
    ];
    if TRANSIENT.iter().any(|m| msg.contains(m)) {
        return ErrorClass::Transient;
    }
    ErrorClass::Transient
}

/// Workspace error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A graph node failed during execution.
    #[error("Node '{node}' execution failed: {source}")]
    NodeExecution {
        node: String,
        #[source]
        source: Box<Error>,
    },

    /// Graph construction or routing problem (bad edge, missing entry point).
    #[error("Graph error: {0}")]
    Graph(String),

    /// Recursion safeguard tripped.
    #[error("Recursion limit of {limit} node executions exceeded")]
    RecursionLimit { limit: usize },

    /// Provider rejected the request for rate reasons.
    #[error("Rate limit: {0}")]
    RateLimit(String),

    /// Credentials rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request was malformed or rejected as invalid.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Connectivity-level failure (DNS, reset, 5xx, timeout).
    #[error("Network error: {0}")]
    Network(String),

    /// Provider returned an error the other variants do not cover.
    #[error("API error: {0}")]
    Api(String),

    /// Cost budget for this investigation exceeded; terminate gracefully.
    #[error("Budget exhausted: {0}")]
    BudgetExhausted(String),

    /// Search provider auth failure (401/403/422): empty results, no retry.
    #[error("Search auth error: {0}")]
    SearchAuth(String),

    /// Tool-level failure (search, fetch, graph driver).
    #[error("Tool error: {0}")]
    ToolError(String),

    /// Validation failure in core logic.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Checkpoint persistence failure.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Generic(String),
}

impl Error {
    pub fn rate_limit(msg: impl Into<String>) -> Self {
        Self::RateLimit(msg.into())
    }

    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn network(msg: impl Into<String>) -> Self {
        Self::Network(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    pub fn budget_exhausted(msg: impl Into<String>) -> Self {
        Self::BudgetExhausted(msg.into())
    }

    pub fn search_auth(msg: impl Into<String>) -> Self {
        Self::SearchAuth(msg.into())
    }

    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    pub fn node_execution(node: impl Into<String>, source: Error) -> Self {
        Self::NodeExecution {
            node: node.into(),
            source: Box::new(source),
        }
    }

    /// Retry classification for this error.
    ///
    /// Budget exhaustion is neither retried nor treated as a provider
    /// failure; it gets its own handling in the director.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::BudgetExhausted(_) | Error::Authentication(_) | Error::InvalidInput(_) => {
                ErrorClass::Permanent
            }
            Error::RateLimit(_) | Error::Network(_) => ErrorClass::Transient,
            other => classify(&other.to_string()),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_rate_limit_is_transient() {
        assert_eq!(classify("429 Too Many Requests"), ErrorClass::Transient);
        assert_eq!(classify("rate limit exceeded"), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_server_errors_transient() {
        assert_eq!(classify("HTTP 500 internal error"), ErrorClass::Transient);
        assert_eq!(classify("503 service unavailable"), ErrorClass::Transient);
        assert_eq!(classify("request timeout"), ErrorClass::Transient);
        assert_eq!(classify("connection reset by peer"), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_auth_is_permanent() {
        assert_eq!(classify("401 Unauthorized"), ErrorClass::Permanent);
        assert_eq!(classify("403 Forbidden"), ErrorClass::Permanent);
        assert_eq!(classify("invalid api key"), ErrorClass::Permanent);
        assert_eq!(classify("token expired"), ErrorClass::Permanent);
    }

    #[test]
    fn test_classify_bad_request_is_permanent() {
        assert_eq!(classify("400 Bad Request"), ErrorClass::Permanent);
        assert_eq!(classify("malformed payload"), ErrorClass::Permanent);
        assert_eq!(classify("schema validation failed"), ErrorClass::Permanent);
    }

    #[test]
    fn test_classify_permanent_wins_over_transient() {
        // "401 ... connection" contains markers from both lists
        assert_eq!(
            classify("401 Unauthorized: connection rejected"),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_classify_unknown_defaults_transient() {
        assert_eq!(classify("something odd happened"), ErrorClass::Transient);
    }

    #[test]
    fn test_error_class_budget_is_permanent() {
        assert_eq!(
            Error::budget_exhausted("over").class(),
            ErrorClass::Permanent
        );
    }

    #[test]
    fn test_error_class_rate_limit_is_transient() {
        assert!(Error::rate_limit("slow down").is_transient());
    }
}
