//! Error types for the AIQ domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them so callers can `?` across crate boundaries.

use std::path::PathBuf;
use thiserror::Error;

/// Maximum number of characters of an offending payload kept in an error.
pub const PAYLOAD_EXCERPT_LEN: usize = 100;

/// The top-level error type for all AIQ operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Skill errors ---
    #[error("Skill error: {0}")]
    Skill(#[from] SkillError),

    // --- Tool-call argument errors ---
    #[error("Argument error: {0}")]
    Argument(#[from] ArgumentError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    /// The endpoint answered with an `{"error": {...}}` envelope.
    #[error("LLM API error: {message} (type: {kind})")]
    Upstream { kind: String, message: String },

    #[error("No choices in response")]
    EmptyChoices,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether the failure happened on the wire and is worth retrying.
    ///
    /// Malformed or semantically empty responses are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) | Self::RateLimited { .. } => true,
            Self::ApiError { status_code, .. } => *status_code >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Tool unavailable: {tool_name}: {reason}")]
    Unavailable { tool_name: String, reason: String },

    #[error("Tool cancelled: {0}")]
    Cancelled(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("skill '{0}' not found")]
    NotFound(String),

    #[error("failed to read skill file {path}: {reason}")]
    Io { path: PathBuf, reason: String },

    #[error("invalid skill document {path}: {reason}")]
    InvalidDocument { path: PathBuf, reason: String },

    #[error("failed to load {} skill(s): {}", .0.len(), join_errors(.0))]
    Multiple(Vec<SkillError>),
}

fn join_errors(errors: &[SkillError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Failures recovering a parameter object from a tool call's raw arguments.
///
/// Every variant carries a truncated excerpt of the original payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgumentError {
    #[error("empty arguments (payload: {excerpt:?})")]
    Empty { excerpt: String },

    #[error("invalid JSON arguments: {reason} (payload: {excerpt:?})")]
    InvalidJson { reason: String, excerpt: String },

    #[error("arguments must be a JSON object, got {found} (payload: {excerpt:?})")]
    NotAnObject { found: &'static str, excerpt: String },

    #[error("arguments still encoded after {depth} unwraps (payload: {excerpt:?})")]
    TooDeep { depth: usize, excerpt: String },
}

/// Truncate a payload to [`PAYLOAD_EXCERPT_LEN`] characters for error messages.
pub fn excerpt(payload: &str) -> String {
    if payload.chars().count() <= PAYLOAD_EXCERPT_LEN {
        return payload.to_string();
    }
    let mut cut: String = payload.chars().take(PAYLOAD_EXCERPT_LEN).collect();
    cut.push_str("...");
    cut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "execute_command".into(),
            reason: "command is blocked".into(),
        });
        assert!(err.to_string().contains("execute_command"));
        assert!(err.to_string().contains("blocked"));
    }

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Network("reset".into()).is_transient());
        assert!(ProviderError::ApiError { status_code: 503, message: String::new() }.is_transient());
        assert!(!ProviderError::ApiError { status_code: 400, message: String::new() }.is_transient());
        assert!(!ProviderError::EmptyChoices.is_transient());
        assert!(!ProviderError::MalformedResponse("bad".into()).is_transient());
    }

    #[test]
    fn multiple_skill_errors_are_joined() {
        let err = SkillError::Multiple(vec![
            SkillError::NotFound("a".into()),
            SkillError::NotFound("b".into()),
        ]);
        let text = err.to_string();
        assert!(text.contains("2 skill(s)"));
        assert!(text.contains("skill 'a' not found; skill 'b' not found"));
    }

    #[test]
    fn excerpt_truncates_long_payloads() {
        let long = "x".repeat(500);
        let cut = excerpt(&long);
        assert_eq!(cut.len(), PAYLOAD_EXCERPT_LEN + 3);
        assert!(cut.ends_with("..."));
        assert_eq!(excerpt("short"), "short");
    }
}
