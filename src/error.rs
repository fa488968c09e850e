//! Error types
//!
//! `SendError` covers everything the pipeline can raise *before* or *around*
//! a protocol exchange. Failures reported by the remote side (non-2xx status,
//! RPC status, stream error events) never surface as `SendError`; they are
//! folded into the normalized [`Response`](crate::types::Response) instead.

use thiserror::Error;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum SendError {
    /// Unresolvable URL, unknown service or method, missing definitions or payload.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Caller supplied something the pipeline cannot work with.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A request payload could not be decoded.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// HTTP client construction or request building failed.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Streaming machinery failed outside of the remote protocol.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// A hook callback returned an error.
    #[error("Hook error in '{hook}': {message}")]
    HookError { hook: String, message: String },

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl SendError {
    /// Build a hook error from any displayable message.
    pub fn hook(hook: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::HookError {
            hook: hook.into(),
            message: message.to_string(),
        }
    }

    /// Configuration errors are programmer/config mistakes raised before any
    /// network activity.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::ConfigurationError(_))
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_are_classified() {
        assert!(SendError::ConfigurationError("x".into()).is_configuration());
        assert!(!SendError::StreamError("x".into()).is_configuration());
    }

    #[test]
    fn hook_error_message_names_the_hook() {
        let err = SendError::hook("replaceVariables", "boom");
        assert_eq!(err.to_string(), "Hook error in 'replaceVariables': boom");
    }
}
