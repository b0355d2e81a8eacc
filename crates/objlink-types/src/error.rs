//! Shared error types for objlink.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for remote object operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// A payload or envelope did not match the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// No reply arrived within the transport's request window.
    #[error("Request timed out after {timeout:?}: {object_id}.{member}")]
    Timeout {
        /// Object the request was addressed to.
        object_id: String,
        /// Method that was invoked.
        member: String,
        /// The request window that elapsed.
        timeout: Duration,
    },

    /// Publish, subscribe or request failed at the transport layer.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote object has no implementation for the invoked member.
    #[error("Method not found: {object_id}.{member}")]
    MethodNotFound {
        /// Object the request was addressed to.
        object_id: String,
        /// Method that was invoked.
        member: String,
    },

    /// The remote implementation returned an error.
    #[error("Method failed: {member}: {reason}")]
    MethodFailed {
        /// Method that was invoked.
        member: String,
        /// Error description sent back by the implementation.
        reason: String,
    },

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for LinkError {
    fn from(e: serde_json::Error) -> Self {
        LinkError::Decode(e.to_string())
    }
}

/// Alias for Result with LinkError.
pub type LinkResult<T> = Result<T, LinkError>;

/// Error returned by a registered method implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct MethodError(pub String);

impl MethodError {
    /// Build an error from any displayable message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<LinkError> for MethodError {
    fn from(e: LinkError) -> Self {
        Self(e.to_string())
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_names_target() {
        let err = LinkError::Timeout {
            object_id: "calc".to_string(),
            member: "add".to_string(),
            timeout: Duration::from_secs(1),
        };
        let msg = err.to_string();
        assert!(msg.contains("calc.add"));
        assert!(msg.contains("1s"));
    }

    #[test]
    fn test_method_error_from_decode() {
        let err: MethodError = LinkError::Decode("expected number".into()).into();
        assert_eq!(err.0, "Decode error: expected number");
    }
}
