// src/error.rs
// Standardized error types for kgchat

use thiserror::Error;

/// Main error type for the kgchat library
#[derive(Error, Debug)]
pub enum ChatError {
    /// Request never reached the backend or never returned
    #[error("network error: {0}")]
    Network(String),

    /// Backend answered with a non-2xx status and (possibly) a structured message
    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Malformed or missing expected payload
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Operation invalid for the current state
    #[error("invalid state: {0}")]
    State(String),

    /// Answer stream exceeded the absolute ceiling
    #[error("stream timed out after {0}s")]
    Timeout(u64),
}

/// Convenience type alias for Result using ChatError
pub type Result<T> = std::result::Result<T, ChatError>;

impl ChatError {
    /// Shorthand for state violations
    pub fn state(msg: impl Into<String>) -> Self {
        ChatError::State(msg.into())
    }

    /// Shorthand for protocol violations
    pub fn protocol(msg: impl Into<String>) -> Self {
        ChatError::Protocol(msg.into())
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Protocol(err.to_string())
    }
}
