//! Error types for natter-srv
//!
//! This module defines all error types used throughout the crate.

use crate::traits::dns_api::ApiError;
use thiserror::Error;

/// Result type alias for natter-srv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for natter-srv
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or startup validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Child process errors (spawn, signal, wait)
    #[error("Process error: {0}")]
    Process(String),

    /// External IP lookup errors
    #[error("IP lookup error: {0}")]
    IpLookup(String),

    /// Provider-specific error
    #[error("Provider error ({provider}): {message}")]
    Provider {
        /// Provider name
        provider: String,
        /// Error message
        message: String,
    },

    /// The provider answered, but reported a logical failure
    #[error("{operation} rejected by provider: {}", render_api_errors(.errors))]
    Api {
        /// Operation that was attempted (e.g. "create A record")
        operation: String,
        /// Error list returned by the provider
        errors: Vec<ApiError>,
    },

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a process error
    pub fn process(msg: impl Into<String>) -> Self {
        Self::Process(msg.into())
    }

    /// Create an IP lookup error
    pub fn ip_lookup(msg: impl Into<String>) -> Self {
        Self::IpLookup(msg.into())
    }

    /// Create a provider-specific error
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create an error from a provider-reported error list
    pub fn api(operation: impl Into<String>, errors: Vec<ApiError>) -> Self {
        Self::Api {
            operation: operation.into(),
            errors,
        }
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Render a provider error list as `code: message; code: message`
pub fn render_api_errors(errors: &[ApiError]) -> String {
    if errors.is_empty() {
        return "no error details".to_string();
    }

    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_renders_code_and_message() {
        let err = Error::api(
            "create SRV record",
            vec![
                ApiError {
                    code: Some(81057),
                    message: "Record already exists.".to_string(),
                },
                ApiError {
                    code: None,
                    message: "Invalid TTL".to_string(),
                },
            ],
        );

        assert_eq!(
            err.to_string(),
            "create SRV record rejected by provider: 81057: Record already exists.; N/A: Invalid TTL"
        );
    }

    #[test]
    fn empty_api_error_list_still_renders() {
        let err = Error::api("update A record", Vec::new());
        assert!(err.to_string().ends_with("no error details"));
    }
}
