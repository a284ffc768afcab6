//! Error types for the transport bridge.

use crate::engine::EngineError;

/// A specialized Result type for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors produced while executing a request through the bridge.
///
/// Exactly one of a response or a `BridgeError` is produced per call. A
/// redirect that is not followed is not an error: the caller receives the
/// redirect response itself.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// The transport engine reported a terminal failure.
    #[error("Transport error: {0}")]
    Transport(#[from] EngineError),

    /// The call was cancelled, either by the caller or by the engine.
    #[error("Request was cancelled")]
    Cancelled,

    /// The request body cannot be represented as an upload.
    #[error("Unsupported request body: {0}")]
    UnsupportedBody(String),

    /// Producing the request body failed before dispatch.
    #[error("Request body error: {0}")]
    Body(String),

    /// The request body exceeded the configured upload limit.
    #[error("Request body exceeds the upload limit of {limit} bytes")]
    UploadTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },

    /// The response body exceeded the configured response limit.
    #[error("Response body exceeds the limit of {limit} bytes")]
    ResponseTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },

    /// A header name or value was rejected.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// The request URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// JSON decoding of a response body failed.
    #[error("JSON error: {0}")]
    Json(String),

    /// The engine configuration is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The async runtime could not run the call.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl BridgeError {
    /// Create an unsupported-body error.
    pub fn unsupported_body(message: impl Into<String>) -> Self {
        Self::UnsupportedBody(message.into())
    }

    /// Create a body production error.
    pub fn body(message: impl Into<String>) -> Self {
        Self::Body(message.into())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Check whether this error represents a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Get the engine error, if the failure came from the transport.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::convert::Infallible> for BridgeError {
    fn from(err: std::convert::Infallible) -> Self {
        match err {}
    }
}

impl From<url::ParseError> for BridgeError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<toml::de::Error> for BridgeError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for BridgeError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for BridgeError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}
