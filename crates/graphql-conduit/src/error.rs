//! Error types for the execution client.

use std::fmt;

/// Errors produced while executing GraphQL operations.
#[derive(Debug, Clone)]
pub enum TransportError {
    /// HTTP request failed.
    Request(String),
    /// Invalid URL provided.
    InvalidUrl(String),
    /// Request timed out.
    Timeout,
    /// Request was cancelled.
    Cancelled,
    /// Connection refused or failed.
    Connection(String),
    /// JSON serialization/deserialization error.
    Json(String),
    /// Malformed streaming response framing (multipart boundary, SSE event).
    Decode(String),
    /// HTTP error status (4xx or 5xx) while a retry policy is active.
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// Optional status text or error message from the response.
        message: Option<String>,
    },
    /// WebSocket error.
    WebSocket(String),
    /// Server-sent events error.
    Sse(String),
    /// Invalid configuration or API misuse.
    Config(String),
    /// All retry attempts were exhausted without obtaining a result.
    NoResult,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request(msg) => write!(f, "HTTP request error: {msg}"),
            Self::InvalidUrl(msg) => write!(f, "Invalid URL: {msg}"),
            Self::Timeout => write!(f, "Request timed out"),
            Self::Cancelled => write!(f, "Request was cancelled"),
            Self::Connection(msg) => write!(f, "Connection error: {msg}"),
            Self::Json(msg) => write!(f, "JSON error: {msg}"),
            Self::Decode(msg) => write!(f, "Decode error: {msg}"),
            Self::HttpStatus { status, message } => {
                if let Some(msg) = message {
                    write!(f, "HTTP {status}: {msg}")
                } else {
                    write!(f, "HTTP {status}")
                }
            }
            Self::WebSocket(msg) => write!(f, "WebSocket error: {msg}"),
            Self::Sse(msg) => write!(f, "SSE error: {msg}"),
            Self::Config(msg) => write!(f, "Configuration error: {msg}"),
            Self::NoResult => write!(f, "No result obtained from any attempt"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

/// A specialized Result type for execution operations.
pub type Result<T> = std::result::Result<T, TransportError>;
