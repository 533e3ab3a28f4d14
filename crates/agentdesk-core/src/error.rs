//! Engine error taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Categories of engine errors for consistent handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed stream frame (fatal to the current stream only)
    Decode,
    /// Transport dropped, timed out, or never connected (retryable)
    Connection,
    /// Outbound queue could not be written or read
    Persistence,
    /// No bearer token available (precondition failure)
    Auth,
    /// Non-2xx response from the backend
    Http,
    /// Invalid configuration
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Decode => write!(f, "decode"),
            ErrorKind::Connection => write!(f, "connection"),
            ErrorKind::Persistence => write!(f, "persistence"),
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::Http => write!(f, "http"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}

/// Structured engine error with kind and details.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineError {
    /// Error category
    pub kind: ErrorKind,
    /// One-line summary suitable for display
    pub message: String,
    /// Optional additional details (e.g., raw response body)
    pub details: Option<String>,
}

impl EngineError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: None,
        }
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Decode, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Persistence, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    /// Creates an HTTP status error, pulling a cleaner message out of JSON bodies.
    pub fn http_status(status: u16, body: &str) -> Self {
        if body.is_empty() {
            return Self::new(ErrorKind::Http, format!("HTTP {status}"));
        }

        if let Ok(json) = serde_json::from_str::<Value>(body) {
            let msg = json
                .get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(Value::as_str)
                .or_else(|| json.get("detail").and_then(Value::as_str));
            if let Some(msg) = msg {
                return Self {
                    kind: ErrorKind::Http,
                    message: format!("HTTP {status}: {msg}"),
                    details: Some(body.to_string()),
                };
            }
        }

        Self {
            kind: ErrorKind::Http,
            message: format!("HTTP {status}"),
            details: Some(body.to_string()),
        }
    }

    /// Returns true if retrying the same operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::Connection | ErrorKind::Persistence | ErrorKind::Http => true,
            ErrorKind::Decode | ErrorKind::Auth | ErrorKind::Config => false,
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EngineError {}

/// Maps transport errors onto the engine taxonomy.
pub fn classify_reqwest_error(e: &reqwest::Error) -> EngineError {
    if e.is_timeout() {
        EngineError::connection(format!("Request timed out: {e}"))
    } else if e.is_connect() {
        EngineError::connection(format!("Connection failed: {e}"))
    } else if e.is_decode() {
        EngineError::decode(format!("Failed to decode response: {e}"))
    } else {
        EngineError::connection(format!("Network error: {e}"))
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;
