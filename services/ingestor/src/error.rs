//! Error types for the ingestion service

use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Failures reported by storage and registry implementations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// Backing store unreachable or timed out
    #[error("Sink unavailable: {0}")]
    Unavailable(String),

    /// Store refused the rows
    #[error("Sink rejected write: {0}")]
    Rejected(String),

    /// Symbol could not be resolved or created
    #[error("Registry error for {ticker}: {reason}")]
    Registry { ticker: String, reason: String },
}

impl SinkError {
    /// Check if retrying the same write may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SinkError::Unavailable(_))
    }
}

/// Main error type for ingestion operations
#[derive(Debug, Error)]
pub enum IngestError {
    /// Connection-related errors
    #[error("Connection failed to {url}: {reason}")]
    ConnectionFailed {
        /// Endpoint that failed to connect
        url: String,
        /// Reason for the failure
        reason: String,
    },

    /// Connection timeout during establish
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// No frame received within the message timeout
    #[error("No message received for {idle_ms}ms")]
    MessageTimeout { idle_ms: u64 },

    /// Connection closed by the server or the network
    #[error("Connection closed: {reason:?}")]
    ConnectionClosed { reason: Option<String> },

    /// Feed rejected the credentials
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// Message processing errors
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// JSON parsing error from feed payload
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Required field missing from feed event
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Configuration error in service settings
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Storage or registry failure
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl IngestError {
    /// Check if this error is recoverable through reconnect or retry
    pub fn is_recoverable(&self) -> bool {
        match self {
            IngestError::ConnectionFailed { .. }
            | IngestError::ConnectionTimeout { .. }
            | IngestError::MessageTimeout { .. }
            | IngestError::ConnectionClosed { .. }
            | IngestError::InvalidMessage(_)
            | IngestError::JsonParse(_)
            | IngestError::MissingField { .. }
            | IngestError::WebSocket(_) => true,
            IngestError::Sink(e) => e.is_recoverable(),
            _ => false,
        }
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            IngestError::AuthenticationFailed { .. } | IngestError::Configuration(_)
        )
    }
}
