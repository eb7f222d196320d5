//! Error types for the gateway client

use serde_json::Value;
use thiserror::Error;

/// Result type alias for gateway client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by [`crate::GatewayClient`] operations.
///
/// Server-reported envelope errors are carried untouched in `Server`;
/// interpreting them is the caller's business.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The connection could not be established
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The connection is closed and can no longer carry requests
    #[error("Connection closed")]
    Closed,

    /// The transport refused an outbound frame
    #[error("Transport error: {0}")]
    Transport(String),

    /// The supplied update channel was already closed before any frame
    /// was sent
    #[error("Update channel closed before subscribing")]
    UpdateChannelClosed,

    /// The server reported an error in the reply envelope
    #[error("Server error: {0}")]
    Server(Value),

    /// The reply envelope did not have the shape the command expects
    #[error("Malformed reply: {0}")]
    MalformedReply(String),

    /// JSON encoding of an outbound request failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
