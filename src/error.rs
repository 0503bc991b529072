//! Error types for the Color Nodes client.

use thiserror::Error;

/// Errors that can occur when using the Color Nodes client.
#[derive(Debug, Error)]
pub enum ColorNodesError {
    /// Failed to establish the push-channel connection.
    ///
    /// The hub retries transport drops automatically with backoff; this
    /// variant is returned from an explicit `start()` that could not get a
    /// first connection. Callers may retry.
    #[error("failed to connect to hub: {0}")]
    Connect(String),

    /// Attempted an operation that requires an active connection, but the
    /// hub is not connected. Not retried automatically; retry after the
    /// connection-status callback reports `Connected` again.
    #[error("hub connection is not ready")]
    NotConnected,

    /// A client-local rule rejected the input before any network call
    /// (invalid swap indices, duplicate draft colors, incomplete draft).
    /// The message is meant to be shown to the player as-is.
    #[error("{0}")]
    Validation(String),

    /// The server rejected a mutation (not your turn, lost a race with
    /// another accepted move, ...). Optimistic state has been reverted.
    #[error("server rejected the request (HTTP {status}): {message}")]
    MutationRejected {
        /// HTTP status code of the rejection.
        status: u16,
        /// Server-provided reason, if any.
        message: String,
    },

    /// The referenced game or room no longer exists, e.g. a stale cached
    /// game id after a server-side room reset.
    #[error("game or room not found")]
    NotFound,

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An HTTP request to the Room/Game API failed at the transport level.
    #[error("http error: {0}")]
    Http(String),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ColorNodesError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ColorNodesError::Timeout
        } else {
            ColorNodesError::Http(err.to_string())
        }
    }
}

/// A specialized [`Result`] type for Color Nodes client operations.
pub type Result<T> = std::result::Result<T, ColorNodesError>;
