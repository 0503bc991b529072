//! Transport abstraction for the push channel.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between the client and the game hub. The hub protocol is JSON text
//! messages, so every transport implementation must handle message framing
//! internally (e.g. WebSocket frames, length-prefixed TCP).
//!
//! Because the hub reconnects on its own, connection setup lives in a
//! separate [`Connector`] factory: the hub asks it for a fresh transport on
//! every (re)connection attempt rather than being handed a single
//! already-connected instance.

use async_trait::async_trait;

use crate::error::ColorNodesError;

/// A bidirectional text message transport for the hub protocol.
///
/// Implementors shuttle serialized JSON strings between the client and the
/// server. Each call to [`send`](Transport::send) transmits one complete
/// JSON message; each call to [`recv`](Transport::recv) returns one.
///
/// # Object Safety
///
/// This trait is object-safe; the hub drives connections through
/// `Box<dyn Transport>` so the reconnect loop can swap transports in place.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose data. Channel-based implementations are
/// naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text message to the server.
    ///
    /// # Errors
    ///
    /// Returns [`ColorNodesError::TransportSend`] if the message could not
    /// be sent (connection broken, write buffer full).
    async fn send(&mut self, message: String) -> Result<(), ColorNodesError>;

    /// Receive the next JSON text message from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete message was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait docs](Transport)).
    async fn recv(&mut self) -> Option<Result<String, ColorNodesError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), ColorNodesError>;
}

#[async_trait]
impl Transport for Box<dyn Transport> {
    async fn send(&mut self, message: String) -> Result<(), ColorNodesError> {
        (**self).send(message).await
    }

    async fn recv(&mut self) -> Option<Result<String, ColorNodesError>> {
        (**self).recv().await
    }

    async fn close(&mut self) -> Result<(), ColorNodesError> {
        (**self).close().await
    }
}

/// Factory for transports, invoked on every connection attempt.
///
/// The hub holds one connector for the lifetime of the connection and calls
/// [`connect`](Connector::connect) for the initial `start()` as well as for
/// each automatic reconnection attempt after a transport drop.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a fresh transport.
    ///
    /// # Errors
    ///
    /// Returns whatever the underlying transport's connection setup
    /// produces; the hub folds it into its backoff/retry handling.
    async fn connect(&self) -> Result<Box<dyn Transport>, ColorNodesError>;
}
