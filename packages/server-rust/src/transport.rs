//! Transport abstraction between a connection and its underlying session.
//!
//! The connection core is the sole writer: `send` is only called from the
//! connection's send loop, plus the single synchronous disconnect frame
//! written in `close` after the loop has exited.

use async_trait::async_trait;
use surge_core::DisconnectAdvice;

/// Errors surfaced by a transport implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The transport's write buffer is full.
    #[error("transport buffer full")]
    BufferFull,
    /// The underlying session is gone.
    #[error("transport closed")]
    Closed,
    /// Any other session-level failure.
    #[error("transport error: {0}")]
    Io(String),
}

/// A bidirectional client session owned by exactly one connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Short transport identifier, e.g. `"websocket"`.
    fn name(&self) -> &'static str;

    /// Writes one frame to the client.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the frame cannot be delivered;
    /// the connection closes itself in response.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Closes the session, conveying the disconnect advice where the
    /// transport supports out-of-band metadata. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the session teardown fails.
    async fn close(&self, advice: &DisconnectAdvice) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        fn name(&self) -> &'static str {
            "null"
        }

        async fn send(&self, _frame: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        async fn close(&self, _advice: &DisconnectAdvice) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn trait_is_object_safe() {
        let transport: Arc<dyn Transport> = Arc::new(NullTransport);
        assert_eq!(transport.name(), "null");
        assert!(transport.send(b"frame").await.is_ok());
        assert!(transport.close(&DisconnectAdvice::default()).await.is_ok());
    }
}
