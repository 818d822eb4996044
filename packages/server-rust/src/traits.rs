//! Connection surface consumed by the node and the hub.

use async_trait::async_trait;
use bytes::Bytes;
use surge_core::{ClientError, DisconnectAdvice};

/// What the node sees of a client connection: enough to deliver frames,
/// detach it from channels, and shut it down.
#[async_trait]
pub trait ClientConn: Send + Sync {
    /// Connection uid, stable for the connection's lifetime.
    fn uid(&self) -> &str;

    /// Channels the connection is currently subscribed to.
    async fn channels(&self) -> Vec<String>;

    /// Enqueues a frame for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::ClientClosed`] when the connection is closed
    /// or its queue depth tripped the slow-client limit.
    fn send(&self, frame: Bytes) -> Result<(), ClientError>;

    /// Unsubscribes the connection from a channel, pushing the same
    /// response frame an in-band unsubscribe command would produce.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] if the unsubscribe handler or the
    /// response delivery fails.
    async fn unsubscribe(&self, channel: &str) -> Result<(), ClientError>;

    /// Closes the connection. Idempotent.
    async fn close(&self, advice: Option<DisconnectAdvice>);
}
