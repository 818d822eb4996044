//! Consumer traits for the process-wide pub/sub node.
//!
//! The connection core treats the node as an external collaborator: it
//! looks up channel options, registers connections and subscriptions,
//! manages presence and history, and publishes into channels. Concrete
//! nodes (in-process broker, clustered engine) implement [`Node`]; tests
//! use a mock.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surge_core::{AdminMessage, ClientInfo, JoinMessage, LeaveMessage, Message, PresenceData};

use crate::config::Config;
use crate::traits::ClientConn;

/// Per-channel policy flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelOptions {
    /// Track an ephemeral membership map for the channel.
    pub presence: bool,
    /// Broadcast join/leave announcements to subscribers.
    pub join_leave: bool,
    /// Keep history so clients can recover missed messages.
    pub recover: bool,
    /// Allow clients to publish into the channel directly.
    pub publish: bool,
    /// Mirror client publications to the admin channel.
    pub watch: bool,
    /// Allow subscriptions from unauthenticated-identity (empty user)
    /// connections.
    pub anonymous: bool,
}

/// Errors surfaced by node operations.
///
/// The `Display` text is client-visible when a node failure is attached
/// to a response body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NodeError {
    /// The channel does not map to any configured namespace.
    #[error("namespace not found")]
    NamespaceNotFound,
    /// The requested feature is disabled for the channel.
    #[error("not available")]
    NotAvailable,
    /// Engine or transport failure inside the node.
    #[error("internal server error")]
    Internal,
}

/// The process-wide pub/sub engine as seen by one client connection.
#[async_trait]
pub trait Node: Send + Sync {
    /// Server version string reported in connect responses.
    fn version(&self) -> String;

    /// Current connection configuration.
    fn config(&self) -> Arc<Config>;

    /// Optional veto hooks consulted on connect/subscribe/publish.
    fn mediator(&self) -> Option<Arc<dyn Mediator>>;

    /// Resolves channel options for a channel name.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::NamespaceNotFound`] for unknown namespaces.
    fn channel_opts(&self, channel: &str) -> Result<ChannelOptions, NodeError>;

    /// Number of live connections authenticated as `user`.
    fn user_connections(&self, user: &str) -> usize;

    /// Channel-level user ACL.
    fn user_allowed(&self, channel: &str, user: &str) -> bool;

    /// Channel-level client ACL.
    fn client_allowed(&self, channel: &str, client: &str) -> bool;

    /// Whether the channel requires a signed subscription.
    fn private_channel(&self, channel: &str) -> bool;

    /// Registers an authenticated connection in the client hub.
    async fn add_client_conn(
        &self,
        user: &str,
        conn: Arc<dyn ClientConn>,
    ) -> Result<(), NodeError>;

    /// Removes a connection from the client hub.
    async fn remove_client_conn(&self, user: &str, uid: &str) -> Result<(), NodeError>;

    /// Registers a channel subscription for a connection.
    async fn add_client_sub(&self, channel: &str, conn: Arc<dyn ClientConn>)
        -> Result<(), NodeError>;

    /// Removes a channel subscription.
    async fn remove_client_sub(&self, channel: &str, uid: &str) -> Result<(), NodeError>;

    /// Adds or refreshes presence info for a connection in a channel.
    async fn add_presence(
        &self,
        channel: &str,
        uid: &str,
        info: ClientInfo,
    ) -> Result<(), NodeError>;

    /// Drops presence info for a connection in a channel.
    async fn remove_presence(&self, channel: &str, uid: &str) -> Result<(), NodeError>;

    /// Current presence map for a channel.
    async fn presence(&self, channel: &str) -> Result<PresenceData, NodeError>;

    /// Channel history, newest first. Recovery relies on this order.
    async fn history(&self, channel: &str) -> Result<Vec<Message>, NodeError>;

    /// Uid of the newest message in the channel history, empty if none.
    async fn last_message_id(&self, channel: &str) -> Result<String, NodeError>;

    /// Publishes a message into its channel.
    async fn publish(&self, message: Message, opts: &ChannelOptions) -> Result<(), NodeError>;

    /// Publishes a join announcement.
    async fn publish_join(
        &self,
        message: JoinMessage,
        opts: &ChannelOptions,
    ) -> Result<(), NodeError>;

    /// Publishes a leave announcement.
    async fn publish_leave(
        &self,
        message: LeaveMessage,
        opts: &ChannelOptions,
    ) -> Result<(), NodeError>;

    /// Forwards an event to the admin channel.
    async fn publish_admin(&self, message: AdminMessage) -> Result<(), NodeError>;
}

/// Veto hooks allowing an embedding application to mediate the client
/// lifecycle. All hooks run under the connection's exclusive lock and
/// must not call back into the same connection.
pub trait Mediator: Send + Sync {
    /// Returning `false` rejects the connect with `PermissionDenied`.
    fn connect(&self, client: &str, user: &str) -> bool;

    /// Notified after a connection is fully closed.
    fn disconnect(&self, client: &str, user: &str);

    /// Returning `false` rejects the subscribe with `PermissionDenied`.
    fn subscribe(&self, channel: &str, client: &str, user: &str) -> bool;

    /// Notified after a channel subscription is removed.
    fn unsubscribe(&self, channel: &str, client: &str, user: &str);

    /// Returning `false` rejects a client publish with `PermissionDenied`.
    fn message(&self, channel: &str, data: &Value, client: &str, info: &ClientInfo) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_options_default_to_locked_down() {
        let opts = ChannelOptions::default();
        assert!(!opts.presence);
        assert!(!opts.join_leave);
        assert!(!opts.recover);
        assert!(!opts.publish);
        assert!(!opts.watch);
        assert!(!opts.anonymous);
    }

    #[test]
    fn channel_options_roundtrip() {
        let opts = ChannelOptions {
            presence: true,
            join_leave: true,
            recover: false,
            publish: true,
            watch: false,
            anonymous: true,
        };
        let text = serde_json::to_string(&opts).unwrap();
        assert!(text.contains("joinLeave"));
        let decoded: ChannelOptions = serde_json::from_str(&text).unwrap();
        assert_eq!(opts, decoded);
    }

    #[test]
    fn node_error_text_is_client_visible() {
        assert_eq!(NodeError::NamespaceNotFound.to_string(), "namespace not found");
        assert_eq!(NodeError::Internal.to_string(), "internal server error");
    }
}
