//! Connection configuration for the Surge server.

use std::time::Duration;

/// Per-connection settings controlling auth, lifecycle, and backpressure.
///
/// Captured by a connection at creation; the queue and frame limits stay
/// fixed for the connection's lifetime even if the node reloads config.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long an unauthenticated connection may exist before it is
    /// closed as stale. Zero disables the stale timer.
    pub stale_connection_close_delay: Duration,
    /// Grace period added to the expiration deadline before an expired
    /// connection is actually closed.
    pub expired_connection_close_delay: Duration,
    /// Connection lifetime in seconds counted from the credential
    /// timestamp. Zero disables expiration entirely.
    pub conn_lifetime: i64,
    /// Interval between presence refresh ticks for subscribed channels.
    pub presence_ping_interval: Duration,
    /// Idle window after which a ping-enabled connection is closed.
    pub client_max_idle_timeout: Duration,
    /// Per-frame transport send timeout. Zero sends without a timeout.
    pub message_send_timeout: Duration,
    /// Initial capacity of the outbound frame queue.
    pub client_queue_initial_capacity: usize,
    /// Queue depth above which the connection is closed as slow.
    pub client_queue_max_size: usize,
    /// Maximum inbound frame size in bytes.
    pub client_request_max_size: usize,
    /// Maximum channel name length in bytes.
    pub max_channel_length: usize,
    /// Maximum number of channels one connection may subscribe to.
    pub client_channel_limit: usize,
    /// Maximum simultaneous connections per user. Zero means unlimited.
    pub user_connection_limit: usize,
    /// Shared secret for HMAC tokens and private-channel signs.
    pub secret: String,
    /// Skips token validation and connection expiration checks.
    pub insecure: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stale_connection_close_delay: Duration::from_secs(25),
            expired_connection_close_delay: Duration::from_secs(25),
            conn_lifetime: 0,
            presence_ping_interval: Duration::from_secs(25),
            client_max_idle_timeout: Duration::from_secs(60),
            message_send_timeout: Duration::ZERO,
            client_queue_initial_capacity: 2,
            client_queue_max_size: 1024,
            client_request_max_size: 65536,
            max_channel_length: 255,
            client_channel_limit: 100,
            user_connection_limit: 0,
            secret: String::new(),
            insecure: false,
        }
    }
}
