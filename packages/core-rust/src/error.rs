//! Client protocol error taxonomy.
//!
//! These errors travel two ways: connection-fatal kinds bubble out of the
//! dispatcher and close the connection with the error text as the
//! disconnect reason, while per-command kinds are attached to the response
//! body so the client can react without losing the connection.

use serde::{Deserialize, Serialize};

/// Error kinds returned by command handlers and the connection core.
///
/// The `Display` text is the wire-visible reason string, so variants render
/// as short lowercase phrases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Empty, oversized, or unparseable frame, or a missing required field.
    #[error("invalid message")]
    InvalidMessage,
    /// Unknown command method.
    #[error("method not found")]
    MethodNotFound,
    /// A non-connect command arrived before a successful connect.
    #[error("unauthorized")]
    Unauthorized,
    /// HMAC token or channel sign mismatch.
    #[error("invalid token")]
    InvalidToken,
    /// ACL, mediator veto, or private-channel sign failure.
    #[error("permission denied")]
    PermissionDenied,
    /// Channel count, user connection count, name length, or frame size
    /// over the configured limit.
    #[error("limit exceeded")]
    LimitExceeded,
    /// Duplicate subscribe to a channel.
    #[error("already subscribed")]
    AlreadySubscribed,
    /// Operation on a connection that has already been closed.
    #[error("client is closed")]
    ClientClosed,
    /// Transport send exceeded the configured timeout.
    #[error("send timeout")]
    SendTimeout,
    /// Node failure during subscribe or publish.
    #[error("internal server error")]
    InternalServerError,
}

/// Client advice attached to per-command error responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorAdvice {
    /// The request itself is wrong; retrying unchanged will not help.
    Fix,
    /// Transient failure; the same request may succeed later.
    Retry,
    /// No actionable advice.
    None,
}
