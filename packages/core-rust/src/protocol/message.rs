//! Channel messages broadcast to subscribers.
//!
//! [`Message`] is a client publication, [`JoinMessage`]/[`LeaveMessage`]
//! announce membership changes on channels with join/leave enabled, and
//! [`AdminMessage`] carries watched publications to the admin channel.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of a connection as seen by other channel members.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    /// User id the connection authenticated as; empty for anonymous.
    pub user: String,
    /// Connection uid.
    pub client: String,
    /// Info payload supplied at connect.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default_info: Option<Value>,
    /// Per-channel info payload supplied with a private-channel subscribe.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub channel_info: Option<Value>,
}

impl ClientInfo {
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        client: impl Into<String>,
        default_info: Option<Value>,
        channel_info: Option<Value>,
    ) -> Self {
        Self {
            user: user.into(),
            client: client.into(),
            default_info,
            channel_info,
        }
    }
}

/// Per-channel presence map keyed by connection uid.
pub type PresenceData = HashMap<String, ClientInfo>;

/// A message published into a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message id.
    pub uid: String,
    /// Unix milliseconds at publication.
    pub timestamp: u64,
    pub channel: String,
    pub data: Value,
    /// Uid of the publishing connection, when published by a client.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub client: Option<String>,
    /// Publisher identity, when published by a client.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub info: Option<ClientInfo>,
}

impl Message {
    /// Creates a message with a fresh uid and the current timestamp.
    #[must_use]
    pub fn new(
        channel: impl Into<String>,
        data: Value,
        client: Option<String>,
        info: Option<ClientInfo>,
    ) -> Self {
        Self {
            uid: Uuid::new_v4().to_string(),
            timestamp: unix_millis(),
            channel: channel.into(),
            data,
            client,
            info,
        }
    }
}

/// Announces a connection joining a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub channel: String,
    pub data: ClientInfo,
}

/// Announces a connection leaving a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveMessage {
    pub channel: String,
    pub data: ClientInfo,
}

/// A message forwarded to the admin channel for watched channels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessage {
    /// Kind of event, e.g. `"message"` for a watched publication.
    pub op: String,
    pub data: Value,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
