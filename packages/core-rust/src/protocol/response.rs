//! Outbound responses and the frame encoder.
//!
//! Every response carries the method tag, the correlation uid of the
//! command it answers, an optional per-command error, and a typed body. A
//! batch of N > 1 commands produces a JSON array of N responses in input
//! order; a single command produces the bare response object.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ErrorAdvice};
use crate::protocol::message::{Message, PresenceData};

/// Method tag on an outbound response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    Connect,
    Refresh,
    Subscribe,
    Unsubscribe,
    Publish,
    Ping,
    Presence,
    History,
    Disconnect,
}

/// Per-command error attached to a response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseError {
    pub reason: String,
    pub advice: ErrorAdvice,
}

impl ResponseError {
    #[must_use]
    pub fn new(err: impl fmt::Display, advice: ErrorAdvice) -> Self {
        Self {
            reason: err.to_string(),
            advice,
        }
    }
}

/// Body of the `connect` and `refresh` responses.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectBody {
    pub version: String,
    /// Connection uid, set once the connection is authenticated.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub client: String,
    /// Whether the server enforces a connection lifetime.
    pub expires: bool,
    /// The credentials were already expired; the client must reconnect
    /// with fresh ones.
    pub expired: bool,
    /// Connection lifetime in seconds when `expires` is set.
    pub ttl: i64,
}

/// Body of the `subscribe` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeBody {
    pub channel: String,
    pub status: bool,
    /// Uid of the newest channel message, returned when the channel is
    /// recoverable but the client did not ask for recovery.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub last: String,
    /// Backfilled messages, newest first.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub messages: Vec<Message>,
    /// Whether the backfill is known to be complete.
    pub recovered: bool,
}

/// Body of the `unsubscribe` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeBody {
    pub channel: String,
    pub status: bool,
}

/// Body of the `publish` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishBody {
    pub channel: String,
    pub status: bool,
}

/// Body of the `presence` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceBody {
    pub channel: String,
    #[serde(default)]
    pub data: PresenceData,
}

/// Body of the `history` response.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryBody {
    pub channel: String,
    #[serde(default)]
    pub data: Vec<Message>,
}

/// Body of the `ping` response.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingBody {
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub data: String,
}

/// Body of the `disconnect` frame pushed before closing a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectBody {
    pub reason: String,
    pub reconnect: bool,
}

/// Structured disconnect hint given to a client when its connection is
/// closed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisconnectAdvice {
    pub reason: String,
    pub reconnect: bool,
}

impl DisconnectAdvice {
    #[must_use]
    pub fn new(reason: impl Into<String>, reconnect: bool) -> Self {
        Self {
            reason: reason.into(),
            reconnect,
        }
    }
}

impl Default for DisconnectAdvice {
    /// The advice used when a connection is closed without a specific
    /// reason: reconnecting is allowed.
    fn default() -> Self {
        Self {
            reason: String::new(),
            reconnect: true,
        }
    }
}

/// Typed response bodies, serialized without an extra tag; the `method`
/// field on [`Response`] identifies the shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Connect(ConnectBody),
    Subscribe(SubscribeBody),
    Unsubscribe(UnsubscribeBody),
    Publish(PublishBody),
    Presence(PresenceBody),
    History(HistoryBody),
    Ping(PingBody),
    Disconnect(DisconnectBody),
}

/// A single outbound response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub uid: String,
    pub method: Method,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    pub body: ResponseBody,
}

impl Response {
    fn new(method: Method, body: ResponseBody) -> Self {
        Self {
            uid: String::new(),
            method,
            error: None,
            body,
        }
    }

    #[must_use]
    pub fn connect(body: ConnectBody) -> Self {
        Self::new(Method::Connect, ResponseBody::Connect(body))
    }

    /// Refresh answers with the same body shape as connect.
    #[must_use]
    pub fn refresh(body: ConnectBody) -> Self {
        Self::new(Method::Refresh, ResponseBody::Connect(body))
    }

    #[must_use]
    pub fn subscribe(body: SubscribeBody) -> Self {
        Self::new(Method::Subscribe, ResponseBody::Subscribe(body))
    }

    #[must_use]
    pub fn unsubscribe(body: UnsubscribeBody) -> Self {
        Self::new(Method::Unsubscribe, ResponseBody::Unsubscribe(body))
    }

    #[must_use]
    pub fn publish(body: PublishBody) -> Self {
        Self::new(Method::Publish, ResponseBody::Publish(body))
    }

    #[must_use]
    pub fn presence(body: PresenceBody) -> Self {
        Self::new(Method::Presence, ResponseBody::Presence(body))
    }

    #[must_use]
    pub fn history(body: HistoryBody) -> Self {
        Self::new(Method::History, ResponseBody::History(body))
    }

    #[must_use]
    pub fn ping(body: PingBody) -> Self {
        Self::new(Method::Ping, ResponseBody::Ping(body))
    }

    #[must_use]
    pub fn disconnect(advice: &DisconnectAdvice) -> Self {
        Self::new(
            Method::Disconnect,
            ResponseBody::Disconnect(DisconnectBody {
                reason: advice.reason.clone(),
                reconnect: advice.reconnect,
            }),
        )
    }

    /// Attaches a per-command error.
    pub fn set_err(&mut self, error: ResponseError) {
        self.error = Some(error);
    }

    /// Stamps the correlation uid of the command being answered.
    pub fn set_uid(&mut self, uid: impl Into<String>) {
        self.uid = uid.into();
    }
}

/// Encodes responses into an outbound frame: the bare object for a single
/// response, a JSON array otherwise.
///
/// # Errors
///
/// Returns [`ClientError::InvalidMessage`] if serialization fails.
pub fn encode_replies(replies: &[Response]) -> Result<Vec<u8>, ClientError> {
    let encoded = if replies.len() == 1 {
        serde_json::to_vec(&replies[0])
    } else {
        serde_json::to_vec(replies)
    };
    encoded.map_err(|_| ClientError::InvalidMessage)
}
