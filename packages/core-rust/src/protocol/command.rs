//! Inbound client commands and the frame decoder.
//!
//! A frame is UTF-8 JSON: either a single command object or an array of
//! command objects. The `params` payload stays opaque here; each handler
//! decodes it into its typed params struct.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClientError;

/// A framed command from a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientCommand {
    /// Correlation id, echoed back in the matching response.
    #[serde(default)]
    pub uid: String,
    /// Method verb. Kept as a string so an unknown verb surfaces as
    /// `MethodNotFound` at dispatch instead of a parse failure.
    pub method: String,
    /// Method-specific payload, decoded by the handler.
    #[serde(default)]
    pub params: Value,
}

/// Decodes an inbound frame into a command list.
///
/// A frame starting with `{` is a single command, `[` is a batch; anything
/// else is not a valid frame.
///
/// # Errors
///
/// Returns [`ClientError::InvalidMessage`] on malformed JSON or an
/// unrecognized leading byte.
pub fn commands_from_slice(frame: &[u8]) -> Result<Vec<ClientCommand>, ClientError> {
    match frame.first() {
        Some(&b'{') => {
            let cmd: ClientCommand =
                serde_json::from_slice(frame).map_err(|_| ClientError::InvalidMessage)?;
            Ok(vec![cmd])
        }
        Some(&b'[') => serde_json::from_slice(frame).map_err(|_| ClientError::InvalidMessage),
        _ => Err(ClientError::InvalidMessage),
    }
}

/// Params for the `connect` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    #[serde(default)]
    pub user: String,
    /// Decimal unix seconds, covered by the token signature.
    #[serde(default)]
    pub timestamp: String,
    /// Opaque JSON text surfaced in presence and published messages.
    #[serde(default)]
    pub info: String,
    /// HMAC token over `(user, timestamp, info)`.
    #[serde(default)]
    pub token: String,
    /// Enables idle-based close for transports without native ping.
    #[serde(default)]
    pub ping: bool,
}

/// Params for the `refresh` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshParams {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub info: String,
    #[serde(default)]
    pub token: String,
}

/// Params for the `subscribe` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeParams {
    pub channel: String,
    /// Connection uid; must match the subscribing connection on private
    /// channels.
    #[serde(default)]
    pub client: String,
    /// Opaque JSON text covered by the channel sign on private channels.
    #[serde(default)]
    pub info: String,
    /// HMAC sign over `(client, channel, info)` for private channels.
    #[serde(default)]
    pub sign: String,
    /// Requests backfill of messages missed since `last`.
    #[serde(default)]
    pub recover: bool,
    /// Uid of the last message the client has seen in the channel.
    #[serde(default)]
    pub last: String,
}

/// Params for the `unsubscribe` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeParams {
    pub channel: String,
}

/// Params for the `publish` command.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishParams {
    pub channel: String,
    #[serde(default)]
    pub data: Value,
}

/// Params for the `ping` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingParams {
    /// Echoed back in the response body when non-empty.
    #[serde(default)]
    pub data: String,
}

/// Params for the `presence` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceParams {
    pub channel: String,
}

/// Params for the `history` command.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub channel: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_object_decodes_to_one_command() {
        let frame = br#"{"uid":"1","method":"ping","params":{"data":"x"}}"#;
        let cmds = commands_from_slice(frame).unwrap();
        assert_eq!(cmds.len(), 1);
        assert_eq!(cmds[0].uid, "1");
        assert_eq!(cmds[0].method, "ping");
    }

    #[test]
    fn array_decodes_in_input_order() {
        let frame = br#"[{"uid":"a","method":"ping"},{"uid":"b","method":"ping"}]"#;
        let cmds = commands_from_slice(frame).unwrap();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].uid, "a");
        assert_eq!(cmds[1].uid, "b");
    }

    #[test]
    fn empty_array_decodes_to_empty_list() {
        let cmds = commands_from_slice(b"[]").unwrap();
        assert!(cmds.is_empty());
    }

    #[test]
    fn missing_params_defaults_to_null() {
        let cmds = commands_from_slice(br#"{"uid":"1","method":"ping"}"#).unwrap();
        assert_eq!(cmds[0].params, Value::Null);
    }

    #[test]
    fn non_json_prefix_is_invalid() {
        assert_eq!(
            commands_from_slice(b"hello"),
            Err(ClientError::InvalidMessage)
        );
        assert_eq!(commands_from_slice(b""), Err(ClientError::InvalidMessage));
    }

    #[test]
    fn malformed_json_is_invalid() {
        assert_eq!(
            commands_from_slice(b"{\"uid\":"),
            Err(ClientError::InvalidMessage)
        );
        assert_eq!(
            commands_from_slice(b"[{\"method\":}]"),
            Err(ClientError::InvalidMessage)
        );
    }

    #[test]
    fn connect_params_decode_with_defaults() {
        let params: ConnectParams = serde_json::from_str(r#"{"user":"u"}"#).unwrap();
        assert_eq!(params.user, "u");
        assert_eq!(params.timestamp, "");
        assert_eq!(params.token, "");
        assert!(!params.ping);
    }

    #[test]
    fn subscribe_params_require_channel() {
        let err = serde_json::from_str::<SubscribeParams>("{}");
        assert!(err.is_err());

        let params: SubscribeParams =
            serde_json::from_str(r#"{"channel":"news","recover":true,"last":"m1"}"#).unwrap();
        assert_eq!(params.channel, "news");
        assert!(params.recover);
        assert_eq!(params.last, "m1");
    }
}
