//! Client protocol: framed commands in, responses and channel messages out.

pub mod command;
pub mod message;
pub mod response;

// ---------------------------------------------------------------------------
// Re-exports — flat public API
// ---------------------------------------------------------------------------

// command
pub use command::{
    commands_from_slice, ClientCommand, ConnectParams, HistoryParams, PingParams, PresenceParams,
    PublishParams, RefreshParams, SubscribeParams, UnsubscribeParams,
};

// message
pub use message::{AdminMessage, ClientInfo, JoinMessage, LeaveMessage, Message, PresenceData};

// response
pub use response::{
    encode_replies, ConnectBody, DisconnectAdvice, DisconnectBody, HistoryBody, Method, PingBody,
    PresenceBody, PublishBody, Response, ResponseBody, ResponseError, SubscribeBody,
    UnsubscribeBody,
};
