//! Surge Core -- client protocol commands, responses, and channel messages.
//!
//! This crate provides the wire-facing foundation of the Surge pub/sub
//! server:
//!
//! - **Protocol** ([`protocol`]): framed client commands, typed responses,
//!   the single-vs-batch frame codec, and disconnect advice
//! - **Messages** ([`protocol::message`]): channel publications, presence
//!   info, and join/leave announcements
//! - **Errors** ([`error`]): the client error taxonomy shared by the
//!   dispatcher and the response bodies

pub mod error;
pub mod protocol;

// Errors
pub use error::{ClientError, ErrorAdvice};

// Protocol
pub use protocol::{
    commands_from_slice, encode_replies, AdminMessage, ClientCommand, ClientInfo, DisconnectAdvice,
    JoinMessage, LeaveMessage, Message, Method, PresenceData, Response, ResponseError,
};
