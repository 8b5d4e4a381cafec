//! Wire codec for the SOCKS5 messages defined in RFC 1928.
//!
//! Decoding is a pure function of one inbound buffer: every buffer the
//! transport delivers is expected to hold exactly one message.

mod addr;
mod command;
mod methods;
mod reply;
mod request;

pub use addr::Addr;
pub use addr::AddressType;
pub use addr::TargetAddr;
pub use addr::reply_bound_addr;
pub use command::Command;
pub use methods::AuthMethod;
pub use reply::Reply;
pub use request::{
    decode_command_request, decode_greeting, encode_auth_ack, encode_reply, CommandRequest,
    DecodeError, Greeting, AUTH_ACK_LEN, MAX_GREETING_LEN, MAX_REQUEST_LEN, REPLY_LEN,
};

pub const VERSION: u8 = 0x05;
pub const RESERVED: u8 = 0x00;
