//! The framing and parsing layer (component A): turning bytes on the wire
//! into [`Message`] envelopes, and envelope bodies into [`Event`]s.
mod event;
mod message;

pub use event::{parse_event, Event, EventFormat};
pub(crate) use event::parse_header_lines;
pub use message::{decode_all, encode_command, encode_with_body, encode_with_headers, Message};
pub(crate) use message::decode_one;
