//! The I/O multiplexer (component B): framing is handled by [`crate::codec`],
//! this module owns the socket and the FIFO correlation between requests
//! and replies.
mod conn;
mod dispatch;

pub(crate) use conn::{spawn, spawn_with_buf, ConnHandle, OnClose};
