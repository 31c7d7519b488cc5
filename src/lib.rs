//! An async client and server for the FreeSWITCH [Event Socket Layer][esl]
//! (ESL): the line-oriented, envelope-framed text protocol FreeSWITCH uses
//! to be commanded and observed.
//!
//! ESL has two operating modes, both built on the same concurrent protocol
//! engine:
//!
//! - **Inbound**: dial FreeSWITCH, authenticate, then drive it with
//!   [`api`](Connection::api), [`bgapi`](Connection::bgapi), event
//!   subscriptions, and raw commands. See [`connect`].
//! - **Outbound**: run a TCP server that FreeSWITCH dials back into, once
//!   per call leg, handing your code a [`Connection`] already through the
//!   `connect`/`linger`/`myevents` handshake. See [`listen`].
//!
//! [esl]: https://freeswitch.org/confluence/display/FREESWITCH/Event+Socket+Library
#![deny(unsafe_code)]

pub mod codec;
mod config;
mod connection;
mod dispatcher;
pub mod error;
pub mod executor;
mod inbound;
mod outbound;
mod proto;
mod registry;
mod special_events;

pub use config::{
    AsyncThreadType, CustomInitFn, InboundOptions, OnCloseFn, OutboundHandler, OutboundOptions, PreInitFn,
};
pub use connection::{CallExecuteOptions, Connection};
pub use error::{Error, Result};
pub use inbound::connect;
pub use outbound::listen;
pub use registry::HandlerKey;
pub use special_events::SPECIAL_EVENT_NAMES;
