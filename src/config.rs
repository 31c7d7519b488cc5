//! Connection configuration, built fluently in the style of hyper's
//! `client::conn::http1::Builder`.
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::connection::Connection;
use crate::executor::{Exec, ThreadPerConnection, TokioTask};

const DEFAULT_PORT: u16 = 8021;
const DEFAULT_RESP_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_INCOMING_BUFFER_SIZE: usize = 32;

/// Chooses how a connection's background work (the read/write loop and
/// dispatched event handlers) is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncThreadType {
    /// Cooperative `tokio::task`s on the ambient runtime. Appropriate when
    /// handlers don't block.
    Cooperative,
    /// A dedicated OS thread per connection, each running its own
    /// single-threaded runtime. Use this if handlers may block.
    PerConnection,
}

impl Default for AsyncThreadType {
    fn default() -> Self {
        AsyncThreadType::Cooperative
    }
}

impl AsyncThreadType {
    pub(crate) fn into_exec(self) -> Exec {
        match self {
            AsyncThreadType::Cooperative => Exec::Tokio(TokioTask),
            AsyncThreadType::PerConnection => Exec::ThreadPerConnection(ThreadPerConnection),
        }
    }
}

/// Options controlling an inbound (client) connection: where to dial, how
/// to authenticate, and how long to wait for replies.
#[derive(Clone)]
pub struct InboundOptions {
    pub(crate) host: String,
    pub(crate) port: u16,
    pub(crate) password: String,
    pub(crate) conn_timeout: Duration,
    pub(crate) resp_timeout: Duration,
    pub(crate) async_thread_type: AsyncThreadType,
    pub(crate) incoming_buffer_size: usize,
    pub(crate) on_close: Option<OnCloseFn>,
}

impl InboundOptions {
    /// Starts a builder for a connection to `host` on the default ESL port
    /// (8021), authenticating with `password`.
    pub fn new(host: impl Into<String>, password: impl Into<String>) -> InboundOptions {
        InboundOptions {
            host: host.into(),
            port: DEFAULT_PORT,
            password: password.into(),
            conn_timeout: Duration::from_secs(5),
            resp_timeout: DEFAULT_RESP_TIMEOUT,
            async_thread_type: AsyncThreadType::default(),
            incoming_buffer_size: DEFAULT_INCOMING_BUFFER_SIZE,
            on_close: None,
        }
    }

    /// Overrides the default ESL port (8021).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Overrides how long `connect` waits for the TCP handshake and the
    /// initial `auth/request`/`auth` exchange.
    pub fn conn_timeout(mut self, timeout: Duration) -> Self {
        self.conn_timeout = timeout;
        self
    }

    /// Overrides how long `api`/`bgapi`/`sendmsg`/etc. wait for a reply
    /// before poisoning the connection. Default 30 seconds.
    pub fn resp_timeout(mut self, timeout: Duration) -> Self {
        self.resp_timeout = timeout;
        self
    }

    pub fn async_thread_type(mut self, kind: AsyncThreadType) -> Self {
        self.async_thread_type = kind;
        self
    }

    /// Bounds how many parsed-but-undispatched events may queue up before
    /// the connection starts exerting back-pressure on its own read loop.
    pub fn incoming_buffer_size(mut self, size: usize) -> Self {
        self.incoming_buffer_size = size;
        self
    }

    /// Registers a callback invoked exactly once when the connection
    /// closes, locally or by the peer.
    pub fn on_close(mut self, f: OnCloseFn) -> Self {
        self.on_close = Some(f);
        self
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Invoked exactly once when a connection closes, locally or by the
/// peer. A panic inside it is caught and logged rather than taking
/// down the read/write loop task that fires it.
pub type OnCloseFn = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Runs once per accepted outbound connection, before the
/// `connect`/`linger`/`myevents` handshake completes, so handlers
/// registered here observe events that arrive mid-handshake.
pub type PreInitFn = Arc<dyn Fn(&Connection) + Send + Sync>;

/// Replaces the default outbound handshake (`connect`, optional `linger`,
/// optional `myevents`) with caller-provided logic.
pub type CustomInitFn = Arc<dyn Fn(Connection) -> BoxFuture<crate::error::Result<Connection>> + Send + Sync>;

/// The application handler invoked, after the handshake completes, with
/// the fully negotiated [`Connection`] for one FreeSWITCH call leg.
pub type OutboundHandler = Arc<dyn Fn(Connection) -> BoxFuture<()> + Send + Sync>;

/// Options controlling the outbound (server) listener.
#[derive(Clone)]
pub struct OutboundOptions {
    pub(crate) bind_addr: SocketAddr,
    pub(crate) resp_timeout: Duration,
    pub(crate) async_thread_type: AsyncThreadType,
    pub(crate) incoming_buffer_size: usize,
    pub(crate) linger: bool,
    pub(crate) myevents: bool,
    pub(crate) pre_init_fn: Option<PreInitFn>,
    pub(crate) custom_init_fn: Option<CustomInitFn>,
    pub(crate) on_close: Option<OnCloseFn>,
}

impl OutboundOptions {
    /// Starts a builder for a listener bound to `bind_addr`.
    pub fn new(bind_addr: SocketAddr) -> OutboundOptions {
        OutboundOptions {
            bind_addr,
            resp_timeout: DEFAULT_RESP_TIMEOUT,
            async_thread_type: AsyncThreadType::default(),
            incoming_buffer_size: DEFAULT_INCOMING_BUFFER_SIZE,
            linger: false,
            myevents: true,
            pre_init_fn: None,
            custom_init_fn: None,
            on_close: None,
        }
    }

    pub fn resp_timeout(mut self, timeout: Duration) -> Self {
        self.resp_timeout = timeout;
        self
    }

    pub fn async_thread_type(mut self, kind: AsyncThreadType) -> Self {
        self.async_thread_type = kind;
        self
    }

    pub fn incoming_buffer_size(mut self, size: usize) -> Self {
        self.incoming_buffer_size = size;
        self
    }

    /// Sends `linger` during the handshake, asking FreeSWITCH to keep the
    /// socket open (delivering `CHANNEL_HANGUP`/`CHANNEL_HANGUP_COMPLETE`)
    /// after the channel hangs up instead of closing immediately.
    pub fn linger(mut self, linger: bool) -> Self {
        self.linger = linger;
        self
    }

    /// Sends `myevents` during the handshake, subscribing to every event
    /// for this channel's Unique-ID without a separate `event` command.
    pub fn myevents(mut self, myevents: bool) -> Self {
        self.myevents = myevents;
        self
    }

    /// Registers a function that runs immediately after accept, before the
    /// handshake completes.
    pub fn pre_init_fn(mut self, f: PreInitFn) -> Self {
        self.pre_init_fn = Some(f);
        self
    }

    /// Overrides the default handshake entirely.
    pub fn custom_init_fn(mut self, f: CustomInitFn) -> Self {
        self.custom_init_fn = Some(f);
        self
    }

    /// Registers a callback invoked exactly once when a connection
    /// closes, locally or by the peer.
    pub fn on_close(mut self, f: OnCloseFn) -> Self {
        self.on_close = Some(f);
        self
    }
}
