//! The connection handle (component D/E): shared state plus the request
//! façade (`cmd`, `api`, `bgapi`, `event`, `sendevent`, `sendmsg`,
//! `call_execute`) layered over the raw multiplexer.
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::codec::{self, Event, Message};
use crate::config::OutboundOptions;
use crate::dispatcher::Dispatcher;
use crate::error::{self, Result};
use crate::executor::Exec;
use crate::proto::ConnHandle;
use crate::registry::{Handler, HandlerKey};
use crate::special_events::{self, SpecialEventTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Inbound,
    Outbound,
}

/// Options for [`Connection::call_execute`]: the channel to target, the
/// `event-uuid` correlating this execution's `CHANNEL_EXECUTE`/
/// `CHANNEL_EXECUTE_COMPLETE` events, and the self-removing handlers bound
/// to each.
#[derive(Clone, Default)]
pub struct CallExecuteOptions {
    chan_uuid: Option<String>,
    event_uuid: Option<String>,
    start_handler: Option<Handler>,
    end_handler: Option<Handler>,
    event_lock: bool,
    loops: u32,
}

impl CallExecuteOptions {
    pub fn new() -> CallExecuteOptions {
        CallExecuteOptions {
            loops: 1,
            ..CallExecuteOptions::default()
        }
    }

    /// Targets a specific channel by Unique-ID, for connections that
    /// control more than one leg (most outbound connections control only
    /// their own leg and don't need this).
    pub fn chan_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.chan_uuid = Some(uuid.into());
        self
    }

    /// Overrides the generated `event-uuid`. Rarely needed; the default
    /// is a fresh v4 UUID per call.
    pub fn event_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.event_uuid = Some(uuid.into());
        self
    }

    /// Sends `event-lock: true`, asking FreeSWITCH to run this application
    /// before any application queued after it on the same channel.
    pub fn event_lock(mut self, lock: bool) -> Self {
        self.event_lock = lock;
        self
    }

    /// Repeats the application this many times. Default 1 (no `loops`
    /// header sent).
    pub fn loops(mut self, loops: u32) -> Self {
        self.loops = loops;
        self
    }

    /// Binds `handler` to this execution's `CHANNEL_EXECUTE` event. Fires
    /// at most once, then unbinds itself.
    pub fn start_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.start_handler =
            Some(Arc::new(move |event| Box::pin(handler(event)) as Pin<Box<dyn Future<Output = ()> + Send>>));
        self
    }

    /// Binds `handler` to this execution's `CHANNEL_EXECUTE_COMPLETE`
    /// event. Fires at most once, then unbinds itself.
    pub fn end_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.end_handler =
            Some(Arc::new(move |event| Box::pin(handler(event)) as Pin<Box<dyn Future<Output = ()> + Send>>));
        self
    }
}

struct Inner {
    mode: Mode,
    conn: ConnHandle,
    dispatcher: Dispatcher,
    exec: Exec,
    resp_timeout: Duration,
    special_events: SpecialEventTracker,
    channel_data: Mutex<Option<HashMap<String, String>>>,
    disconnected: AtomicBool,
}

/// A handle to one ESL connection, inbound or outbound. Cheaply `Clone`d;
/// clones share the same underlying socket, handler registry, and state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    pub(crate) fn new(
        mode: Mode,
        conn: ConnHandle,
        dispatcher: Dispatcher,
        exec: Exec,
        resp_timeout: Duration,
    ) -> Connection {
        Connection {
            inner: Arc::new(Inner {
                mode,
                conn,
                dispatcher,
                exec,
                resp_timeout,
                special_events: SpecialEventTracker::new(),
                channel_data: Mutex::new(None),
                disconnected: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn set_channel_data(&self, data: HashMap<String, String>) {
        *self.inner.channel_data.lock().unwrap() = Some(data);
    }

    /// Channel metadata captured from the outbound `connect` handshake
    /// (`Unique-ID`, `Channel-State`, caller-id fields, …). `None` for
    /// inbound connections, or before an outbound handshake completes.
    pub fn channel_data(&self) -> Option<HashMap<String, String>> {
        self.inner.channel_data.lock().unwrap().clone()
    }

    /// A single channel-data header, looked up by exact name.
    pub fn channel_variable(&self, name: &str) -> Option<String> {
        self.inner
            .channel_data
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|m| m.get(name).cloned())
    }

    /// True once the connection has closed, locally or by the peer.
    pub fn is_closed(&self) -> bool {
        self.inner.conn.is_closed()
    }

    /// Closes the connection. Idempotent.
    pub fn close(&self) {
        self.inner.conn.close();
    }

    /// Arms the on-close callback configured on `InboundOptions`/
    /// `OutboundOptions`, if any. Called once, right after construction,
    /// by [`crate::inbound::connect`]/[`crate::outbound::listen`].
    pub(crate) fn arm_on_close(&self, f: crate::config::OnCloseFn) {
        let conn = self.clone();
        self.inner.conn.set_on_close(Box::new(move || f(&conn)));
    }

    /// Registers `handler` for events matching `key`, replacing any
    /// previous handler registered for that exact key. If `key` names a
    /// single special event (`LOG`, `BACKGROUND_JOB`,
    /// `CHANNEL_EXECUTE`/`_COMPLETE`, `CHANNEL_HANGUP`/`_COMPLETE`) that
    /// hasn't been subscribed to yet, a subscription is sent automatically.
    pub fn on<F, Fut>(&self, key: HandlerKey, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let wrapped: Handler = Arc::new(move |event| {
            Box::pin(handler(event)) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.inner.dispatcher.register(key.clone(), wrapped);

        if let Some(name) = key.single_event_name() {
            if special_events::is_special(name) && self.inner.special_events.enable(name) {
                let conn = self.clone();
                let name = name.to_owned();
                self.inner.exec.spawn(async move {
                    if let Err(e) = conn.event(&[&name]).await {
                        tracing::warn!(error = %e, event = %name, "failed to auto-subscribe to special event");
                    }
                });
            }
        }
    }

    /// Removes the handler registered for `key`, if any.
    pub fn unregister(&self, key: &HandlerKey) {
        self.inner.dispatcher.unregister(key);
    }

    /// Removes every registered event handler at once.
    pub fn clear_all_event_handlers(&self) {
        self.inner.dispatcher.clear_all();
    }

    async fn send_and_wait(&self, bytes: Vec<u8>) -> Result<Message> {
        let promise = self.inner.conn.send(bytes)?;
        match tokio::time::timeout(self.inner.resp_timeout, promise).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(error::closed()),
            Err(_) => {
                self.inner.conn.poison();
                Err(error::timeout())
            }
        }
    }

    /// Sends a raw command line (no headers, no body) and waits for the
    /// matching reply. The escape hatch underlying every other façade
    /// method; most callers want [`Connection::api`] or
    /// [`Connection::sendmsg`] instead.
    pub async fn cmd(&self, line: &str) -> Result<Message> {
        let trimmed = line.trim_start();
        if trimmed.is_empty() {
            return Err(error::argument("command line must not be empty"));
        }
        if let Some(verb) = reserved_verb(trimmed) {
            return Err(error::argument(format!(
                "{} must be sent through its dedicated method, not cmd()",
                verb
            )));
        }
        self.intercept_special_event_command(trimmed);
        self.send_and_wait(codec::encode_command(line)).await
    }

    /// Runs `command` synchronously on the FreeSWITCH core (`api`) and
    /// returns its `api/response`.
    pub async fn api(&self, command: &str) -> Result<Message> {
        self.cmd(&format!("api {}", command)).await
    }

    /// Runs `command` in the background (`bgapi`). Registers a handler for
    /// the matching `BACKGROUND_JOB` event, keyed by a locally generated
    /// `Job-UUID` header sent with the command, *before* the command is
    /// written — so the job cannot complete and deliver its event before a
    /// handler exists to receive it, however fast FreeSWITCH answers.
    pub async fn bgapi(&self, command: &str) -> Result<Event> {
        let job_uuid = Uuid::new_v4().to_string();
        let key = HandlerKey::new([("Event-Name", "BACKGROUND_JOB"), ("Job-UUID", job_uuid.as_str())]);

        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        self.inner.dispatcher.register(
            key.clone(),
            Arc::new(move |event| {
                let tx = tx.clone();
                Box::pin(async move {
                    if let Some(tx) = tx.lock().unwrap().take() {
                        let _ = tx.send(event);
                    }
                }) as Pin<Box<dyn Future<Output = ()> + Send>>
            }),
        );

        if let Err(e) = self.ensure_special_event("BACKGROUND_JOB").await {
            self.inner.dispatcher.unregister(&key);
            return Err(e);
        }

        let line = format!("bgapi {}", command);
        let bytes = codec::encode_with_headers(&line, &[("Job-UUID".to_owned(), job_uuid)]);
        let reply = match self.send_and_wait(bytes).await {
            Ok(reply) => reply,
            Err(e) => {
                self.inner.dispatcher.unregister(&key);
                return Err(e);
            }
        };

        if let Some(text) = reply.header("Reply-Text") {
            if text.starts_with("-ERR") {
                self.inner.dispatcher.unregister(&key);
                return Err(error::protocol(format!("bgapi rejected: {}", text)));
            }
        }

        let result = tokio::time::timeout(self.inner.resp_timeout, rx).await;
        self.inner.dispatcher.unregister(&key);
        match result {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => Err(error::closed()),
            Err(_) => {
                self.inner.conn.poison();
                Err(error::timeout())
            }
        }
    }

    /// Subscribes to the named events, in `plain` format (`event plain
    /// NAME NAME ...`).
    pub async fn event(&self, names: &[&str]) -> Result<Message> {
        if names.is_empty() {
            return Err(error::argument("event requires at least one event name"));
        }
        let line = format!("event plain {}", names.join(" "));
        self.cmd(&line).await
    }

    /// Injects a custom event into FreeSWITCH's event system
    /// (`sendevent <name>` plus headers).
    pub async fn sendevent(&self, event_name: &str, headers: &[(String, String)]) -> Result<Message> {
        let line = format!("sendevent {}", event_name);
        self.send_and_wait(codec::encode_with_headers(&line, headers)).await
    }

    /// Sends a `sendmsg` request with the given headers. The building
    /// block for call control in outbound mode; see
    /// [`Connection::call_execute`] for the common case.
    pub async fn sendmsg(&self, headers: &[(String, String)]) -> Result<Message> {
        self.send_and_wait(codec::encode_with_headers("sendmsg", headers)).await
    }

    /// Executes a dialplan application (`playback`, `bridge`, …) on the
    /// channel this outbound connection represents. `app_cmd` is split at
    /// its first whitespace into the application name and its argument
    /// string, the latter becoming the request body. `opts.start_handler`/
    /// `end_handler`, if given, are bound to this execution's matching
    /// `CHANNEL_EXECUTE`/`CHANNEL_EXECUTE_COMPLETE` event (auto-subscribing
    /// if needed) and unbind themselves once fired.
    pub async fn call_execute(&self, app_cmd: &str, opts: CallExecuteOptions) -> Result<Message> {
        let (app_name, app_arg) = match app_cmd.find(char::is_whitespace) {
            Some(idx) => (&app_cmd[..idx], app_cmd[idx..].trim_start()),
            None => (app_cmd, ""),
        };
        let event_uuid = opts.event_uuid.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

        let mut bound_keys = Vec::new();
        if let Some(handler) = opts.start_handler.clone() {
            if let Err(e) = self.ensure_special_event("CHANNEL_EXECUTE").await {
                return Err(e);
            }
            bound_keys.push(self.bind_call_execute_wrapper(
                "CHANNEL_EXECUTE",
                &event_uuid,
                opts.chan_uuid.as_deref(),
                handler,
            ));
        }
        if let Some(handler) = opts.end_handler.clone() {
            if let Err(e) = self.ensure_special_event("CHANNEL_EXECUTE_COMPLETE").await {
                for key in &bound_keys {
                    self.inner.dispatcher.unregister(key);
                }
                return Err(e);
            }
            bound_keys.push(self.bind_call_execute_wrapper(
                "CHANNEL_EXECUTE_COMPLETE",
                &event_uuid,
                opts.chan_uuid.as_deref(),
                handler,
            ));
        }

        let mut headers = vec![
            ("call-command".to_owned(), "execute".to_owned()),
            ("execute-app-name".to_owned(), app_name.to_owned()),
            ("event-uuid".to_owned(), event_uuid),
            ("content-type".to_owned(), "text/plain".to_owned()),
        ];
        if opts.event_lock {
            headers.push(("event-lock".to_owned(), "true".to_owned()));
        }
        if opts.loops > 1 {
            headers.push(("loops".to_owned(), opts.loops.to_string()));
        }

        let line = match opts.chan_uuid.as_deref() {
            Some(uuid) => format!("sendmsg {}", uuid),
            None => "sendmsg".to_owned(),
        };

        match self.send_and_wait(codec::encode_with_body(&line, &headers, app_arg)).await {
            Ok(msg) => Ok(msg),
            Err(e) => {
                for key in &bound_keys {
                    self.inner.dispatcher.unregister(key);
                }
                Err(e)
            }
        }
    }

    /// Binds `handler` keyed to one `call_execute` invocation's
    /// `CHANNEL_EXECUTE`/`CHANNEL_EXECUTE_COMPLETE` event (matched by
    /// `Application-UUID`, and `Unique-ID` when a specific channel is
    /// targeted), wrapped so it unbinds itself after firing once.
    fn bind_call_execute_wrapper(
        &self,
        event_name: &str,
        event_uuid: &str,
        chan_uuid: Option<&str>,
        handler: Handler,
    ) -> HandlerKey {
        let mut pairs = vec![
            ("Event-Name".to_owned(), event_name.to_owned()),
            ("Application-UUID".to_owned(), event_uuid.to_owned()),
        ];
        if let Some(uuid) = chan_uuid {
            pairs.push(("Unique-ID".to_owned(), uuid.to_owned()));
        }
        let key = HandlerKey::new(pairs);

        let dispatcher = self.inner.dispatcher.clone();
        let unregister_key = key.clone();
        let wrapped: Handler = Arc::new(move |event| {
            let handler = handler.clone();
            let dispatcher = dispatcher.clone();
            let unregister_key = unregister_key.clone();
            Box::pin(async move {
                handler(event).await;
                dispatcher.unregister(&unregister_key);
            }) as Pin<Box<dyn Future<Output = ()> + Send>>
        });
        self.inner.dispatcher.register(key.clone(), wrapped);
        key
    }

    async fn ensure_special_event(&self, name: &str) -> Result<()> {
        if self.inner.special_events.enable(name) {
            self.event(&[name]).await?;
        }
        Ok(())
    }

    /// Keeps [`SpecialEventTracker`] accurate for commands that change
    /// subscriptions but don't go through [`Connection::event`] — a caller
    /// who drops to raw `cmd` text (`"nixevent BACKGROUND_JOB"`,
    /// `"noevents"`, `"myevents"`) still leaves tracking correct, so a
    /// later `bgapi`/`on` doesn't skip a subscription that was actually
    /// torn down, or send a redundant one that's already covered.
    fn intercept_special_event_command(&self, line: &str) {
        let mut tokens = line.split_whitespace();
        let verb = match tokens.next() {
            Some(v) => v.to_ascii_lowercase(),
            None => return,
        };
        // Prefix-based, not exact: FreeSWITCH itself tolerates arbitrary
        // suffixes on these verbs (e.g. "noeventsplease"), so the intercept
        // has to match the same way it does.
        if verb.starts_with("noevents") {
            self.inner.special_events.clear();
        } else if verb.starts_with("myevents") {
            self.inner.special_events.enable_all();
        } else if verb.starts_with("nixevent") {
            for name in tokens {
                self.inner.special_events.disable(&name.to_ascii_uppercase());
            }
        } else if verb.starts_with("event") {
            let mut rest = tokens.peekable();
            if let Some(first) = rest.peek() {
                if first.eq_ignore_ascii_case("plain") || first.eq_ignore_ascii_case("xml") || first.eq_ignore_ascii_case("json") {
                    rest.next();
                }
            }
            for name in rest {
                let upper = name.to_ascii_uppercase();
                if special_events::is_special(&upper) {
                    self.inner.special_events.enable(&upper);
                }
            }
        }
    }

    /// Runs the outbound `connect`/`linger`/`myevents` handshake described
    /// by `opts`, returning the parsed channel data.
    pub(crate) async fn run_outbound_handshake(&self, opts: &OutboundOptions) -> Result<()> {
        let reply = self.cmd("connect").await?;
        let body = reply
            .body()
            .ok_or_else(|| error::protocol("connect reply carried no channel data"))?;
        let channel_data = codec::parse_header_lines(body)?;
        self.set_channel_data(channel_data);

        if opts.linger {
            self.cmd("linger").await?;
        }
        if opts.myevents {
            self.cmd("myevents").await?;
        }
        Ok(())
    }

    /// True once `disconnect` has already been sent (the request façade's
    /// on-close callback only fires once; this governs idempotency of
    /// `disconnect` itself).
    pub(crate) fn mark_disconnected(&self) -> bool {
        !self.inner.disconnected.swap(true, Ordering::AcqRel)
    }

    /// Sends `exit`, asking FreeSWITCH to close the socket from its side.
    pub async fn disconnect(&self) -> Result<()> {
        if self.mark_disconnected() {
            let _ = self.cmd("exit").await;
        }
        Ok(())
    }
}

/// If `line`'s first whitespace-delimited token (case-insensitively) names
/// one of the commands that carry their own headers and must go through a
/// dedicated method (`bgapi`, `sendmsg`, `sendevent`) instead of the raw
/// `cmd` escape hatch, returns that token as written.
fn reserved_verb(line: &str) -> Option<&'static str> {
    let lower = line.to_ascii_lowercase();
    ["bgapi", "sendmsg", "sendevent"].into_iter().find(|&verb| lower.starts_with(verb))
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("mode", &self.inner.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

