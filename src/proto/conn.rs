//! The per-connection I/O multiplexer (component B): a reader task and a
//! writer task sharing one socket, one FIFO queue of outstanding request
//! callbacks, and one channel of parsed events.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::codec::{self, Event, EventFormat, Message};
use crate::error::{self, Result};
use crate::executor::Exec;
use crate::proto::dispatch;

pub(crate) type OnClose = Box<dyn FnOnce() + Send>;

struct Shared {
    stream: TcpStream,
    fifo: Mutex<VecDeque<dispatch::Callback<Message>>>,
    events_tx: mpsc::Sender<Event>,
    closed: AtomicBool,
    on_close: Mutex<Option<OnClose>>,
}

impl Shared {
    /// Idempotent: only the first caller (reader exiting or writer
    /// exiting, whichever loses the race) drains the FIFO and fires the
    /// close callback.
    fn close(self: &Arc<Self>) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
        let mut fifo = self.fifo.lock().unwrap();
        while let Some(cb) = fifo.pop_front() {
            dispatch::fulfil_closed(cb);
        }
        drop(fifo);
        if let Some(on_close) = self.on_close.lock().unwrap().take() {
            if std::panic::catch_unwind(std::panic::AssertUnwindSafe(on_close)).is_err() {
                tracing::warn!("on-close callback panicked");
            }
        }
    }

    /// Dispatches one decoded envelope. Event bodies are handed to the
    /// bounded event channel with a blocking `send`, so a dispatcher that
    /// falls behind applies back-pressure straight onto this read loop
    /// instead of an ever-growing queue of undelivered events.
    async fn dispatch_incoming(self: &Arc<Self>, msg: Message) {
        let content_type = msg.content_type().unwrap_or("").to_owned();

        if let Some(format) = EventFormat::from_content_type(&content_type) {
            match msg.body() {
                Some(body) => match codec::parse_event(body, format) {
                    Ok(event) => {
                        let _ = self.events_tx.send(event).await;
                    }
                    Err(e) => tracing::warn!(error = %e, "failed to parse event body"),
                },
                None => tracing::warn!("event message carried no body"),
            }
            return;
        }

        if content_type == "text/disconnect-notice" || content_type == "text/rude-rejection" {
            tracing::info!(content_type = %content_type, "peer signaled disconnect");
            return;
        }

        // command/reply and api/response correlate with the oldest
        // outstanding request; anything else we don't recognize still
        // gets matched the same way, since FreeSWITCH never sends an
        // unsolicited reply-shaped message outside of auth/request (handled
        // before the multiplexer starts) and events (handled above).
        match self.fifo.lock().unwrap().pop_front() {
            Some(cb) => dispatch::fulfil(cb, Ok(msg)),
            None => tracing::warn!(
                content_type = %content_type,
                "received a reply with no outstanding request"
            ),
        }
    }
}

/// A handle to a running connection's multiplexer: send requests, observe
/// whether it has closed, or poison it after a timeout so no further
/// requests are accepted.
pub(crate) struct ConnHandle {
    shared: Arc<Shared>,
    dispatch_tx: dispatch::Sender<Vec<u8>, Message>,
    poisoned: Arc<AtomicBool>,
}

impl ConnHandle {
    /// Enqueues `bytes` to be written and returns a promise for the
    /// matching reply. Fails immediately without writing anything if the
    /// connection is closed or has been poisoned by a prior timeout.
    pub(crate) fn send(&self, bytes: Vec<u8>) -> Result<dispatch::Promise<Message>> {
        if self.poisoned.load(Ordering::Acquire) {
            return Err(error::closed());
        }
        self.dispatch_tx.send(bytes).map_err(|_| error::closed())
    }

    /// Marks the connection poisoned: every future `send` fails without
    /// writing. Used after a `sendSync` timeout, since we can no longer
    /// trust that the byte stream's framing is still aligned with replies.
    pub(crate) fn poison(&self) {
        self.poisoned.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close(&self) {
        self.shared.close();
    }

    /// Arms the on-close callback. Must be called before the connection
    /// actually closes to take effect; harmless (silently dropped) if
    /// called after `close()` already ran.
    pub(crate) fn set_on_close(&self, cb: OnClose) {
        *self.shared.on_close.lock().unwrap() = Some(cb);
    }
}

/// Spawns the reader and writer tasks for `stream` and returns a handle to
/// them. Parsed events are forwarded to `events_tx`; `on_close` runs
/// exactly once, whichever task notices the connection end first.
pub(crate) fn spawn(
    stream: TcpStream,
    exec: &Exec,
    events_tx: mpsc::Sender<Event>,
    on_close: Option<OnClose>,
) -> ConnHandle {
    spawn_with_buf(stream, exec, events_tx, on_close, BytesMut::with_capacity(8 * 1024))
}

/// Like [`spawn`], but seeds the reader with bytes already read off the
/// socket (e.g. leftover bytes buffered while consuming the inbound
/// `auth/request` preamble by hand, before the multiplexer existed).
pub(crate) fn spawn_with_buf(
    stream: TcpStream,
    exec: &Exec,
    events_tx: mpsc::Sender<Event>,
    on_close: Option<OnClose>,
    initial_buf: BytesMut,
) -> ConnHandle {
    let (dispatch_tx, dispatch_rx) = dispatch::channel();
    let shared = Arc::new(Shared {
        stream,
        fifo: Mutex::new(VecDeque::new()),
        events_tx,
        closed: AtomicBool::new(false),
        on_close: Mutex::new(on_close),
    });

    exec.spawn(read_loop(shared.clone(), initial_buf));
    exec.spawn(write_loop(shared.clone(), dispatch_rx));

    ConnHandle {
        shared,
        dispatch_tx,
        poisoned: Arc::new(AtomicBool::new(false)),
    }
}

async fn read_loop(shared: Arc<Shared>, mut buf: BytesMut) {
    match codec::decode_all(&mut buf) {
        Ok(messages) => {
            for msg in messages {
                shared.dispatch_incoming(msg).await;
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "malformed frame in carried-over buffer, closing connection");
            shared.close();
            return;
        }
    }

    loop {
        match (&shared.stream).read_buf(&mut buf).await {
            Ok(0) => {
                tracing::debug!("connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(error = %e, "read error");
                break;
            }
        }

        match codec::decode_all(&mut buf) {
            Ok(messages) => {
                for msg in messages {
                    shared.dispatch_incoming(msg).await;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "malformed frame, closing connection");
                break;
            }
        }
    }
    shared.close();
}

async fn write_loop(shared: Arc<Shared>, mut rx: dispatch::Receiver<Vec<u8>, Message>) {
    loop {
        match rx.recv().await {
            Some((bytes, cb)) => {
                // Register the callback before writing: the peer's reply
                // can only be read after the bytes leave this process, so
                // the FIFO position is already fixed, but registering
                // first keeps the write and the enqueue atomic with
                // respect to the reader task regardless of scheduling.
                shared.fifo.lock().unwrap().push_back(cb);
                if let Err(e) = (&shared.stream).write_all(&bytes).await {
                    tracing::debug!(error = %e, "write error");
                    break;
                }
            }
            None => break,
        }
    }
    shared.close();
}
