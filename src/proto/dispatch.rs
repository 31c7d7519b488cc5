//! A generic, FIFO-by-construction request/response queue.
//!
//! Grounded on hyper's `client::dispatch` module: a single channel carries
//! `(value, callback)` pairs, so "enqueue a request" and "get back a slot
//! that will eventually hold the response" are one atomic operation. The
//! connection's write loop drains this channel in order and appends each
//! callback to its own FIFO queue as it writes the matching bytes, which is
//! exactly what gives the multiplexer its response-ordering guarantee
//! without any extra locking on the send side.
use tokio::sync::{mpsc, oneshot};

use crate::error::{self, Result};

pub(crate) type Callback<U> = oneshot::Sender<Result<U>>;
pub(crate) type Promise<U> = oneshot::Receiver<Result<U>>;

pub(crate) fn channel<T, U>() -> (Sender<T, U>, Receiver<T, U>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Sender { inner: tx }, Receiver { inner: rx })
}

pub(crate) struct Sender<T, U> {
    inner: mpsc::UnboundedSender<(T, Callback<U>)>,
}

impl<T, U> Sender<T, U> {
    /// Enqueues `val` and returns a promise for its eventual response. The
    /// enqueue and the allocation of the response slot happen together, so
    /// two concurrent callers can never race each other into the wrong
    /// order: whichever call to `send` returns its promise first is
    /// guaranteed to have enqueued first.
    pub(crate) fn send(&self, val: T) -> std::result::Result<Promise<U>, T> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .send((val, tx))
            .map(move |_| rx)
            .map_err(|e| e.0 .0)
    }
}

impl<T, U> Clone for Sender<T, U> {
    fn clone(&self) -> Self {
        Sender {
            inner: self.inner.clone(),
        }
    }
}

pub(crate) struct Receiver<T, U> {
    inner: mpsc::UnboundedReceiver<(T, Callback<U>)>,
}

impl<T, U> Receiver<T, U> {
    pub(crate) async fn recv(&mut self) -> Option<(T, Callback<U>)> {
        self.inner.recv().await
    }
}

/// Fulfils a callback, swallowing the error if the caller already gave up
/// waiting (dropped its `Promise`).
pub(crate) fn fulfil<U>(cb: Callback<U>, val: Result<U>) {
    let _ = cb.send(val);
}

pub(crate) fn fulfil_closed<U>(cb: Callback<U>) {
    let _ = cb.send(Err(error::closed()));
}
