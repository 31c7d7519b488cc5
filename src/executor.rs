//! Executor abstraction used to run per-connection background tasks.
//!
//! Mirrors hyper's `rt::Executor`: the library never spawns onto a runtime
//! directly, it hands futures to whatever was configured so callers can
//! choose a dedicated OS thread per connection versus a lightweight task on
//! a shared pool (the `async-thread-type` configuration knob).
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Runs futures to completion. Implement this to plug in a runtime other
/// than the default Tokio multi-threaded executor.
pub trait Executor {
    /// Place the future onto the executor to be run.
    fn execute(&self, fut: BoxFuture);
}

/// Spawns each future as its own `tokio::task`, scheduled cooperatively on
/// the ambient Tokio runtime.
#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTask;

impl Executor for TokioTask {
    fn execute(&self, fut: BoxFuture) {
        tokio::spawn(fut);
    }
}

/// Runs each future on its own dedicated OS thread, inside a fresh
/// single-threaded Tokio runtime. Useful when a handler may block.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadPerConnection;

impl Executor for ThreadPerConnection {
    fn execute(&self, fut: BoxFuture) {
        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("failed to start per-connection runtime");
            rt.block_on(fut);
        });
    }
}

#[derive(Clone)]
pub(crate) enum Exec {
    Tokio(TokioTask),
    ThreadPerConnection(ThreadPerConnection),
    Custom(Arc<dyn Executor + Send + Sync>),
}

impl Exec {
    pub(crate) fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match self {
            Exec::Tokio(e) => e.execute(Box::pin(fut)),
            Exec::ThreadPerConnection(e) => e.execute(Box::pin(fut)),
            Exec::Custom(e) => e.execute(Box::pin(fut)),
        }
    }
}

impl Default for Exec {
    fn default() -> Exec {
        Exec::Tokio(TokioTask)
    }
}

impl std::fmt::Debug for Exec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Exec")
    }
}
