//! Outbound mode: accept FreeSWITCH-initiated connections and run the
//! `connect`/`linger`/`myevents` handshake before handing the channel to
//! application code (component F). Grounded on hyper's `server::server`
//! accept loop, simplified to a flat `TcpListener::accept` loop since this
//! crate only ever serves one bespoke protocol over plain TCP.
use futures_util::FutureExt;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::OutboundOptions;
use crate::connection::{Connection, Mode};
use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::proto;

/// Binds `opts.bind_addr` and accepts connections until the process is
/// stopped. Each accepted socket gets its own task: `pre_init_fn` (if set)
/// runs immediately, then the handshake, then `handler`.
pub async fn listen<F, Fut>(opts: OutboundOptions, handler: F) -> Result<()>
where
    F: Fn(Connection) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(opts.bind_addr).await?;
    tracing::info!(addr = %opts.bind_addr, "outbound listener bound");

    let handler = std::sync::Arc::new(handler);

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                continue;
            }
        };
        stream.set_nodelay(true).ok();

        let opts = opts.clone();
        let handler = handler.clone();
        let exec = opts.async_thread_type.into_exec();
        let spawn_exec = exec.clone();

        spawn_exec.spawn(async move {
            tracing::debug!(%peer, "accepted outbound connection");

            let (events_tx, events_rx) = mpsc::channel(opts.incoming_buffer_size.max(1));
            let dispatcher = Dispatcher::new();
            let conn = proto::spawn(stream, &exec, events_tx, None);
            let connection = Connection::new(Mode::Outbound, conn, dispatcher.clone(), exec.clone(), opts.resp_timeout);
            if let Some(on_close) = &opts.on_close {
                connection.arm_on_close(on_close.clone());
            }
            exec.spawn(dispatcher.run(events_rx));

            if let Some(pre_init) = &opts.pre_init_fn {
                pre_init(&connection);
            }

            let handshake_result = match &opts.custom_init_fn {
                Some(custom) => custom(connection.clone()).await,
                None => connection.run_outbound_handshake(&opts).await.map(|_| connection.clone()),
            };

            let connection = match handshake_result {
                Ok(connection) => connection,
                Err(e) => {
                    tracing::warn!(error = %e, %peer, "outbound handshake failed");
                    connection.close();
                    return;
                }
            };

            let handler_fut = handler(connection.clone());
            if std::panic::AssertUnwindSafe(handler_fut).catch_unwind().await.is_err() {
                tracing::warn!(%peer, "outbound handler panicked");
            }
            connection.close();
        });
    }
}
