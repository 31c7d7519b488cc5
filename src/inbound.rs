//! Inbound mode: dial FreeSWITCH and authenticate (component D, inbound
//! half). Grounded on hyper's `client::conn::http1::handshake`, which also
//! runs a request/reply exchange over a freshly connected socket before
//! handing a live connection back to the caller.
use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::codec::{self, Message};
use crate::config::InboundOptions;
use crate::connection::{Connection, Mode};
use crate::dispatcher::Dispatcher;
use crate::error::{self, Result};
use crate::proto;

/// Dials FreeSWITCH and completes the `auth/request` → `auth <password>`
/// handshake, returning a live [`Connection`] once FreeSWITCH accepts it.
pub async fn connect(opts: InboundOptions) -> Result<Connection> {
    let addr = (opts.host.as_str(), opts.port);
    let stream = match tokio::time::timeout(opts.conn_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(error::timeout()),
    };
    stream.set_nodelay(true).ok();

    let mut buf = BytesMut::with_capacity(1024);

    let auth_request = match tokio::time::timeout(opts.conn_timeout, read_one(&stream, &mut buf)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(_)) => return Err(error::auth_failure()),
        Err(_) => return Err(error::timeout()),
    };
    if auth_request.content_type() != Some("auth/request") {
        return Err(error::protocol(format!(
            "expected auth/request as the first message, got {:?}",
            auth_request.content_type()
        )));
    }

    let line = format!("auth {}", opts.password);
    match tokio::time::timeout(opts.conn_timeout, (&stream).write_all(&codec::encode_command(&line))).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => return Err(error::timeout()),
    }

    let auth_reply = match tokio::time::timeout(opts.conn_timeout, read_one(&stream, &mut buf)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(_)) => return Err(error::auth_failure()),
        Err(_) => return Err(error::timeout()),
    };

    match auth_reply.header("Reply-Text") {
        Some(text) if text.starts_with("+OK") => {}
        Some(text) => return Err(error::auth_rejected_with(text)),
        None => return Err(error::protocol("auth reply carried no Reply-Text")),
    }

    tracing::info!(host = %opts.host, port = opts.port, "authenticated inbound connection");

    let exec = opts.async_thread_type.into_exec();
    let (events_tx, events_rx) = mpsc::channel(opts.incoming_buffer_size.max(1));
    let dispatcher = Dispatcher::new();

    let conn = proto::spawn_with_buf(stream, &exec, events_tx, None, buf);
    exec.spawn(dispatcher.clone().run(events_rx));

    let connection = Connection::new(Mode::Inbound, conn, dispatcher, exec, opts.resp_timeout);
    if let Some(on_close) = opts.on_close {
        connection.arm_on_close(on_close);
    }
    Ok(connection)
}

/// Reads off the raw socket until exactly one complete envelope is
/// available, leaving any further bytes in `buf` for the multiplexer to
/// pick up once it starts. Used only for the two unsolicited/solicited
/// messages exchanged before the multiplexer exists.
async fn read_one(stream: &TcpStream, buf: &mut BytesMut) -> Result<Message> {
    use tokio::io::AsyncReadExt;
    loop {
        if let Some(msg) = codec::decode_one(buf)? {
            return Ok(msg);
        }
        match stream.read_buf(buf).await? {
            0 => return Err(error::closed()),
            _ => continue,
        }
    }
}
