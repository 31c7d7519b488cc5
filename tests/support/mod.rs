//! A scripted fake ESL peer used by the integration tests, so they don't
//! need a live FreeSWITCH instance. Grounded on hyper's `tests/support`
//! helpers: a thin wrapper around a loopback socket that the test drives
//! by hand, one frame at a time.
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct MockPeer {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl MockPeer {
    /// Binds an ephemeral port and returns it along with a task that
    /// resolves to the `MockPeer` once something connects — used to play
    /// the FreeSWITCH side of an *inbound* connection.
    pub async fn bind() -> (SocketAddr, tokio::task::JoinHandle<MockPeer>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            MockPeer {
                stream,
                buf: Vec::new(),
            }
        });
        (addr, handle)
    }

    /// Connects to `addr` — used to play the FreeSWITCH side of an
    /// *outbound* connection, which dials into our listener.
    pub async fn connect(addr: SocketAddr) -> MockPeer {
        let stream = TcpStream::connect(addr).await.unwrap();
        MockPeer {
            stream,
            buf: Vec::new(),
        }
    }

    pub async fn send_auth_request(&mut self) {
        self.raw_write("Content-Type: auth/request\n\n").await;
    }

    /// Reads one outgoing command envelope and returns its header block
    /// (trailing blank line stripped). If the headers carry a
    /// `Content-Length` (`call-execute`'s `app-arg` body), the body is
    /// read and discarded from the buffer too, so it doesn't get mistaken
    /// for the start of the next command.
    pub async fn read_command(&mut self) -> String {
        loop {
            if let Some(idx) = find_double_newline(&self.buf) {
                let block = String::from_utf8(self.buf[..idx].to_vec()).unwrap();
                let mut total = idx + 2;
                if let Some(len) = content_length(&block) {
                    total += len;
                    while self.buf.len() < total {
                        self.read_more().await;
                    }
                }
                self.buf.drain(..total);
                return block;
            }
            self.read_more().await;
        }
    }

    /// Reads directly off the socket, bypassing the envelope buffer.
    /// Returns `0` on EOF. Used to observe that the peer actually closed
    /// its side rather than leaving the socket half-open.
    pub async fn read_raw(&mut self, buf: &mut [u8]) -> usize {
        self.stream.read(buf).await.unwrap()
    }

    async fn read_more(&mut self) {
        let mut chunk = [0u8; 1024];
        let n = self.stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "peer closed unexpectedly while test awaited a command");
        self.buf.extend_from_slice(&chunk[..n]);
    }

    pub async fn reply_command(&mut self, reply_text: &str) {
        self.raw_write(&format!(
            "Content-Type: command/reply\nReply-Text: {}\n\n",
            reply_text
        ))
        .await;
    }

    pub async fn reply_command_with_body(&mut self, reply_text: &str, body: &str) {
        self.raw_write(&format!(
            "Content-Type: command/reply\nReply-Text: {}\nContent-Length: {}\n\n{}",
            reply_text,
            body.len(),
            body
        ))
        .await;
    }

    pub async fn reply_api(&mut self, body: &str) {
        self.raw_write(&format!(
            "Content-Type: api/response\nContent-Length: {}\n\n{}",
            body.len(),
            body
        ))
        .await;
    }

    pub async fn send_event_plain(&mut self, body: &str) {
        self.raw_write(&format!(
            "Content-Type: text/event-plain\nContent-Length: {}\n\n{}",
            body.len(),
            body
        ))
        .await;
    }

    async fn raw_write(&mut self, text: &str) {
        self.stream.write_all(text.as_bytes()).await.unwrap();
    }

    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn content_length(header_block: &str) -> Option<usize> {
    header_block.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim().eq_ignore_ascii_case("content-length").then(|| value.trim().parse().ok())?
    })
}
