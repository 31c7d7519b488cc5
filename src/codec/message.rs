//! Envelope framing: the header/blank-line/body shape shared by every ESL
//! message, independent of what the message actually means.
use bytes::{Buf, BytesMut};
use percent_encoding::percent_decode_str;

use crate::error::{self, Result};

/// A decoded ESL envelope: an ordered header list plus an optional body.
///
/// Header names are matched case-insensitively by [`Message::header`], but
/// the original casing is kept for anything that re-serializes a message
/// (logging, tests).
#[derive(Debug, Clone, Default)]
pub struct Message {
    headers: Vec<(String, String)>,
    body: Option<String>,
}

impl Message {
    pub(crate) fn new(headers: Vec<(String, String)>, body: Option<String>) -> Message {
        Message { headers, body }
    }

    /// Looks up a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All headers, in the order they appeared on the wire.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The message body, if a `Content-Length` body was attached.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub(crate) fn into_body(self) -> Option<String> {
        self.body
    }

    /// The `Content-Type` header, the tag that determines how the rest of
    /// this crate interprets the message.
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }
}

/// Decodes every complete envelope currently buffered in `buf`, advancing
/// `buf` past the bytes consumed. Returns an empty vec (not an error) when
/// the buffer holds an incomplete trailing envelope — the caller reads more
/// bytes and tries again.
pub fn decode_all(buf: &mut BytesMut) -> Result<Vec<Message>> {
    let mut messages = Vec::new();
    loop {
        match decode_one(buf)? {
            Some(msg) => messages.push(msg),
            None => break,
        }
    }
    Ok(messages)
}

pub(crate) fn decode_one(buf: &mut BytesMut) -> Result<Option<Message>> {
    let header_end = match find_double_newline(buf) {
        Some(idx) => idx,
        None => return Ok(None),
    };

    let header_block = &buf[..header_end];
    let header_text = std::str::from_utf8(header_block)
        .map_err(|e| error::protocol(format!("header block is not utf-8: {}", e)))?;
    let headers = parse_headers(header_text)?;

    let content_length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("Content-Length"))
        .map(|(_, v)| v.trim().parse::<usize>())
        .transpose()
        .map_err(|e| error::protocol(format!("invalid Content-Length: {}", e)))?;

    let body_start = header_end + 2;
    let total_len = match content_length {
        Some(len) => body_start + len,
        None => body_start,
    };

    if buf.len() < total_len {
        // Incomplete body; wait for more bytes.
        return Ok(None);
    }

    let body = match content_length {
        Some(len) => {
            let bytes = &buf[body_start..body_start + len];
            Some(
                std::str::from_utf8(bytes)
                    .map_err(|e| error::protocol(format!("body is not utf-8: {}", e)))?
                    .to_owned(),
            )
        }
        None => None,
    };

    buf.advance(total_len);
    Ok(Some(Message::new(headers, body)))
}

fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n")
}

fn parse_headers(block: &str) -> Result<Vec<(String, String)>> {
    let mut headers = Vec::new();
    for line in block.split('\n') {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let idx = line
            .find(':')
            .ok_or_else(|| error::protocol(format!("malformed header line: {:?}", line)))?;
        let name = line[..idx].trim().to_owned();
        let raw_value = line[idx + 1..].trim();
        let value = percent_decode_str(raw_value)
            .decode_utf8()
            .map(|cow| cow.into_owned())
            .unwrap_or_else(|_| raw_value.to_owned());
        headers.push((name, value));
    }
    Ok(headers)
}

/// Encodes a simple command line as an ESL request: a single line
/// terminated by a blank line, with no headers or body.
///
/// Used for `api`, `bgapi`, the raw `cmd` escape hatch, and the outbound
/// handshake commands (`connect`, `linger`, `myevents`).
pub fn encode_command(line: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(line.len() + 2);
    out.extend_from_slice(line.as_bytes());
    out.extend_from_slice(b"\n\n");
    out
}

/// Encodes a `sendmsg`/`sendevent`-style request: a command line, followed
/// by header lines, followed by the blank-line terminator.
pub fn encode_with_headers(line: &str, headers: &[(String, String)]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    write_headers(&mut out, headers);
    out.push(b'\n');
    out
}

/// Like [`encode_with_headers`], but appends `body` after the blank line,
/// preceded by a `content-length` header so FreeSWITCH knows where the
/// body ends. Used by `call-execute`'s `app-arg` payload.
pub fn encode_with_body(line: &str, headers: &[(String, String)], body: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(line.as_bytes());
    out.push(b'\n');
    write_headers(&mut out, headers);
    out.extend_from_slice(format!("content-length: {}\n", body.len()).as_bytes());
    out.push(b'\n');
    out.extend_from_slice(body.as_bytes());
    out
}

fn write_headers(out: &mut Vec<u8>, headers: &[(String, String)]) {
    for (k, v) in headers {
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(b": ");
        // Header values can't carry a literal newline without corrupting the
        // envelope's line framing; collapse any internal whitespace run
        // (including ones straddling a newline) to a single space.
        let normalized = v.split_whitespace().collect::<Vec<_>>().join(" ");
        out.extend_from_slice(normalized.as_bytes());
        out.push(b'\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_command_reply() {
        let mut buf = BytesMut::from("Content-Type: command/reply\nReply-Text: +OK\n\n");
        let msgs = decode_all(&mut buf).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content_type(), Some("command/reply"));
        assert_eq!(msgs[0].header("Reply-Text"), Some("+OK"));
        assert!(buf.is_empty());
    }

    #[test]
    fn waits_for_incomplete_body() {
        let mut buf = BytesMut::from("Content-Type: api/response\nContent-Length: 10\n\nhello");
        let msgs = decode_all(&mut buf).unwrap();
        assert!(msgs.is_empty());
        assert!(!buf.is_empty());
    }

    #[test]
    fn decodes_body_once_complete() {
        let mut buf = BytesMut::from("Content-Type: api/response\nContent-Length: 5\n\nhello");
        let msgs = decode_all(&mut buf).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].body(), Some("hello"));
        assert!(buf.is_empty());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let mut buf = BytesMut::from("content-type: command/reply\n\n");
        let msgs = decode_all(&mut buf).unwrap();
        assert_eq!(msgs[0].header("Content-Type"), Some("command/reply"));
    }

    #[test]
    fn decodes_two_pipelined_messages() {
        let mut buf = BytesMut::from(
            "Content-Type: command/reply\nReply-Text: +OK\n\nContent-Type: command/reply\nReply-Text: +OK\n\n",
        );
        let msgs = decode_all(&mut buf).unwrap();
        assert_eq!(msgs.len(), 2);
    }

    #[test]
    fn decodes_percent_encoded_values() {
        let mut buf = BytesMut::from("Unique-Id: abc%2Ddef\n\n");
        let msgs = decode_all(&mut buf).unwrap();
        assert_eq!(msgs[0].header("Unique-Id"), Some("abc-def"));
    }

    #[test]
    fn encode_with_headers_collapses_inline_newlines_in_values() {
        let bytes = encode_with_headers("sendmsg", &[("B".to_owned(), "hello  \n  world   \n \n".to_owned())]);
        let text = std::str::from_utf8(&bytes).unwrap();
        assert_eq!(text, "sendmsg\nB: hello world\n\n");
    }
}
