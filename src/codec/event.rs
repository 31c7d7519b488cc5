//! Parsing of event payloads, which are carried inside the body of a
//! `text/event-plain`, `text/event-json`, or `text/event-xml` message.
//!
//! FreeSWITCH lets the caller pick the serialization with the `event plain`
//! / `event json` / `event xml` subscription command; all three carry the
//! same logical header set, just framed differently.
use std::collections::HashMap;

use percent_encoding::percent_decode_str;

use crate::error::{self, Result};

/// A FreeSWITCH event: a normalized header map plus an optional free-form
/// body (used by events such as `CHANNEL_EXECUTE` that carry dialplan
/// application data after the header block).
#[derive(Debug, Clone, Default)]
pub struct Event {
    headers: HashMap<String, String>,
    body: Option<String>,
}

impl Event {
    /// The value of `Event-Name`, the header every real event carries.
    pub fn name(&self) -> Option<&str> {
        self.header("Event-Name")
    }

    /// Looks up a header. Header names are normalized to their original
    /// FreeSWITCH casing (e.g. `Event-Name`, `Unique-ID`), so lookups are
    /// exact-match; callers that need case-insensitivity should upper-case
    /// both sides.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(|v| v.as_str())
    }

    /// All headers carried by the event.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// The event body, when present.
    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }
}

/// Which wire serialization an event's body is framed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFormat {
    Plain,
    Json,
    Xml,
}

impl EventFormat {
    pub(crate) fn from_content_type(content_type: &str) -> Option<EventFormat> {
        match content_type {
            "text/event-plain" => Some(EventFormat::Plain),
            "text/event-json" => Some(EventFormat::Json),
            "text/event-xml" => Some(EventFormat::Xml),
            _ => None,
        }
    }
}

/// Parses an event body according to `format`.
pub fn parse_event(body: &str, format: EventFormat) -> Result<Event> {
    match format {
        EventFormat::Plain => parse_plain_event(body),
        EventFormat::Json => parse_json_event(body),
        EventFormat::Xml => parse_xml_event(body),
    }
}

fn parse_plain_event(body: &str) -> Result<Event> {
    // The event's own header block ends at the first blank line; anything
    // after that is the event's body (e.g. dialplan `-EXEC-ARG` payloads).
    let (header_block, rest) = match body.find("\n\n") {
        Some(idx) => (&body[..idx], Some(body[idx + 2..].to_owned())),
        None => (body, None),
    };

    let mut headers = parse_header_lines(header_block)?;

    let body = match rest {
        Some(r) if !r.is_empty() => Some(r),
        _ => headers.remove("_body"),
    };

    Ok(Event { headers, body })
}

/// Parses a `Name: value` block (one per line, percent-decoded values)
/// into a header map. Shared by plain-event parsing and by the outbound
/// `connect` handshake, whose command/reply body is the same shape.
pub(crate) fn parse_header_lines(block: &str) -> Result<HashMap<String, String>> {
    let mut headers = HashMap::new();
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
        headers.insert(name, value);
    }
    Ok(headers)
}

#[cfg(feature = "json")]
fn parse_json_event(body: &str) -> Result<Event> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| error::protocol(format!("invalid event json: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| error::protocol("event json is not an object"))?;

    let mut headers = HashMap::with_capacity(obj.len());
    let mut body = None;
    for (key, val) in obj {
        let as_string = match val {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        if key == "_body" {
            body = Some(as_string);
        } else {
            headers.insert(key.clone(), as_string);
        }
    }
    Ok(Event { headers, body })
}

#[cfg(not(feature = "json"))]
fn parse_json_event(_body: &str) -> Result<Event> {
    Err(error::protocol(
        "received text/event-json but the `json` feature is disabled",
    ))
}

#[cfg(feature = "xml")]
fn parse_xml_event(body: &str) -> Result<Event> {
    use quick_xml::events::Event as XmlEvent;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut headers = HashMap::new();
    let mut event_body = None;
    let mut current_tag: Option<String> = None;
    let mut in_body = false;
    let mut buf = Vec::new();

    loop {
        match reader
            .read_event_into(&mut buf)
            .map_err(|e| error::protocol(format!("invalid event xml: {}", e)))?
        {
            XmlEvent::Start(e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                in_body = name.eq_ignore_ascii_case("body");
                current_tag = Some(name);
            }
            XmlEvent::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| error::protocol(format!("invalid event xml text: {}", e)))?
                    .into_owned();
                if in_body {
                    event_body = Some(text);
                } else if let Some(tag) = &current_tag {
                    if tag != "event" && tag != "headers" {
                        headers.insert(tag.clone(), text);
                    }
                }
            }
            XmlEvent::End(_) => {
                current_tag = None;
                in_body = false;
            }
            XmlEvent::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(Event {
        headers,
        body: event_body,
    })
}

#[cfg(not(feature = "xml"))]
fn parse_xml_event(_body: &str) -> Result<Event> {
    Err(error::protocol(
        "received text/event-xml but the `xml` feature is disabled",
    ))
}
