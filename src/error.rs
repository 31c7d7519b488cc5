use std::error::Error as StdError;
use std::fmt;
use std::io;

/// A `Result` alias where the `Err` case is `eventsocket::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents errors that can occur handling an ESL connection.
pub struct Error {
    inner: Box<ErrorImpl>,
}

struct ErrorImpl {
    kind: Kind,
    cause: Option<Box<dyn StdError + Send + Sync>>,
}

#[derive(Debug)]
pub(crate) enum Kind {
    /// The underlying transport was closed, locally or by the peer.
    TransportClosed,
    /// A request did not receive a reply within the configured timeout.
    Timeout,
    /// The transport closed or errored before authentication completed.
    AuthFailure,
    /// FreeSWITCH replied `-ERR invalid` to an `auth` command.
    AuthRejected,
    /// A frame could not be parsed as a well-formed envelope.
    Protocol,
    /// A caller passed arguments that can never be sent as a valid command.
    Argument,
    /// A registered event handler panicked or returned an error.
    Handler,
    Io,
}

impl Error {
    pub(crate) fn new(kind: Kind) -> Error {
        Error {
            inner: Box::new(ErrorImpl { kind, cause: None }),
        }
    }

    pub(crate) fn with<C: Into<Box<dyn StdError + Send + Sync>>>(kind: Kind, cause: C) -> Error {
        Error {
            inner: Box::new(ErrorImpl {
                kind,
                cause: Some(cause.into()),
            }),
        }
    }

    pub(crate) fn kind(&self) -> &Kind {
        &self.inner.kind
    }

    /// Returns true if the underlying transport is closed.
    pub fn is_closed(&self) -> bool {
        matches!(self.inner.kind, Kind::TransportClosed)
    }

    /// Returns true if this error represents a request that timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self.inner.kind, Kind::Timeout)
    }

    /// Returns true if authentication failed or was rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self.inner.kind, Kind::AuthFailure | Kind::AuthRejected)
    }

    /// Returns true if a malformed frame was received.
    pub fn is_protocol(&self) -> bool {
        matches!(self.inner.kind, Kind::Protocol)
    }

    pub(crate) fn description(&self) -> &str {
        match self.inner.kind {
            Kind::TransportClosed => "connection closed",
            Kind::Timeout => "request timed out waiting for a reply",
            Kind::AuthFailure => "connection closed before authentication completed",
            Kind::AuthRejected => "authentication rejected",
            Kind::Protocol => "protocol error",
            Kind::Argument => "invalid argument",
            Kind::Handler => "event handler error",
            Kind::Io => "I/O error",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut builder = f.debug_struct("eventsocket::Error");
        builder.field("kind", &self.inner.kind);
        if let Some(ref cause) = self.inner.cause {
            builder.field("cause", cause);
        }
        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())?;
        if let Some(ref cause) = self.inner.cause {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .cause
            .as_ref()
            .map(|cause| &**cause as &(dyn StdError + 'static))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::with(Kind::Io, err)
    }
}

pub(crate) fn closed() -> Error {
    Error::new(Kind::TransportClosed)
}

pub(crate) fn timeout() -> Error {
    Error::new(Kind::Timeout)
}

pub(crate) fn auth_failure() -> Error {
    Error::new(Kind::AuthFailure)
}

pub(crate) fn auth_rejected_with(reply_text: &str) -> Error {
    Error::with(Kind::AuthRejected, reply_text.to_owned())
}

pub(crate) fn protocol<C: Into<Box<dyn StdError + Send + Sync>>>(cause: C) -> Error {
    Error::with(Kind::Protocol, cause)
}

pub(crate) fn argument<C: Into<Box<dyn StdError + Send + Sync>>>(cause: C) -> Error {
    Error::with(Kind::Argument, cause)
}

pub(crate) fn handler<C: Into<Box<dyn StdError + Send + Sync>>>(cause: C) -> Error {
    Error::with(Kind::Handler, cause)
}
