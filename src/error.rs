//! `pgpipe` error types.
use std::{backtrace::Backtrace, borrow::Cow, fmt, sync::Arc};

use crate::message::BackendError;

/// A specialized [`Result`] type for `pgpipe` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `pgpipe` library.
pub struct Error {
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Returns the transport error, if this is one.
    pub fn as_transport(&self) -> Option<&TransportError> {
        match &self.kind {
            ErrorKind::Transport(err) => Some(err),
            _ => None,
        }
    }
}

/// All possible error kind from `pgpipe` library.
pub enum ErrorKind {
    /// An io failure or EOF on the socket, fanned out from the latch.
    Transport(TransportError),
    /// A malformed or unexpected message.
    Protocol(ProtocolError),
    /// An `ErrorResponse` received while the request was pending.
    Backend(BackendError),
    /// A message stream parser raised an error.
    Parse(ParseError),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<TransportError>e => ErrorKind::Transport(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<BackendError>e => ErrorKind::Backend(e));
from!(<ParseError>e => ErrorKind::Parse(e));

impl std::error::Error for Error { }

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::Backend(e) => e.fmt(f),
            Self::Parse(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

/// A terminal failure of the underlying byte stream.
///
/// The latch holds one of these; it is cloned into every pending and
/// future submission, so the payload is a shared string.
#[derive(Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    message: Arc<str>,
}

impl TransportError {
    pub(crate) fn new(message: impl fmt::Display) -> Self {
        Self { message: message.to_string().into() }
    }

    pub(crate) fn closed_by_peer() -> Self {
        Self { message: "connection closed by peer".into() }
    }

    pub(crate) fn stopped() -> Self {
        Self { message: "dispatcher stopped".into() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Debug for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

fn display_tag(tag: &u8) -> String {
    match *tag {
        0x21..=0x7e => format!("'{}'", *tag as char),
        _ => format!("0x{tag:02x}"),
    }
}

/// An error when translating buffer from postgres.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame length: {len}")]
    MalformedLength {
        len: u32,
    },
    #[error("unknown authentication method: {method}")]
    UnknownAuth {
        method: i32,
    },
    #[error("unexpected message: tag={}", display_tag(.tag))]
    UnexpectedTag {
        tag: u8,
    },
    #[error("message truncated while reading {context}")]
    Truncated {
        context: &'static str,
    },
    #[error("invalid utf8 in {context}")]
    Utf8 {
        context: &'static str,
    },
}

impl ProtocolError {
    pub(crate) fn unexpected(tag: u8) -> ProtocolError {
        Self::UnexpectedTag { tag }
    }

    pub(crate) fn truncated(context: &'static str) -> ProtocolError {
        Self::Truncated { context }
    }

    pub(crate) fn utf8(context: &'static str) -> ProtocolError {
        Self::Utf8 { context }
    }
}

/// An error raised by a message stream parser.
///
/// `ParseError` only carries a message, an error that is meant to be
/// displayed instead of handled in application.
pub struct ParseError(Cow<'static, str>);

impl ParseError {
    pub fn new(message: impl Into<Cow<'static, str>>) -> ParseError {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<ProtocolError> for ParseError {
    fn from(err: ProtocolError) -> Self {
        Self(err.to_string().into())
    }
}

impl std::error::Error for ParseError { }

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

impl std::fmt::Debug for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}
