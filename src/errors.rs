//! Error taxonomy for parsing, I/O, and connection lifecycle failures.
//!
//! Every terminal [`ErrorKind`] closes the connection without emitting an
//! automatic HTTP response; handlers remain the only source of response
//! bytes. Kinds exist so callers can log with `tracing` and, where useful,
//! distinguish timeout classes raised during a specific parser phase.

use crate::query;
use std::{error, fmt, io};

#[derive(Debug, PartialEq)]
pub(crate) enum ErrorKind {
    InvalidMethod,

    InvalidUrl,
    #[allow(dead_code)]
    Query(query::Error),

    InvalidVersion,
    UnsupportedVersion,
    BadVersion,

    BadLineEnding,
    InvalidHeader,
    TooManyHeaders,
    HeaderTooLarge,
    InvalidContentLength,
    /// More than one `Content-Length` header was present.
    MultipleContentLength,
    InvalidConnection,

    UrlTooLong,
    BodyTooLarge,

    /// The peer closed the socket (a clean zero-byte read).
    EndOfStream,
    /// The flat buffer is full and nothing can be consumed to make room.
    BufferOverflow,

    /// Deadline elapsed while no bytes of the next request had arrived yet.
    TimeoutIdle,
    /// Deadline elapsed mid start-line.
    TimeoutStartLine,
    /// Deadline elapsed between a `\r` and its expected `\n`.
    TimeoutNewline,
    /// Deadline elapsed mid-header or mid-body.
    TimeoutHeaderOrBody,
    /// Deadline elapsed while writing a response.
    TimeoutSend,
    /// The connection exceeded its total lifetime or request-count budget.
    ConnectionExpired,

    /// A handler returned without calling `status()`/`body()` to completion.
    InvalidResponse,
    ServiceUnavailable,
    Io(IoError),
}

impl error::Error for ErrorKind {}
impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ErrorKind::InvalidMethod => "invalid HTTP method",
            ErrorKind::InvalidUrl => "invalid URL format",
            ErrorKind::Query(_) => "invalid query string",
            ErrorKind::InvalidVersion => "invalid HTTP version",
            ErrorKind::UnsupportedVersion => "unsupported HTTP version",
            ErrorKind::BadVersion => "malformed HTTP version literal",
            ErrorKind::BadLineEnding => "malformed line ending",
            ErrorKind::InvalidHeader => "invalid header format",
            ErrorKind::TooManyHeaders => "too many headers",
            ErrorKind::HeaderTooLarge => "header name or value too large",
            ErrorKind::InvalidContentLength => "invalid Content-Length",
            ErrorKind::MultipleContentLength => "multiple Content-Length headers",
            ErrorKind::InvalidConnection => "invalid Connection header",
            ErrorKind::UrlTooLong => "URL exceeds configured limit",
            ErrorKind::BodyTooLarge => "request body too large",
            ErrorKind::EndOfStream => "connection closed by peer",
            ErrorKind::BufferOverflow => "receive buffer exhausted with nothing to consume",
            ErrorKind::TimeoutIdle => "timed out waiting for next request",
            ErrorKind::TimeoutStartLine => "timed out mid start-line",
            ErrorKind::TimeoutNewline => "timed out waiting for line feed",
            ErrorKind::TimeoutHeaderOrBody => "timed out mid header or body",
            ErrorKind::TimeoutSend => "timed out sending response",
            ErrorKind::ConnectionExpired => "connection exceeded its lifetime or request budget",
            ErrorKind::InvalidResponse => "handler produced an incomplete response",
            ErrorKind::ServiceUnavailable => "service temporarily unavailable",
            ErrorKind::Io(e) => return write!(f, "I/O error: {}", e.0),
        };
        f.write_str(msg)
    }
}

impl From<query::Error> for ErrorKind {
    fn from(err: query::Error) -> Self {
        ErrorKind::Query(err)
    }
}
impl From<io::Error> for ErrorKind {
    fn from(err: io::Error) -> Self {
        ErrorKind::Io(IoError(err))
    }
}

#[derive(Debug)]
pub(crate) struct IoError(pub(crate) io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}
