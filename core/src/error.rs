//! Error kinds surfaced by the core.
//!
//! `Unavailable` never crosses a socket boundary — it is recovered
//! locally by the transport that produced it (setting `unavailable_until`)
//! — while `Fatal` always results in the socket being marked `KILLED`.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum ServeezError {
    /// The OS returned a would-block / in-progress indication. Recovered
    /// locally; never propagated past the socket that produced it.
    Unavailable,
    /// Every other error kind, which always results in socket teardown or
    /// a configuration call failing.
    Fatal(Kind),
}

#[derive(Debug)]
pub enum Kind {
    /// Orderly end-of-stream (a `recv` returning 0 bytes).
    PeerClosed,
    /// A recv/send/connect/bind syscall failure.
    Io(io::ErrorKind),
    /// The receive buffer filled up without `check_request` consuming
    /// anything.
    BufferOverflow,
    /// Per-second read count exceeded the listener's flood threshold.
    Flood,
    /// The socket-count ceiling, or a listener's connect-frequency cap,
    /// was hit.
    ResourceExhausted,
    /// `bind`/`instantiate` rejected the request (e.g. a CONFLICT port
    /// equality, or a required config item with no default).
    Configuration(String),
    /// A transport-level protocol violation (e.g. detection timed out, or
    /// a pipe name/uid mismatch).
    Protocol(String),
}

impl fmt::Display for ServeezError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServeezError::Unavailable => write!(f, "operation would block"),
            ServeezError::Fatal(kind) => write!(f, "{}", kind),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::PeerClosed => write!(f, "peer closed the connection"),
            Kind::Io(kind) => write!(f, "io error: {:?}", kind),
            Kind::BufferOverflow => write!(f, "receive buffer overflow"),
            Kind::Flood => write!(f, "flood protection triggered"),
            Kind::ResourceExhausted => write!(f, "resource limit reached"),
            Kind::Configuration(msg) => write!(f, "configuration error: {}", msg),
            Kind::Protocol(msg) => write!(f, "protocol error: {}", msg),
        }
    }
}

impl std::error::Error for ServeezError {}

impl From<io::Error> for ServeezError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::WouldBlock => ServeezError::Unavailable,
            kind => ServeezError::Fatal(Kind::Io(kind)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServeezError>;

/// `Ok` and `Unavailable` both count as "did not fail"; only `Fatal` does.
pub trait ErrorUtils {
    fn has_failed(&self) -> bool;
}

impl<T> ErrorUtils for Result<T> {
    fn has_failed(&self) -> bool {
        !matches!(self, Ok(_) | Err(ServeezError::Unavailable))
    }
}
