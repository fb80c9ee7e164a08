//! Structured logging for the serveez core runtime.
//!
//! Every socket, listener and server instance gets a child `Logger` scoped
//! with its own identity (`log.new(o!("socket_id" => id))`), so a single
//! process-wide root logger fans out into per-object context without any
//! module reaching for `println!`.

pub use slog::{crit, debug, error, info, o, trace, warn, Logger};

use serde_derive::{Deserialize, Serialize};
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;

/// Verbosity levels accepted by the process configuration surface, from
/// fatal-only up to full per-packet tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verbosity {
    /// Fatal errors only.
    Quiet,
    /// Errors and warnings.
    Error,
    /// Notices in addition to errors/warnings (resource exhaustion,
    /// rejected binds).
    Notice,
    /// Informational connection lifecycle events.
    Info,
    /// Full per-packet trace logging.
    Trace,
}

impl Verbosity {
    /// Clamps an integer verbosity (as accepted from the process
    /// configuration surface) into the valid `0..=4` range.
    pub fn from_level(level: i32) -> Verbosity {
        match level.clamp(0, 4) {
            0 => Verbosity::Quiet,
            1 => Verbosity::Error,
            2 => Verbosity::Notice,
            3 => Verbosity::Info,
            _ => Verbosity::Trace,
        }
    }

    fn severity(self) -> Severity {
        match self {
            Verbosity::Quiet => Severity::Critical,
            Verbosity::Error => Severity::Error,
            Verbosity::Notice => Severity::Warning,
            Verbosity::Info => Severity::Info,
            Verbosity::Trace => Severity::Trace,
        }
    }
}

/// Builds the process-wide root logger. Sockets and servers derive child
/// loggers from this one; nothing else in the core should construct a
/// `Logger` from scratch.
pub fn init(verbosity: Verbosity) -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(verbosity.severity());
    builder.destination(Destination::Stderr);

    builder
        .build()
        .expect("failed to initialize terminal logger")
}

/// A logger that discards everything, used in tests and anywhere a
/// `Logger` is required but output is not wanted.
pub fn discard() -> Logger {
    Logger::root(slog::Discard, o!())
}
