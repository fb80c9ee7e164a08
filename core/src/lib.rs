//! Core runtime for multiplexing TCP/UDP/ICMP/RAW/pipe servers over a
//! single event loop: the socket object, the reactor, port
//! configuration, bindings, the codec pipeline, and the default
//! transport implementations.

pub mod binding;
pub mod codec;
pub mod config;
pub mod error;
pub mod portcfg;
pub mod reactor;
pub mod runtime;
pub mod server;
pub mod socket;
pub mod transport;

pub use error::{ErrorUtils, Kind, Result, ServeezError};
pub use reactor::Reactor;
pub use runtime::Runtime;
pub use socket::{Socket, SocketId};
