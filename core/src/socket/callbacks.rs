use crate::error::Result;
use crate::runtime::Runtime;
use crate::socket::SocketId;
use std::net::SocketAddr;

/// A single callback slot. Stored as `Option<Callback>` everywhere so that
/// "unset" is a first-class, observable state rather than a null function
/// pointer — an absent slot simply disables that dispatch path.
pub type Callback = Box<dyn FnMut(&mut Runtime, SocketId) -> Result<()> + Send>;

/// Datagram dispatch takes the packet bytes and the peer address directly,
/// since UDP/ICMP/RAW sockets hand the server one complete packet per
/// call rather than draining a stream buffer.
pub type DatagramCallback = Box<dyn FnMut(&mut Runtime, SocketId, &[u8], SocketAddr) -> Result<()> + Send>;

/// The socket's callback vtable. Every slot is nullable; the
/// transports install sane per-kind defaults for `read_socket`/
/// `write_socket`/etc. at creation time, and a server's `connect_socket`
/// overrides `check_request`/`disconnected_socket` with its own framing.
#[derive(Default)]
pub struct Callbacks {
    pub read_socket: Option<Callback>,
    pub write_socket: Option<Callback>,
    pub read_socket_oob: Option<Callback>,
    pub write_socket_oob: Option<Callback>,
    pub check_request: Option<Callback>,
    pub check_request_oob: Option<Callback>,
    pub handle_request: Option<DatagramCallback>,
    pub connected_socket: Option<Callback>,
    pub disconnected_socket: Option<Callback>,
    pub kicked_socket: Option<Callback>,
    pub idle_func: Option<Callback>,
}

impl Callbacks {
    pub fn new() -> Callbacks {
        Callbacks::default()
    }
}
