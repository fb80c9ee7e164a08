//! The socket object and its lifecycle.

mod buffer;
mod callbacks;
mod flags;
mod handle;

pub use buffer::Buffer;
pub use callbacks::{Callback, Callbacks, DatagramCallback};
pub use flags::SocketFlags;
pub use handle::Handle;

use crate::portcfg::PortConfig;
use serveez_log::Logger;
use std::any::Any;
use std::net::SocketAddr;
use std::time::Instant;

/// Unique, monotonic, recyclable socket identifier. Recycled ids are
/// handed out by [`crate::runtime::Runtime`]'s id pool
/// and double as the key into the side-table.
pub type SocketId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Listener,
    Stream,
    Datagram,
    Raw,
    PipePair,
    ConnectingStream,
}

/// Bitset over the protocols a port/socket can speak: TCP, UDP, ICMP,
/// RAW, PIPE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Proto(u8);

impl Proto {
    pub const TCP: Proto = Proto(1 << 0);
    pub const UDP: Proto = Proto(1 << 1);
    pub const ICMP: Proto = Proto(1 << 2);
    pub const RAW: Proto = Proto(1 << 3);
    pub const PIPE: Proto = Proto(1 << 4);

    pub fn contains(self, other: Proto) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Proto {
    type Output = Proto;
    fn bitor(self, rhs: Proto) -> Proto {
        Proto(self.0 | rhs.0)
    }
}

pub const DEFAULT_RECV_BUFFER_SIZE: usize = 4096;
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 4096;
/// Growth of a codec/recv/send buffer never exceeds this, regardless of
/// the port config's configured starting size.
pub const MAX_BUFFER_SIZE: usize = 1 << 20;

/// The central entity of the core runtime.
pub struct Socket {
    pub id: SocketId,
    pub kind: SocketKind,
    pub proto: Proto,
    pub flags: SocketFlags,
    pub handle: Handle,

    pub peer_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,

    pub recv_buffer: Buffer,
    pub send_buffer: Buffer,

    pub last_recv: Instant,
    pub last_send: Instant,
    /// Ticks remaining until `idle_func` fires; `None` means no idle
    /// timeout is armed.
    pub idle_counter: Option<i64>,
    /// Set on `EAGAIN`/`EWOULDBLOCK`; further sends/recvs are skipped
    /// until this deadline passes.
    pub unavailable_until: Option<Instant>,

    pub callbacks: Callbacks,

    /// Opaque per-socket state owned by the server attached to this
    /// socket.
    pub data: Option<Box<dyn Any + Send>>,
    /// Non-owning back-link to a peered socket (e.g. tunnel source<->target).
    pub referer: Option<SocketId>,

    pub recv_codec: Option<crate::codec::CodecInstance>,
    pub send_codec: Option<crate::codec::CodecInstance>,

    /// For listeners, the port configuration that created this socket.
    pub port: Option<PortConfig>,
    /// The server instance this socket is bound to. Set once at
    /// accept/creation time for stream and pipe sockets, which (unlike
    /// listeners) don't carry their own binding list.
    pub server_name: Option<String>,

    /// Reads observed in the current one-second flood accounting window.
    pub(crate) flood_reads: u32,
    pub(crate) flood_window_start: Instant,
    /// Reads/second threshold above which [`Socket::account_read`] reports
    /// an overflow; copied from the owning listener's port config at
    /// accept time.
    pub flood_limit: u32,

    /// A single urgent (MSG_OOB) byte queued for the next
    /// `write_socket_oob` dispatch.
    pub oob_send: Option<u8>,
    /// The most recently received urgent byte, handed to
    /// `check_request_oob` and cleared once consumed.
    pub oob_recv: Option<u8>,

    pub log: Logger,
}

impl Socket {
    pub fn new(id: SocketId, kind: SocketKind, proto: Proto, handle: Handle, log: Logger) -> Socket {
        let now = Instant::now();
        Socket {
            id,
            kind,
            proto,
            flags: SocketFlags::NONE,
            handle,
            peer_addr: None,
            local_addr: None,
            recv_buffer: Buffer::new(DEFAULT_RECV_BUFFER_SIZE, MAX_BUFFER_SIZE),
            send_buffer: Buffer::new(DEFAULT_SEND_BUFFER_SIZE, MAX_BUFFER_SIZE),
            last_recv: now,
            last_send: now,
            idle_counter: None,
            unavailable_until: None,
            callbacks: Callbacks::new(),
            data: None,
            referer: None,
            recv_codec: None,
            send_codec: None,
            port: None,
            server_name: None,
            flood_reads: 0,
            flood_window_start: now,
            flood_limit: crate::portcfg::DEFAULT_FLOOD_LIMIT,
            oob_send: None,
            oob_recv: None,
            log,
        }
    }

    #[inline]
    pub fn is_killed(&self) -> bool {
        self.flags.contains(SocketFlags::KILLED)
    }

    #[inline]
    pub fn kill(&mut self) {
        self.flags.set(SocketFlags::KILLED);
    }

    /// Effective recv buffer: when a receive codec is attached, server
    /// callbacks see its output buffer, not the raw network bytes.
    pub fn recv_view(&self) -> &Buffer {
        match &self.recv_codec {
            Some(codec) => &codec.output,
            None => &self.recv_buffer,
        }
    }

    pub fn recv_view_mut(&mut self) -> &mut Buffer {
        match &mut self.recv_codec {
            Some(codec) => &mut codec.output,
            None => &mut self.recv_buffer,
        }
    }

    /// Effective send buffer: when a send codec is attached, servers
    /// write the pre-encode bytes here; the reactor pumps them through
    /// the encoder into `send_buffer` before `write_socket` runs.
    pub fn send_view_mut(&mut self) -> &mut Buffer {
        match &mut self.send_codec {
            Some(codec) => &mut codec.output,
            None => &mut self.send_buffer,
        }
    }

    /// Flood accounting: counts a read against the current one-second
    /// window, returning `true` if the configured limit was exceeded.
    pub fn account_read(&mut self, now: Instant, limit: u32) -> bool {
        if self.flags.contains(SocketFlags::NOFLOOD) {
            return false;
        }
        if now.duration_since(self.flood_window_start).as_secs() >= 1 {
            self.flood_window_start = now;
            self.flood_reads = 0;
        }
        self.flood_reads += 1;
        self.flood_reads > limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proto_bitset_combines_and_checks() {
        let p = Proto::TCP | Proto::UDP;
        assert!(p.contains(Proto::TCP));
        assert!(p.contains(Proto::UDP));
        assert!(!p.contains(Proto::ICMP));
    }
}
