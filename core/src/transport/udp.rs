//! UDP: a single datagram socket multiplexed across every binding whose
//! port config matches the destination. Every matching binding whose
//! `detect_proto` accepts the packet is handed a copy, in binding order.

use super::matching_bindings;
use crate::error::{Result, ServeezError};
use crate::runtime::Runtime;
use crate::socket::{Handle, SocketId};

const MAX_DATAGRAM: usize = 65536;

pub fn on_readable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let received = {
            let socket = match rt.sockets.get(&id) {
                Some(s) => s,
                None => return Ok(()),
            };
            match &socket.handle {
                Handle::Udp(sock) => sock.recv_from(&mut buf),
                _ => return Ok(()),
            }
        };

        let (n, from) = match received {
            Ok(pair) => pair,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(ServeezError::from(e)),
        };

        let bindings = matching_bindings(rt, id, false);
        for binding in &bindings {
            let accepted = crate::server::ServerRegistry::with(rt, &binding.server, |instance, rt| {
                instance.server.detect_proto(rt, id)
            })
            .unwrap_or(false);
            if accepted {
                let handled = crate::server::ServerRegistry::with(rt, &binding.server, |instance, rt| {
                    instance.server.handle_datagram(rt, id, &buf[..n], from)
                });
                if let Some(result) = handled {
                    result?;
                }
            }
        }

        if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.last_recv = std::time::Instant::now();
        }
    }
}

/// Flushes one queued outgoing datagram, if any. UDP writes are
/// addressed, not streamed — there is no partial-write backlog beyond
/// one packet per `send_view` fill.
pub fn on_writable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let socket = match rt.sockets.get_mut(&id) {
        Some(s) => s,
        None => return Ok(()),
    };
    let peer = match socket.peer_addr {
        Some(addr) => addr,
        None => return Ok(()),
    };
    let slice = socket.send_buffer.filled_slice();
    if slice.is_empty() {
        return Ok(());
    }
    let sent = match &socket.handle {
        Handle::Udp(sock) => sock.send_to(slice, &peer),
        _ => return Ok(()),
    };
    match sent {
        Ok(n) => {
            socket.send_buffer.reduce(n);
            Ok(())
        }
        Err(e) => Err(ServeezError::from(e)),
    }
}
