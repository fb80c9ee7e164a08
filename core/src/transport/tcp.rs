//! TCP listeners and streams.

use super::{install_default_notifications, matching_bindings};
use crate::error::{Result, ServeezError};
use crate::reactor::{invoke, Reactor};
use crate::runtime::Runtime;
use crate::socket::{Handle, Proto, Socket, SocketFlags, SocketId, SocketKind};
use std::io::{Read, Write};

/// Accepts every pending connection off the listener's backlog. A
/// connection that arrives once the socket ceiling is already reached is
/// still pulled off the backlog and immediately torn down, rather than
/// left queued — the listener keeps accepting, each rejection is just a
/// controlled teardown instead of admission.
pub fn accept(rt: &mut Runtime, listener_id: SocketId) -> Result<()> {
    loop {
        let accepted = {
            let listener = match rt.sockets.get(&listener_id) {
                Some(s) => s,
                None => return Ok(()),
            };
            match &listener.handle {
                Handle::TcpListener(l) => l.accept(),
                _ => return Ok(()),
            }
        };

        let (stream, peer) = match accepted {
            Ok(pair) => pair,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(ServeezError::from(e)),
        };

        if !rt.admit() {
            rt.rejected_connections += 1;
            serveez_log::warn!(rt.log, "rejecting connection: socket ceiling reached"; "peer" => peer.to_string());
            drop(stream);
            continue;
        }

        let bindings = matching_bindings(rt, listener_id, false);
        if bindings.is_empty() {
            continue;
        }

        let port = rt.sockets.get(&listener_id).and_then(|s| s.port.clone());
        let local = stream.local_addr().ok();
        let log = rt.log.new(serveez_log::o!("peer" => peer.to_string()));

        let server_name = bindings[0].server.clone();
        let flood_limit = port.as_ref().map_or(crate::portcfg::DEFAULT_FLOOD_LIMIT, |p| p.flood_limit);
        let new_id = rt.insert_socket(|id| {
            let mut socket = Socket::new(id, SocketKind::Stream, Proto::TCP, Handle::TcpStream(stream), log);
            socket.peer_addr = Some(peer);
            socket.local_addr = local;
            socket.port = port;
            socket.server_name = Some(server_name.clone());
            socket.flood_limit = flood_limit;
            socket.flags.set(SocketFlags::CONNECTED);
            socket
        });

        if let Some(socket) = rt.sockets.get(&new_id) {
            if Reactor::register(rt, socket).is_err() {
                rt.remove_socket(new_id);
                continue;
            }
        }

        install_default_notifications(rt, new_id, &server_name);

        crate::server::ServerRegistry::with(rt, &server_name, |instance, rt| {
            let _ = instance.server.connect_socket(rt, new_id);
        });
        invoke(rt, new_id, |cb| cb.connected_socket.take(), |cb, f| cb.connected_socket = Some(f));
    }
}

/// Reads as much as is available into the receive buffer, pumps any
/// decoder, then lets the bound server frame and process complete
/// requests.
pub fn on_readable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    loop {
        let is_full = match rt.sockets.get(&id) {
            Some(s) => s.recv_buffer.is_full(),
            None => return Ok(()),
        };
        if is_full {
            fire_kicked(rt, id);
            return Err(ServeezError::Fatal(crate::error::Kind::BufferOverflow));
        }

        let read = {
            let socket = match rt.sockets.get_mut(&id) {
                Some(s) => s,
                None => return Ok(()),
            };
            let slice = socket.recv_buffer.free_slice();
            match &mut socket.handle {
                Handle::TcpStream(stream) => stream.read(slice),
                _ => return Ok(()),
            }
        };

        let n = match read {
            Ok(0) => {
                if let Some(socket) = rt.sockets.get_mut(&id) {
                    socket.kill();
                }
                return Ok(());
            }
            Ok(n) => n,
            Err(e) => return Err(ServeezError::from(e)),
        };

        let flooded = if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.recv_buffer.commit(n);
            socket.last_recv = std::time::Instant::now();
            let limit = socket.flood_limit;
            socket.account_read(socket.last_recv, limit)
        } else {
            false
        };
        if flooded {
            fire_kicked(rt, id);
            return Err(ServeezError::Fatal(crate::error::Kind::Flood));
        }

        crate::codec::pump_receive(rt.sockets.get_mut(&id).unwrap());
        drain_requests(rt, id)?;

        if n < DEFAULT_READ_CHUNK {
            return Ok(());
        }
    }
}

const DEFAULT_READ_CHUNK: usize = 4096;

/// Fires the `kicked_socket` vtable slot. Buffer overflow and flood
/// protection both fire it before the socket is marked `KILLED`. A no-op
/// if the slot is unset.
fn fire_kicked(rt: &mut Runtime, id: SocketId) {
    invoke(rt, id, |cb| cb.kicked_socket.take(), |cb, f| cb.kicked_socket = Some(f));
}

fn drain_requests(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let server_name = match rt.sockets.get(&id).and_then(|s| s.server_name.clone()) {
        Some(name) => name,
        None => return Ok(()),
    };

    loop {
        let len = crate::server::ServerRegistry::with(rt, &server_name, |instance, rt| {
            instance.server.check_request(rt, id)
        })
        .flatten();
        let len = match len {
            Some(len) => len,
            None => return Ok(()),
        };

        let handled = crate::server::ServerRegistry::with(rt, &server_name, |instance, rt| {
            instance.server.handle_request(rt, id, len)
        });
        if let Some(result) = handled {
            result?;
        }

        if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.recv_view_mut().reduce(len);
        }
    }
}

/// Completes a connect-in-progress socket.
pub fn on_connect_complete(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let err = {
        let socket = match rt.sockets.get(&id) {
            Some(s) => s,
            None => return Ok(()),
        };
        match &socket.handle {
            Handle::TcpStream(stream) => stream.take_error(),
            _ => return Ok(()),
        }
    };

    match err {
        Ok(None) => {
            if let Some(socket) = rt.sockets.get_mut(&id) {
                socket.kind = SocketKind::Stream;
                socket.flags.set(SocketFlags::CONNECTED);
            }
            invoke(rt, id, |cb| cb.connected_socket.take(), |cb, f| cb.connected_socket = Some(f));
            Ok(())
        }
        Ok(Some(e)) => Err(ServeezError::from(e)),
        Err(e) => Err(ServeezError::from(e)),
    }
}

/// Flushes the send buffer; arms the write interest again if bytes
/// remain.
pub fn on_writable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    crate::codec::pump_send(rt.sockets.get_mut(&id).ok_or(ServeezError::Unavailable)?);

    loop {
        let written = {
            let socket = match rt.sockets.get_mut(&id) {
                Some(s) => s,
                None => return Ok(()),
            };
            let slice = socket.send_buffer.filled_slice();
            if slice.is_empty() {
                break;
            }
            match &mut socket.handle {
                Handle::TcpStream(stream) => stream.write(slice),
                _ => return Ok(()),
            }
        };

        let n = match written {
            Ok(n) => n,
            Err(e) => return Err(ServeezError::from(e)),
        };
        if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.send_buffer.reduce(n);
            socket.last_send = std::time::Instant::now();
        }
        if n == 0 {
            break;
        }
    }

    if let Some(socket) = rt.sockets.get_mut(&id) {
        if socket.flags.contains(SocketFlags::FINAL_WRITE) && socket.send_buffer.filled_slice().is_empty() {
            socket.kill();
        }
    }
    Ok(())
}

/// Reads one byte of urgent (out-of-band) data via `MSG_OOB`, stores it on
/// the socket, and notifies `check_request_oob`. A platform/socket that
/// has no OOB byte pending is not an error — the socket is simply left
/// alone; lack of platform support for urgent data is not fatal.
pub fn on_readable_oob(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let fd = match rt.sockets.get(&id) {
        Some(socket) => match &socket.handle {
            Handle::TcpStream(stream) => {
                use std::os::unix::io::AsRawFd;
                stream.as_raw_fd()
            }
            _ => return Ok(()),
        },
        None => return Ok(()),
    };

    let mut byte: u8 = 0;
    let n = unsafe {
        libc::recv(fd, &mut byte as *mut u8 as *mut libc::c_void, 1, libc::MSG_OOB)
    };

    if n <= 0 {
        // No urgent byte pending, or the platform rejected MSG_OOB
        // outright; neither is fatal to the connection.
        return Ok(());
    }

    if let Some(socket) = rt.sockets.get_mut(&id) {
        socket.oob_recv = Some(byte);
    }
    invoke(rt, id, |cb| cb.check_request_oob.take(), |cb, f| cb.check_request_oob = Some(f));
    Ok(())
}

/// Sends the queued urgent byte, if any, via `MSG_OOB`. A no-op when
/// nothing is queued.
pub fn on_writable_oob(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let (fd, byte) = match rt.sockets.get_mut(&id) {
        Some(socket) => {
            let byte = match socket.oob_send.take() {
                Some(b) => b,
                None => return Ok(()),
            };
            use std::os::unix::io::AsRawFd;
            let fd = match &socket.handle {
                Handle::TcpStream(stream) => stream.as_raw_fd(),
                _ => return Ok(()),
            };
            (fd, byte)
        }
        None => return Ok(()),
    };

    let n = unsafe { libc::send(fd, &byte as *const u8 as *const libc::c_void, 1, libc::MSG_OOB) };
    if n < 0 {
        // Platform rejected urgent data; not fatal.
        return Ok(());
    }
    Ok(())
}
