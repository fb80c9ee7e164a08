//! RAW sockets: unprocessed IP datagrams delivered straight to a single
//! bound server, no port number to multiplex on.

use super::matching_bindings;
use crate::error::{Result, ServeezError};
use crate::runtime::Runtime;
use crate::socket::{Handle, SocketId};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

const MAX_PACKET: usize = 65536;

/// Reads one packet off a raw file descriptor via `libc::read`, mio has
/// no raw-socket type of its own (see [`crate::socket::handle::Handle`]).
pub(crate) fn read_fd(fd: std::os::unix::io::RawFd, buf: &mut [u8]) -> std::io::Result<usize> {
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

pub(crate) fn write_fd(fd: std::os::unix::io::RawFd, buf: &[u8]) -> std::io::Result<usize> {
    let n = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    if n < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

pub fn on_readable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let mut buf = [0u8; MAX_PACKET];
    loop {
        let fd = match rt.sockets.get(&id) {
            Some(s) => match &s.handle {
                Handle::Raw(fd) => *fd,
                _ => return Ok(()),
            },
            None => return Ok(()),
        };

        let n = match read_fd(fd, &mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(ServeezError::from(e)),
        };

        // RAW carries no port: the unspecified address stands in for
        // "whoever sent this", the server inspects the packet itself.
        let from = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
        let bindings = matching_bindings(rt, id, false);
        if let Some(binding) = bindings.first() {
            let name = binding.server.clone();
            let handled = crate::server::ServerRegistry::with(rt, &name, |instance, rt| {
                instance.server.handle_datagram(rt, id, &buf[..n], from)
            });
            if let Some(result) = handled {
                result?;
            }
        }

        if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.last_recv = std::time::Instant::now();
        }
    }
}

pub fn on_writable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    let (fd, bytes) = {
        let socket = match rt.sockets.get_mut(&id) {
            Some(s) => s,
            None => return Ok(()),
        };
        let fd = match socket.handle {
            Handle::Raw(fd) => fd,
            _ => return Ok(()),
        };
        let slice = socket.send_buffer.filled_slice();
        if slice.is_empty() {
            return Ok(());
        }
        (fd, slice.to_vec())
    };

    match write_fd(fd, &bytes) {
        Ok(n) => {
            if let Some(socket) = rt.sockets.get_mut(&id) {
                socket.send_buffer.reduce(n);
            }
            Ok(())
        }
        Err(e) => Err(ServeezError::from(e)),
    }
}
