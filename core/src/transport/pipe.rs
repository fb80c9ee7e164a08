//! Named pipes: a receive FIFO and a send FIFO treated as one socket.
//! Ownership/permission resolution mirrors what a real daemon needs when
//! the pipe is meant to be shared with another user.

use super::install_default_notifications;
use super::raw::{read_fd, write_fd};
use crate::error::{Result, ServeezError};
use crate::portcfg::PipeEndpoint;
use crate::reactor::Reactor;
use crate::runtime::Runtime;
use crate::socket::{Handle, Proto, Socket, SocketId, SocketKind};
use std::ffi::CString;
use std::os::unix::io::RawFd;

const DEFAULT_PERMISSIONS: u32 = 0o600;

fn resolve_uid(endpoint: &PipeEndpoint) -> Result<Option<libc::uid_t>> {
    let by_name = match &endpoint.user {
        Some(user) => {
            let name = CString::new(user.as_str())
                .map_err(|_| ServeezError::Fatal(crate::error::Kind::Configuration("invalid user name".into())))?;
            let passwd = unsafe { libc::getpwnam(name.as_ptr()) };
            if passwd.is_null() {
                return Err(ServeezError::Fatal(crate::error::Kind::Configuration(format!("unknown user {user}"))));
            }
            Some(unsafe { (*passwd).pw_uid })
        }
        None => None,
    };
    match (endpoint.uid, by_name) {
        (Some(uid), Some(resolved)) if uid != resolved => Err(ServeezError::Fatal(crate::error::Kind::Configuration(
            format!("uid {uid} does not match user {} (resolves to {resolved})", endpoint.user.as_deref().unwrap_or("")),
        ))),
        (Some(uid), _) => Ok(Some(uid)),
        (None, resolved) => Ok(resolved),
    }
}

fn resolve_gid(endpoint: &PipeEndpoint) -> Result<Option<libc::gid_t>> {
    let by_name = match &endpoint.group {
        Some(group) => {
            let name = CString::new(group.as_str())
                .map_err(|_| ServeezError::Fatal(crate::error::Kind::Configuration("invalid group name".into())))?;
            let entry = unsafe { libc::getgrnam(name.as_ptr()) };
            if entry.is_null() {
                return Err(ServeezError::Fatal(crate::error::Kind::Configuration(format!("unknown group {group}"))));
            }
            Some(unsafe { (*entry).gr_gid })
        }
        None => None,
    };
    match (endpoint.gid, by_name) {
        (Some(gid), Some(resolved)) if gid != resolved => Err(ServeezError::Fatal(crate::error::Kind::Configuration(
            format!("gid {gid} does not match group {} (resolves to {resolved})", endpoint.group.as_deref().unwrap_or("")),
        ))),
        (Some(gid), _) => Ok(Some(gid)),
        (None, resolved) => Ok(resolved),
    }
}

/// Creates the FIFO at `endpoint.name` if missing, applies its
/// ownership/permissions, and opens it non-blocking with `flags`.
fn open_fifo(endpoint: &PipeEndpoint, flags: libc::c_int) -> Result<RawFd> {
    let path = CString::new(endpoint.name.as_str())
        .map_err(|_| ServeezError::Fatal(crate::error::Kind::Configuration("invalid pipe path".into())))?;

    let permissions = endpoint.permissions.unwrap_or(DEFAULT_PERMISSIONS);
    let mkfifo_rc = unsafe { libc::mkfifo(path.as_ptr(), permissions) };
    if mkfifo_rc != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::AlreadyExists {
            return Err(ServeezError::from(err));
        }
    }

    let uid = resolve_uid(endpoint)?;
    let gid = resolve_gid(endpoint)?;
    if uid.is_some() || gid.is_some() {
        let rc = unsafe { libc::chown(path.as_ptr(), uid.unwrap_or(u32::MAX), gid.unwrap_or(u32::MAX)) };
        if rc != 0 {
            return Err(ServeezError::from(std::io::Error::last_os_error()));
        }
    }

    let fd = unsafe { libc::open(path.as_ptr(), flags | libc::O_NONBLOCK) };
    if fd < 0 {
        return Err(ServeezError::from(std::io::Error::last_os_error()));
    }
    Ok(fd)
}

/// Opens both ends of a pipe pair and registers the resulting socket
/// with the reactor.
pub fn create(rt: &mut Runtime, recv: &PipeEndpoint, send: &PipeEndpoint, server_name: &str) -> Result<SocketId> {
    let recv_fd = open_fifo(recv, libc::O_RDONLY)?;
    let send_fd = open_fifo(send, libc::O_WRONLY)?;

    let log = rt.log.new(serveez_log::o!("pipe" => recv.name.clone()));
    let server_name = server_name.to_string();
    let id = rt.insert_socket(|id| {
        let mut socket =
            Socket::new(id, SocketKind::PipePair, Proto::PIPE, Handle::Pipe { recv_fd, send_fd }, log);
        socket.server_name = Some(server_name.clone());
        socket
    });

    if let Some(socket) = rt.sockets.get(&id) {
        if Reactor::register(rt, socket).is_err() {
            rt.remove_socket(id);
            return Err(ServeezError::Fatal(crate::error::Kind::Configuration("failed to register pipe".into())));
        }
    }

    install_default_notifications(rt, id, &server_name);
    crate::server::ServerRegistry::with(rt, &server_name, |instance, rt| {
        let _ = instance.server.connect_socket(rt, id);
    });

    Ok(id)
}

pub fn on_readable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    loop {
        let is_full = match rt.sockets.get(&id) {
            Some(s) => s.recv_buffer.is_full(),
            None => return Ok(()),
        };
        if is_full {
            crate::reactor::invoke(rt, id, |cb| cb.kicked_socket.take(), |cb, f| cb.kicked_socket = Some(f));
            return Err(ServeezError::Fatal(crate::error::Kind::BufferOverflow));
        }

        let read = {
            let socket = match rt.sockets.get_mut(&id) {
                Some(s) => s,
                None => return Ok(()),
            };
            let fd = match socket.handle {
                Handle::Pipe { recv_fd, .. } => recv_fd,
                _ => return Ok(()),
            };
            let slice = socket.recv_buffer.free_slice();
            read_fd(fd, slice)
        };

        let n = match read {
            Ok(0) => {
                if let Some(socket) = rt.sockets.get_mut(&id) {
                    socket.kill();
                }
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(ServeezError::from(e)),
        };

        if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.recv_buffer.commit(n);
            socket.last_recv = std::time::Instant::now();
        }
        crate::codec::pump_receive(rt.sockets.get_mut(&id).unwrap());

        let server_name = rt.sockets.get(&id).and_then(|s| s.server_name.clone());
        if let Some(name) = server_name {
            loop {
                let len = crate::server::ServerRegistry::with(rt, &name, |instance, rt| {
                    instance.server.check_request(rt, id)
                })
                .flatten();
                let len = match len {
                    Some(len) => len,
                    None => break,
                };
                let handled = crate::server::ServerRegistry::with(rt, &name, |instance, rt| {
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
    }
}

pub fn on_writable(rt: &mut Runtime, id: SocketId) -> Result<()> {
    crate::codec::pump_send(rt.sockets.get_mut(&id).ok_or(ServeezError::Unavailable)?);

    let (fd, bytes) = {
        let socket = match rt.sockets.get_mut(&id) {
            Some(s) => s,
            None => return Ok(()),
        };
        let fd = match socket.handle {
            Handle::Pipe { send_fd, .. } => send_fd,
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
                socket.last_send = std::time::Instant::now();
            }
            Ok(())
        }
        Err(e) => Err(ServeezError::from(e)),
    }
}
