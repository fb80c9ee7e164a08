//! The event loop: one `mio::Poll` driving every socket through a single
//! thread.

use crate::error::{ErrorUtils, Result, ServeezError};
use crate::runtime::Runtime;
use crate::socket::{Callback, Callbacks, Socket, SocketFlags, SocketId, SocketKind};
use crate::transport;
use mio::{Events, PollOpt, Ready, Token};
use std::time::Duration;

pub struct Reactor {
    events: Events,
}

impl Reactor {
    pub fn new() -> Reactor {
        Reactor { events: Events::with_capacity(1024) }
    }

    /// Interest set for a socket: always readable unless killed, plus
    /// writable while a connect is outstanding, a final-write is queued,
    /// or there are unsent bytes.
    fn interest_for(socket: &Socket) -> Ready {
        if socket.is_killed() {
            return Ready::empty();
        }
        let mut interest = Ready::readable();
        let wants_write = socket.kind == SocketKind::ConnectingStream
            || socket.flags.contains(SocketFlags::FINAL_WRITE)
            || !socket.send_buffer.filled_slice().is_empty()
            || socket.send_codec.as_ref().map_or(false, |c| !c.output.filled_slice().is_empty());
        if wants_write {
            interest |= Ready::writable();
        }
        interest
    }

    pub fn register(rt: &Runtime, socket: &Socket) -> Result<()> {
        rt.poll
            .register(&socket.handle, Token(socket.id as usize), Self::interest_for(socket), PollOpt::edge())
            .map_err(ServeezError::from)
    }

    fn reregister(rt: &Runtime, socket: &Socket) -> Result<()> {
        rt.poll
            .reregister(&socket.handle, Token(socket.id as usize), Self::interest_for(socket), PollOpt::edge())
            .map_err(ServeezError::from)
    }

    pub(crate) fn deregister(rt: &Runtime, socket: &Socket) -> Result<()> {
        rt.poll.deregister(&socket.handle).map_err(ServeezError::from)
    }

    /// One iteration: block up to `timeout` for readiness, dispatch
    /// every ready socket, run the once-per-tick housekeeping, and reap
    /// deferred frees. Returns `false` once the runtime has been asked
    /// to shut down.
    pub fn run_once(&mut self, rt: &mut Runtime, timeout: Option<Duration>) -> Result<bool> {
        match rt.poll.poll(&mut self.events, timeout) {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => return Ok(!rt.nuke),
            Err(e) => return Err(ServeezError::from(e)),
        }

        let ready: Vec<(SocketId, Ready)> =
            self.events.iter().map(|event| (event.token().0 as SocketId, event.readiness())).collect();

        for (id, readiness) in ready {
            if !rt.sockets.contains_key(&id) {
                continue;
            }
            if readiness.is_readable() {
                self.dispatch_readable(rt, id);
            }
            if rt.sockets.contains_key(&id) && readiness.is_writable() {
                self.dispatch_writable(rt, id);
            }
            let killed = rt.sockets.get(&id).map(|s| s.is_killed());
            match killed {
                Some(true) => rt.defer_free(id),
                Some(false) => {
                    if let Some(socket) = rt.sockets.get(&id) {
                        let _ = Self::reregister(rt, socket);
                    }
                }
                None => {}
            }
        }

        self.tick(rt);
        self.reap(rt);
        Ok(!rt.nuke)
    }

    /// Dispatches urgent-read before normal read for TCP streams, per
    /// the fixed per-socket ordering: urgent-read, normal-read,
    /// urgent-write, normal-write, connect-completion.
    fn dispatch_readable(&mut self, rt: &mut Runtime, id: SocketId) {
        let kind = rt.sockets.get(&id).map(|s| s.kind);
        if kind == Some(SocketKind::Stream) {
            let _ = transport::tcp::on_readable_oob(rt, id);
        }
        let result = match kind {
            Some(SocketKind::Listener) => transport::tcp::accept(rt, id),
            Some(SocketKind::Stream) => transport::tcp::on_readable(rt, id),
            Some(SocketKind::Datagram) => transport::udp::on_readable(rt, id),
            Some(SocketKind::Raw) => transport::raw::on_readable(rt, id),
            Some(SocketKind::PipePair) => transport::pipe::on_readable(rt, id),
            Some(SocketKind::ConnectingStream) | None => Ok(()),
        };
        self.settle(rt, id, result);
    }

    /// Urgent-write runs before normal write and before connect-completion
    /// for streams already past the connecting stage.
    fn dispatch_writable(&mut self, rt: &mut Runtime, id: SocketId) {
        let kind = rt.sockets.get(&id).map(|s| s.kind);
        if kind == Some(SocketKind::Stream) {
            let _ = transport::tcp::on_writable_oob(rt, id);
        }
        let result = match kind {
            Some(SocketKind::ConnectingStream) => transport::tcp::on_connect_complete(rt, id),
            Some(SocketKind::Stream) => transport::tcp::on_writable(rt, id),
            Some(SocketKind::Datagram) => transport::udp::on_writable(rt, id),
            Some(SocketKind::Raw) => transport::raw::on_writable(rt, id),
            Some(SocketKind::PipePair) => transport::pipe::on_writable(rt, id),
            Some(SocketKind::Listener) | None => Ok(()),
        };
        self.settle(rt, id, result);
    }

    /// Kills the socket on a hard failure; leaves it alone on
    /// `Unavailable` — EAGAIN is not an error.
    fn settle(&mut self, rt: &mut Runtime, id: SocketId, result: Result<()>) {
        if result.has_failed() {
            if let Some(socket) = rt.sockets.get_mut(&id) {
                socket.kill();
            }
        }
    }

    /// Decrements idle counters and runs per-instance housekeeping once
    /// per loop iteration, regardless of which sockets had events.
    fn tick(&mut self, rt: &mut Runtime) {
        let ids: Vec<SocketId> = rt.sockets.keys().copied().collect();
        for id in ids {
            let fire = {
                let socket = match rt.sockets.get_mut(&id) {
                    Some(s) => s,
                    None => continue,
                };
                match &mut socket.idle_counter {
                    Some(n) if *n > 0 => {
                        *n -= 1;
                        *n == 0
                    }
                    _ => false,
                }
            };
            if fire {
                let result = invoke(rt, id, |cb| cb.idle_func.take(), |cb, f| cb.idle_func = Some(f));
                if let Some(Err(_)) = result {
                    if let Some(socket) = rt.sockets.get_mut(&id) {
                        socket.kill();
                        rt.defer_free(id);
                    }
                }
            }
        }

        // Pulled out of `rt` for the duration of the call so `notify`
        // can freely touch the rest of the runtime without aliasing
        // the registry it's running on.
        let mut servers = std::mem::take(&mut rt.servers);
        servers.notify_all(rt);
        rt.servers = servers;
    }

    /// Removes every socket queued by [`Runtime::defer_free`], running
    /// `disconnected_socket` first and deregistering from the poller.
    fn reap(&mut self, rt: &mut Runtime) {
        let ids = rt.pending_free.clone();
        for id in ids {
            invoke(rt, id, |cb| cb.disconnected_socket.take(), |cb, f| cb.disconnected_socket = Some(f));
            if let Some(socket) = rt.sockets.get(&id) {
                let _ = Self::deregister(rt, socket);
            }
        }
        rt.flush_deferred_frees();
    }
}

/// Take-call-restore: removes a socket's callback via `take`, invokes it
/// with `&mut Runtime` (so the callback can freely look up its own or
/// other sockets without aliasing `self`), then puts it back via `put`
/// if the socket is still alive afterward.
pub fn invoke(
    rt: &mut Runtime,
    id: SocketId,
    take: impl FnOnce(&mut Callbacks) -> Option<Callback>,
    put: impl FnOnce(&mut Callbacks, Callback),
) -> Option<Result<()>> {
    let mut callback = {
        let socket = rt.sockets.get_mut(&id)?;
        take(&mut socket.callbacks)?
    };
    let result = callback(rt, id);
    if let Some(socket) = rt.sockets.get_mut(&id) {
        if !socket.is_killed() {
            put(&mut socket.callbacks, callback);
            return Some(result);
        }
    }
    drop(callback);
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{Handle, Proto, Socket, SocketKind};
    use std::os::unix::io::RawFd;

    #[test]
    fn interest_includes_write_for_connecting_socket() {
        let socket = Socket::new(
            1,
            SocketKind::ConnectingStream,
            Proto::TCP,
            Handle::Raw(-1 as RawFd),
            serveez_log::discard(),
        );
        assert!(Reactor::interest_for(&socket).is_writable());
    }

    #[test]
    fn killed_socket_has_empty_interest() {
        let mut socket =
            Socket::new(1, SocketKind::Stream, Proto::TCP, Handle::Raw(-1 as RawFd), serveez_log::discard());
        socket.kill();
        assert!(Reactor::interest_for(&socket).is_empty());
    }
}
