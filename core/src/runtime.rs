//! The runtime context: all global state the reactor and server
//! callbacks need, grouped into one value instead of passed around as a
//! handful of loose globals.

use crate::binding::Binding;
use crate::error::{Kind, Result, ServeezError};
use crate::portcfg::{Address, PortConfig, PortProto, Relation};
use crate::reactor::Reactor;
use crate::server::ServerRegistry;
use crate::socket::{Handle, Proto, Socket, SocketFlags, SocketId, SocketKind};
use indexmap::IndexMap;
use mio::net::{TcpListener as MioTcpListener, UdpSocket as MioUdpSocket};
use mio::Poll;
use serveez_log::{o, Logger};
use serveez_util::{InterfaceList, SideTable};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Sockets above this count are rejected at accept time.
pub const DEFAULT_MAX_SOCKETS: usize = 4096;

pub struct Runtime {
    /// Live sockets in creation order; iteration order matters for the
    /// reactor's dispatch pass.
    pub sockets: IndexMap<SocketId, Socket>,
    next_id: SocketId,
    free_ids: Vec<SocketId>,

    /// The single poller every socket is registered with. Lives on
    /// `Runtime` rather than on `Reactor` itself so transport code can
    /// register newly created sockets without threading a second
    /// mutable handle alongside `Runtime` through every call.
    pub poll: Poll,

    /// Bindings attached to a listener, keyed by the listener's socket
    /// id, so the listener struct itself doesn't carry the list.
    pub bindings: SideTable<Vec<Binding>>,

    pub interfaces: InterfaceList,
    pub servers: ServerRegistry,

    pub log: Logger,
    pub max_sockets: usize,
    pub tick: Duration,

    /// Set by a server or signal handler to request an orderly shutdown
    /// at the next reactor iteration.
    pub nuke: bool,

    /// Connections accepted off a listener's backlog and immediately torn
    /// down because the socket ceiling was already reached.
    pub rejected_connections: u64,

    pub(crate) pending_free: Vec<SocketId>,
}

impl Runtime {
    pub fn new(log: Logger) -> Result<Runtime> {
        Ok(Runtime {
            sockets: IndexMap::new(),
            next_id: 1,
            free_ids: Vec::new(),
            poll: Poll::new().map_err(ServeezError::from)?,
            bindings: SideTable::new(),
            interfaces: InterfaceList::detect(),
            servers: ServerRegistry::new(),
            log,
            max_sockets: DEFAULT_MAX_SOCKETS,
            tick: Duration::from_millis(1000),
            nuke: false,
            rejected_connections: 0,
            pending_free: Vec::new(),
        })
    }

    /// Hands out a recycled id if one is free, else the next monotonic
    /// one.
    fn alloc_id(&mut self) -> SocketId {
        match self.free_ids.pop() {
            Some(id) => id,
            None => {
                let id = self.next_id;
                self.next_id += 1;
                id
            }
        }
    }

    /// Rejects admission once `sockets.len()` would exceed `max_sockets`.
    pub fn admit(&self) -> bool {
        self.sockets.len() < self.max_sockets
    }

    /// Assigns a fresh id to `make_socket` and inserts it, returning the
    /// id. `make_socket` receives the id so it can be embedded in the
    /// constructed `Socket`.
    pub fn insert_socket(&mut self, make_socket: impl FnOnce(SocketId) -> Socket) -> SocketId {
        let id = self.alloc_id();
        let socket = make_socket(id);
        debug_assert_eq!(socket.id, id);
        self.sockets.insert(id, socket);
        id
    }

    /// Removes a socket from the live table, recycles its id, and drops
    /// its binding list if it was a listener. Does not touch the
    /// underlying OS handle; that happens when the `Socket` is dropped.
    pub fn remove_socket(&mut self, id: SocketId) -> Option<Socket> {
        let socket = self.sockets.shift_remove(&id);
        if socket.is_some() {
            self.bindings.remove(id);
            self.free_ids.push(id);
        }
        socket
    }

    /// Marks a socket for removal at the end of the current reactor
    /// pass rather than immediately, so callbacks mid-dispatch never
    /// observe a vanished socket.
    pub fn defer_free(&mut self, id: SocketId) {
        if !self.pending_free.contains(&id) {
            self.pending_free.push(id);
        }
    }

    /// Drains and removes every socket queued by [`Self::defer_free`].
    pub fn flush_deferred_frees(&mut self) -> Vec<Socket> {
        let ids = std::mem::take(&mut self.pending_free);
        ids.into_iter().filter_map(|id| self.remove_socket(id)).collect()
    }

    /// Binds `port` for `server_name`, sharing an existing listener when
    /// one already covers the same address/port and rejecting outright
    /// conflicts, otherwise creating a fresh socket.
    ///
    /// `port.address` must already be a concrete form — wildcard-per-
    /// interface expansion (`PortConfig::expand`) happens once at
    /// configuration load, before any individual call to `bind`.
    pub fn bind(&mut self, server_name: impl Into<String>, mut port: PortConfig) -> Result<SocketId> {
        port.validate().map_err(|msg| ServeezError::Fatal(Kind::Configuration(msg)))?;
        let server_name = server_name.into();

        if port.proto == PortProto::Pipe {
            return Err(ServeezError::Fatal(Kind::Configuration(
                "pipe ports are created directly via transport::pipe::create, not Runtime::bind".into(),
            )));
        }

        // A `Match` can go two ways: the existing listener is the wider
        // (new port is narrower, simply shares it) or the existing
        // listener is the narrower one and `port` is the wildcard that
        // should take it over. Distinguish by whether `port` itself is
        // the `Any`/`EachInterface` side of the pair.
        let new_is_wild = matches!(port.address, Address::Any | Address::EachInterface);

        let mut shared = None;
        let mut narrower: Vec<SocketId> = Vec::new();
        for (id, socket) in &self.sockets {
            let Some(existing) = &socket.port else { continue };
            match existing.relation(&port) {
                Relation::Conflict => {
                    return Err(ServeezError::Fatal(Kind::Configuration(format!(
                        "port {} conflicts with already-bound port {}",
                        port.name, existing.name
                    ))))
                }
                Relation::Equal if shared.is_none() => shared = Some(*id),
                Relation::Match => {
                    let existing_is_wild = matches!(existing.address, Address::Any | Address::EachInterface);
                    if existing_is_wild {
                        if shared.is_none() {
                            shared = Some(*id);
                        }
                    } else if new_is_wild {
                        narrower.push(*id);
                    } else if shared.is_none() {
                        // Neither side is wildcard but the relation is
                        // still `Match` (e.g. both `EachInterface`);
                        // share rather than take over.
                        shared = Some(*id);
                    }
                }
                _ => {}
            }
        }

        if !narrower.is_empty() {
            return self.takeover(server_name, port, narrower);
        }

        let listener_id = match shared {
            Some(id) => id,
            None => match port.proto {
                PortProto::Tcp => self.create_tcp_listener(&port)?,
                PortProto::Udp => self.create_udp_listener(&port)?,
                PortProto::Icmp | PortProto::Raw => self.create_raw_socket(&port)?,
                PortProto::Pipe => unreachable!("rejected above"),
            },
        };

        let binding = Binding { server: server_name, port };
        match self.bindings.get_mut(listener_id) {
            Some(list) => list.push(binding),
            None => self.bindings.set(listener_id, vec![binding]),
        }
        Ok(listener_id)
    }

    /// Merges every binding on the listeners in `narrower` plus the new
    /// `(server_name, port)` pair into a single fresh wildcard listener,
    /// tearing the narrower ones down.
    fn takeover(&mut self, server_name: String, port: PortConfig, narrower: Vec<SocketId>) -> Result<SocketId> {
        let mut merged = Vec::new();
        for id in &narrower {
            if let Some(mut bindings) = self.bindings.remove(*id) {
                merged.append(&mut bindings);
            }
            if let Some(socket) = self.remove_socket(*id) {
                let _ = Reactor::deregister(self, &socket);
            }
        }
        merged.push(Binding { server: server_name, port: port.clone() });

        let listener_id = match port.proto {
            PortProto::Tcp => self.create_tcp_listener(&port)?,
            PortProto::Udp => self.create_udp_listener(&port)?,
            PortProto::Icmp | PortProto::Raw => self.create_raw_socket(&port)?,
            PortProto::Pipe => unreachable!("pipe ports never reach takeover"),
        };
        self.bindings.set(listener_id, merged);
        Ok(listener_id)
    }

    /// Removes every binding for `server_name`, shutting down any
    /// listener whose binding count drops to zero.
    pub fn unbind(&mut self, server_name: &str) {
        let listener_ids: Vec<SocketId> = self.sockets.keys().copied().collect();
        let mut emptied = Vec::new();
        for id in listener_ids {
            if let Some(bindings) = self.bindings.get_mut(id) {
                bindings.retain(|b| b.server != server_name);
                if bindings.is_empty() {
                    emptied.push(id);
                }
            }
        }
        for id in emptied {
            self.bindings.remove(id);
            if let Some(socket) = self.remove_socket(id) {
                let _ = Reactor::deregister(self, &socket);
            }
        }
    }

    fn create_tcp_listener(&mut self, port: &PortConfig) -> Result<SocketId> {
        let addr = resolve_addr(port);
        let listener = MioTcpListener::bind(&addr).map_err(ServeezError::from)?;
        let log = self.log.new(o!("port" => port.name.clone()));
        let port = port.clone();
        let id = self.insert_socket(|id| {
            let mut socket = Socket::new(id, SocketKind::Listener, Proto::TCP, Handle::TcpListener(listener), log);
            socket.local_addr = Some(addr);
            socket.port = Some(port);
            socket.flags.set(SocketFlags::LISTENING);
            socket
        });
        if let Some(socket) = self.sockets.get(&id) {
            if Reactor::register(self, socket).is_err() {
                self.remove_socket(id);
                return Err(ServeezError::Fatal(Kind::Configuration("failed to register listener".into())));
            }
        }
        Ok(id)
    }

    fn create_udp_listener(&mut self, port: &PortConfig) -> Result<SocketId> {
        let addr = resolve_addr(port);
        let socket_handle = MioUdpSocket::bind(&addr).map_err(ServeezError::from)?;
        let log = self.log.new(o!("port" => port.name.clone()));
        let port = port.clone();
        let id = self.insert_socket(|id| {
            let mut socket = Socket::new(id, SocketKind::Datagram, Proto::UDP, Handle::Udp(socket_handle), log);
            socket.local_addr = Some(addr);
            socket.port = Some(port);
            socket.flags.set(SocketFlags::LISTENING);
            socket
        });
        if let Some(socket) = self.sockets.get(&id) {
            if Reactor::register(self, socket).is_err() {
                self.remove_socket(id);
                return Err(ServeezError::Fatal(Kind::Configuration("failed to register listener".into())));
            }
        }
        Ok(id)
    }

    /// Opens a raw (ICMP/RAW) socket via `libc::socket` — mio has no
    /// raw-socket constructor of its own (see
    /// [`crate::socket::handle::Handle`]).
    fn create_raw_socket(&mut self, port: &PortConfig) -> Result<SocketId> {
        let protocol = match port.proto {
            PortProto::Icmp => libc::IPPROTO_ICMP,
            PortProto::Raw => libc::IPPROTO_RAW,
            _ => unreachable!(),
        };
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_RAW, protocol) };
        if fd < 0 {
            return Err(ServeezError::from(std::io::Error::last_os_error()));
        }
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };
        if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            unsafe { libc::close(fd) };
            return Err(ServeezError::from(std::io::Error::last_os_error()));
        }

        let proto = port.proto.as_proto();
        let addr = resolve_addr(port);
        let log = self.log.new(o!("port" => port.name.clone()));
        let port = port.clone();
        let id = self.insert_socket(|id| {
            let mut socket = Socket::new(id, SocketKind::Raw, proto, Handle::Raw(fd), log);
            socket.local_addr = Some(addr);
            socket.port = Some(port);
            socket.flags.set(SocketFlags::LISTENING);
            socket
        });
        if let Some(socket) = self.sockets.get(&id) {
            if Reactor::register(self, socket).is_err() {
                self.remove_socket(id);
                return Err(ServeezError::Fatal(Kind::Configuration("failed to register raw socket".into())));
            }
        }
        Ok(id)
    }
}

fn resolve_addr(port: &PortConfig) -> SocketAddr {
    let ip = match &port.address {
        Address::Specific(addr) => IpAddr::V4(*addr),
        // Device-bound sockets would additionally need SO_BINDTODEVICE,
        // not wired up yet; they bind wildcard in the meantime.
        Address::Any | Address::Device(_) | Address::EachInterface => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, port.port)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::{Handle, Proto, SocketKind};
    use std::os::unix::io::RawFd;

    fn rt() -> Runtime {
        Runtime::new(serveez_log::discard()).unwrap()
    }

    fn make(id: SocketId) -> Socket {
        Socket::new(id, SocketKind::Stream, Proto::TCP, Handle::Raw(-1 as RawFd), serveez_log::discard())
    }

    #[test]
    fn ids_recycle_after_removal() {
        let mut rt = rt();
        let a = rt.insert_socket(make);
        let b = rt.insert_socket(make);
        assert_ne!(a, b);
        rt.remove_socket(a);
        let c = rt.insert_socket(make);
        assert_eq!(c, a, "freed id should be reused before minting a new one");
    }

    #[test]
    fn admit_rejects_once_at_ceiling() {
        let mut rt = rt();
        rt.max_sockets = 1;
        rt.insert_socket(make);
        assert!(!rt.admit());
    }

    #[test]
    fn deferred_free_only_removes_on_flush() {
        let mut rt = rt();
        let a = rt.insert_socket(make);
        rt.defer_free(a);
        assert!(rt.sockets.contains_key(&a));
        let freed = rt.flush_deferred_frees();
        assert_eq!(freed.len(), 1);
        assert!(!rt.sockets.contains_key(&a));
    }

    #[test]
    #[serial_test::serial]
    fn bind_shares_listener_when_wildcard_bound_first() {
        let mut rt = rt();
        let wild = PortConfig::tcp("a", Address::Any, 21001);
        let specific = PortConfig::tcp("b", Address::Specific(Ipv4Addr::new(127, 0, 0, 1)), 21001);

        let first = rt.bind("a", wild).unwrap();
        let second = rt.bind("b", specific).unwrap();

        assert_eq!(first, second, "sharing a wildcard listener should not create a second socket");
        assert_eq!(rt.bindings.get(first).unwrap().len(), 2);
    }

    #[test]
    #[serial_test::serial]
    fn bind_takes_over_narrower_listener_with_later_wildcard() {
        let mut rt = rt();
        let specific = PortConfig::tcp("b", Address::Specific(Ipv4Addr::new(127, 0, 0, 1)), 21002);
        let wild = PortConfig::tcp("a", Address::Any, 21002);

        let narrow_id = rt.bind("b", specific).unwrap();
        let wild_id = rt.bind("a", wild).unwrap();

        assert_ne!(narrow_id, wild_id, "takeover replaces the narrower listener with a new one");
        assert!(!rt.sockets.contains_key(&narrow_id), "narrower listener must be torn down");
        let merged = rt.bindings.get(wild_id).unwrap();
        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|b| b.server == "a"));
        assert!(merged.iter().any(|b| b.server == "b"));
    }

    #[test]
    #[serial_test::serial]
    fn unbind_shuts_down_listener_once_empty() {
        let mut rt = rt();
        let port = PortConfig::tcp("a", Address::Any, 21003);
        let listener = rt.bind("a", port).unwrap();

        rt.unbind("a");

        assert!(!rt.sockets.contains_key(&listener));
        assert!(rt.bindings.get(listener).is_none());
    }

    #[test]
    #[serial_test::serial]
    fn unbind_leaves_listener_up_while_other_bindings_remain() {
        let mut rt = rt();
        let a = PortConfig::tcp("a", Address::Any, 21004);
        let b = PortConfig::tcp("b", Address::Any, 21004);
        let listener = rt.bind("a", a).unwrap();
        rt.bind("b", b).unwrap();

        rt.unbind("a");

        assert!(rt.sockets.contains_key(&listener));
        assert_eq!(rt.bindings.get(listener).unwrap().len(), 1);
    }
}
