//! End-to-end scenarios driven through real sockets: a test client talks
//! to the reactor over loopback while the test thread pumps `run_once`.

use serveez_core::codec;
use serveez_core::error::Result;
use serveez_core::portcfg::{Address, PortConfig};
use serveez_core::runtime::Runtime;
use serveez_core::server::ServerType;
use serveez_core::socket::SocketId;
use serveez_core::Reactor;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::sync::mpsc;
use std::time::Duration;

fn pump(rt: &mut Runtime, reactor: &mut Reactor, iterations: usize) {
    for _ in 0..iterations {
        reactor.run_once(rt, Some(Duration::from_millis(20))).unwrap();
    }
}

struct LineEcho;

impl ServerType for LineEcho {
    fn type_name(&self) -> &str {
        "line-echo"
    }

    fn check_request(&mut self, rt: &mut Runtime, id: SocketId) -> Option<usize> {
        let socket = rt.sockets.get(&id)?;
        let buf = socket.recv_view().filled_slice();
        buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
    }

    fn handle_request(&mut self, rt: &mut Runtime, id: SocketId, len: usize) -> Result<()> {
        let socket = rt.sockets.get_mut(&id).unwrap();
        let line = socket.recv_view().filled_slice()[..len].to_vec();
        socket.send_view_mut().append(&line);
        Ok(())
    }
}

/// A client connects to a wildcard-bound TCP listener, sends a line, and
/// reads back exactly that line.
#[test]
#[serial_test::serial]
fn tcp_echo_over_wildcard_bind() {
    let port = 31001;
    let mut rt = Runtime::new(serveez_log::discard()).unwrap();
    rt.servers.register("echo", Box::new(LineEcho)).unwrap();
    rt.bind("echo", PortConfig::tcp("echo", Address::Any, port)).unwrap();
    let mut reactor = Reactor::new();

    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        stream.write_all(b"hello there\n").unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).unwrap();
        tx.send(buf[..n].to_vec()).unwrap();
    });

    pump(&mut rt, &mut reactor, 30);
    let echoed = rx.recv_timeout(Duration::from_secs(2)).expect("client never received an echo");
    assert_eq!(echoed, b"hello there\n");
}

struct DatagramCounter {
    magic: u8,
    seen: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl ServerType for DatagramCounter {
    fn type_name(&self) -> &str {
        "datagram-counter"
    }

    fn detect_proto(&mut self, rt: &mut Runtime, id: SocketId) -> bool {
        let _ = (rt, id);
        true
    }

    fn handle_datagram(&mut self, _rt: &mut Runtime, _id: SocketId, data: &[u8], _from: SocketAddr) -> Result<()> {
        if data.first() == Some(&self.magic) {
            self.seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Two server instances share one UDP listener bound to the same
/// wildcard port; every packet is handed to both, and each instance
/// only counts the ones whose magic byte is its own.
#[test]
#[serial_test::serial]
fn udp_listener_shared_by_two_server_instances() {
    let port = 31002;
    let mut rt = Runtime::new(serveez_log::discard()).unwrap();
    let seen_a = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen_b = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    rt.servers
        .register("a", Box::new(DatagramCounter { magic: b'A', seen: seen_a.clone() }))
        .unwrap();
    rt.servers
        .register("b", Box::new(DatagramCounter { magic: b'B', seen: seen_b.clone() }))
        .unwrap();

    let first = rt.bind("a", PortConfig::udp("a", Address::Any, port)).unwrap();
    let second = rt.bind("b", PortConfig::udp("b", Address::Any, port)).unwrap();
    assert_eq!(first, second, "identical wildcard udp bindings must share one listener");

    let mut reactor = Reactor::new();
    let client = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
    client.send_to(b"Apacket", ("127.0.0.1", port)).unwrap();
    client.send_to(b"Bpacket", ("127.0.0.1", port)).unwrap();
    pump(&mut rt, &mut reactor, 10);

    assert_eq!(seen_a.load(std::sync::atomic::Ordering::SeqCst), 1, "a should see its own packet");
    assert_eq!(seen_b.load(std::sync::atomic::Ordering::SeqCst), 1, "b should see its own packet");
}

struct IdleMarker {
    fired: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl ServerType for IdleMarker {
    fn type_name(&self) -> &str {
        "idle-marker"
    }

    fn connect_socket(&mut self, rt: &mut Runtime, id: SocketId) -> Result<()> {
        let fired = self.fired.clone();
        if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.idle_counter = Some(2);
            socket.callbacks.idle_func = Some(Box::new(move |_rt, _id| {
                fired.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok(())
            }));
        }
        Ok(())
    }
}

/// A socket's idle counter reaches zero after enough ticks and
/// `idle_func` fires exactly once.
#[test]
#[serial_test::serial]
fn idle_counter_fires_idle_func_after_ticks() {
    let port = 31003;
    let mut rt = Runtime::new(serveez_log::discard()).unwrap();
    let fired = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    rt.servers.register("idle", Box::new(IdleMarker { fired: fired.clone() })).unwrap();
    rt.bind("idle", PortConfig::tcp("idle", Address::Any, port)).unwrap();
    let mut reactor = Reactor::new();

    let _client = std::thread::spawn(move || {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    // Pump one iteration at a time until the connection is accepted;
    // `connect_socket` arms `idle_counter` to 2 and the same iteration's
    // `tick()` immediately decrements it to 1, so it can't have fired yet.
    for _ in 0..100 {
        reactor.run_once(&mut rt, Some(Duration::from_millis(20))).unwrap();
        if rt.sockets.len() > 1 {
            break;
        }
    }
    assert!(rt.sockets.len() > 1, "connection was never accepted");
    assert!(!fired.load(std::sync::atomic::Ordering::SeqCst), "idle_func must not fire before the counter drains");

    pump(&mut rt, &mut reactor, 1);
    assert!(fired.load(std::sync::atomic::Ordering::SeqCst), "idle_func should fire once the counter reaches zero");
}

struct IdleShutdown {
    disconnects: std::sync::Arc<std::sync::atomic::AtomicUsize>,
}

impl ServerType for IdleShutdown {
    fn type_name(&self) -> &str {
        "idle-shutdown"
    }

    fn connect_socket(&mut self, rt: &mut Runtime, id: SocketId) -> Result<()> {
        if let Some(socket) = rt.sockets.get_mut(&id) {
            socket.idle_counter = Some(2);
            socket.callbacks.idle_func = Some(Box::new(|_rt, _id| {
                Err(serveez_core::ServeezError::Fatal(serveez_core::Kind::Configuration("idle timeout".into())))
            }));
        }
        Ok(())
    }

    fn disconnected_socket(&mut self, _rt: &mut Runtime, _id: SocketId) {
        self.disconnects.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }
}

/// An `idle_func` that returns `Err` marks its socket for shutdown: once
/// the idle counter drains, the socket is killed and removed, and its
/// disconnect callback runs exactly once.
#[test]
#[serial_test::serial]
fn idle_func_error_kills_the_socket() {
    let port = 31005;
    let mut rt = Runtime::new(serveez_log::discard()).unwrap();
    let disconnects = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    rt.servers.register("idle", Box::new(IdleShutdown { disconnects: disconnects.clone() })).unwrap();
    let listener_id = rt.bind("idle", PortConfig::tcp("idle", Address::Any, port)).unwrap();
    let mut reactor = Reactor::new();

    let _client = std::thread::spawn(move || {
        let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        std::thread::sleep(Duration::from_millis(500));
        drop(stream);
    });

    let mut stream_id = None;
    for _ in 0..100 {
        reactor.run_once(&mut rt, Some(Duration::from_millis(20))).unwrap();
        stream_id = rt.sockets.keys().find(|&&id| id != listener_id).copied();
        if stream_id.is_some() {
            break;
        }
    }
    let stream_id = stream_id.expect("connection was never accepted");

    pump(&mut rt, &mut reactor, 1);
    assert!(rt.sockets.get(&stream_id).is_none(), "socket should have been killed and reaped");
    assert_eq!(disconnects.load(std::sync::atomic::Ordering::SeqCst), 1, "disconnect callback should fire exactly once");
}

/// A receive codec spliced onto a socket transparently decodes bytes
/// before the server ever sees them.
#[test]
fn codec_splice_decodes_before_check_request_sees_it() {
    use serveez_core::socket::{Handle, Proto, Socket, SocketKind};
    use std::os::unix::io::RawFd;

    let mut socket = Socket::new(1, SocketKind::Stream, Proto::TCP, Handle::Raw(-1 as RawFd), serveez_log::discard());
    codec::attach_decoder(&mut socket, Box::new(codec::xor::XorCodec::decoder(0x5A)));

    let plaintext = b"splice me\n";
    let wire: Vec<u8> = plaintext.iter().map(|b| b ^ 0x5A).collect();
    socket.recv_buffer.append(&wire);
    codec::pump_receive(&mut socket);

    assert_eq!(socket.recv_view().filled_slice(), plaintext);
}

/// Once `max_sockets` live sockets exist, a connection is still pulled
/// off the listener's backlog but immediately torn down, and the
/// rejection is counted rather than silently dropped.
#[test]
#[serial_test::serial]
fn socket_ceiling_tears_down_connection_past_the_limit() {
    let port = 31004;
    let mut rt = Runtime::new(serveez_log::discard()).unwrap();
    rt.servers.register("echo", Box::new(LineEcho)).unwrap();
    rt.bind("echo", PortConfig::tcp("echo", Address::Any, port)).unwrap();
    // The listener itself already counts as one socket; cap at exactly
    // that so no connection can be admitted.
    rt.max_sockets = rt.sockets.len();
    let mut reactor = Reactor::new();

    let _client = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        let _stream = TcpStream::connect(("127.0.0.1", port));
        std::thread::sleep(Duration::from_millis(300));
    });

    pump(&mut rt, &mut reactor, 10);
    assert_eq!(rt.sockets.len(), 1, "no stream socket should have been admitted past the ceiling");
    assert_eq!(rt.rejected_connections, 1, "the rejected connection should be counted");
}
