//! A minimal line-echo server built on `serveez-core`: accepts TCP
//! connections on a wildcard bind and writes back every line it reads.

use clap::{App, Arg};
use serveez_core::error::Result;
use serveez_core::portcfg::{Address, PortConfig};
use serveez_core::runtime::Runtime;
use serveez_core::server::ServerType;
use serveez_core::socket::SocketId;
use serveez_core::Reactor;
use serveez_log::{info, Verbosity};
use std::time::Duration;

struct EchoServer;

impl ServerType for EchoServer {
    fn type_name(&self) -> &str {
        "echo"
    }

    fn connect_socket(&mut self, rt: &mut Runtime, id: SocketId) -> Result<()> {
        if let Some(socket) = rt.sockets.get(&id) {
            info!(socket.log, "connection accepted");
        }
        Ok(())
    }

    /// One request is one line; the trailing `\n` is included in `len` so
    /// `handle_request` can echo it back verbatim.
    fn check_request(&mut self, rt: &mut Runtime, id: SocketId) -> Option<usize> {
        let socket = rt.sockets.get(&id)?;
        let buf = socket.recv_view().filled_slice();
        buf.iter().position(|&b| b == b'\n').map(|pos| pos + 1)
    }

    fn handle_request(&mut self, rt: &mut Runtime, id: SocketId, len: usize) -> Result<()> {
        let socket = match rt.sockets.get_mut(&id) {
            Some(s) => s,
            None => return Ok(()),
        };
        let line = socket.recv_view().filled_slice()[..len].to_vec();
        socket.send_view_mut().append(&line);
        Ok(())
    }
}

fn main() {
    let matches = App::new("echo-server")
        .version("0.1.0")
        .about("Line-echo demo server for serveez-core")
        .arg(Arg::with_name("PORT").help("TCP port to listen on").required(true))
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Increases log verbosity; repeatable up to -vvvv"),
        )
        .get_matches();

    let port: u16 = matches.value_of("PORT").unwrap().parse().expect("PORT must be a number 1-65535");
    let verbosity = Verbosity::from_level(matches.occurrences_of("verbose") as i32);
    let log = serveez_log::init(verbosity);

    let mut rt = Runtime::new(log.clone()).expect("failed to initialize runtime");
    rt.servers.register("echo", Box::new(EchoServer)).expect("failed to register echo server");

    rt.bind("echo", PortConfig::tcp("echo", Address::Any, port)).expect("failed to bind echo port");
    info!(log, "listening"; "port" => port);

    let mut reactor = Reactor::new();
    loop {
        match reactor.run_once(&mut rt, Some(Duration::from_millis(500))) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => {
                info!(log, "reactor error"; "error" => format!("{:?}", e));
                break;
            }
        }
    }
}
