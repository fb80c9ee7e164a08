//! Port configuration: a named, typed description of a network or pipe
//! endpoint.

use crate::socket::{Proto, MAX_BUFFER_SIZE};
use serde_derive::{Deserialize, Serialize};
use std::net::Ipv4Addr;

/// Clamp ceilings for the fields below.
pub const SOMAXCONN: u32 = 128;
pub const MAX_DETECTION_FILL: usize = 16 * 1024;
pub const MAX_DETECTION_WAIT_SECS: u32 = 60;
/// Default per-socket reads/second before flood protection kicks in.
pub const DEFAULT_FLOOD_LIMIT: u32 = 100;
/// Clamp ceiling for `flood_limit`.
pub const MAX_FLOOD_LIMIT: u32 = 100_000;

/// ICMP sub-type used to multiplex several tenants over one raw socket.
pub const DEFAULT_ICMP_SUBTYPE: u8 = 0xF4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Address {
    /// Wildcard bind (`*` in the configuration surface).
    Any,
    /// A specific IPv4 address.
    Specific(Ipv4Addr),
    /// Bound to a named interface device, mutually exclusive with
    /// `Specific`.
    Device(String),
    /// "Each interface": expands into one concrete listener per known
    /// interface.
    EachInterface,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipeEndpoint {
    pub name: String,
    pub user: Option<String>,
    pub group: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    /// Octal permission bits; `None` uses the process default.
    pub permissions: Option<u32>,
}

impl PipeEndpoint {
    pub fn named(name: impl Into<String>) -> PipeEndpoint {
        PipeEndpoint { name: name.into(), user: None, group: None, uid: None, gid: None, permissions: None }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortConfig {
    pub name: String,
    pub proto: PortProto,
    pub address: Address,
    pub port: u16,
    pub backlog: u32,
    pub allow: Vec<String>,
    pub deny: Vec<String>,
    pub send_buffer_size: usize,
    pub recv_buffer_size: usize,
    pub max_in_flight: u32,
    /// Per-socket reads/second before `kicked_socket` fires and the
    /// connection is torn down, unless `SocketFlags::NOFLOOD` is set.
    pub flood_limit: u32,
    pub detection_fill: usize,
    pub detection_wait_secs: u32,
    pub connect_frequency: u32,
    pub icmp_subtype: u8,
    pub pipe_recv: Option<PipeEndpoint>,
    pub pipe_send: Option<PipeEndpoint>,
}

/// A single-protocol discriminant for a port config. A `PortConfig`
/// always names exactly one concrete transport; `Proto` (the bitset) is
/// used elsewhere to describe what a *socket* can speak once bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortProto {
    Tcp,
    Udp,
    Icmp,
    Raw,
    Pipe,
}

impl PortProto {
    pub fn as_proto(self) -> Proto {
        match self {
            PortProto::Tcp => Proto::TCP,
            PortProto::Udp => Proto::UDP,
            PortProto::Icmp => Proto::ICMP,
            PortProto::Raw => Proto::RAW,
            PortProto::Pipe => Proto::PIPE,
        }
    }
}

/// Three-valued (four, counting CONFLICT) port-config equality relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    /// Identical endpoint.
    Equal,
    /// One port config is wildcard and covers the other.
    Match,
    NoMatch,
    /// Same port but mutually exclusive binding styles (e.g. device-bound
    /// vs specific address).
    Conflict,
}

impl PortConfig {
    pub fn tcp(name: impl Into<String>, address: Address, port: u16) -> PortConfig {
        PortConfig {
            name: name.into(),
            proto: PortProto::Tcp,
            address,
            port,
            backlog: SOMAXCONN,
            allow: Vec::new(),
            deny: Vec::new(),
            send_buffer_size: crate::socket::DEFAULT_SEND_BUFFER_SIZE,
            recv_buffer_size: crate::socket::DEFAULT_RECV_BUFFER_SIZE,
            max_in_flight: 100,
            flood_limit: DEFAULT_FLOOD_LIMIT,
            detection_fill: 0,
            detection_wait_secs: 0,
            connect_frequency: 0,
            icmp_subtype: DEFAULT_ICMP_SUBTYPE,
            pipe_recv: None,
            pipe_send: None,
        }
    }

    pub fn udp(name: impl Into<String>, address: Address, port: u16) -> PortConfig {
        PortConfig { proto: PortProto::Udp, ..PortConfig::tcp(name, address, port) }
    }

    pub fn pipe(name: impl Into<String>, recv: PipeEndpoint, send: PipeEndpoint) -> PortConfig {
        let mut cfg = PortConfig::tcp(name, Address::Any, 0);
        cfg.proto = PortProto::Pipe;
        cfg.pipe_recv = Some(recv);
        cfg.pipe_send = Some(send);
        cfg
    }

    /// Clamps every field with a documented ceiling. Called once, at
    /// registration time.
    pub fn validate(&mut self) -> Result<(), String> {
        if self.proto != PortProto::Pipe && (self.port == 0) {
            return Err(format!("port number {} is out of range (1-65535)", self.port));
        }
        if self.backlog == 0 || self.backlog > SOMAXCONN {
            self.backlog = self.backlog.clamp(1, SOMAXCONN);
        }
        if self.flood_limit == 0 || self.flood_limit > MAX_FLOOD_LIMIT {
            self.flood_limit = self.flood_limit.clamp(1, MAX_FLOOD_LIMIT);
        }
        if self.detection_fill > MAX_DETECTION_FILL {
            self.detection_fill = MAX_DETECTION_FILL;
        }
        if self.detection_wait_secs > MAX_DETECTION_WAIT_SECS {
            self.detection_wait_secs = MAX_DETECTION_WAIT_SECS;
        }
        if self.send_buffer_size > MAX_BUFFER_SIZE {
            self.send_buffer_size = MAX_BUFFER_SIZE;
        }
        if self.recv_buffer_size > MAX_BUFFER_SIZE {
            self.recv_buffer_size = MAX_BUFFER_SIZE;
        }
        Ok(())
    }

    /// Pairwise equality relation.
    pub fn relation(&self, other: &PortConfig) -> Relation {
        if self.proto != other.proto {
            return Relation::NoMatch;
        }

        if self.proto == PortProto::Pipe {
            return if self == other { Relation::Equal } else { Relation::NoMatch };
        }

        // RAW/ICMP have no port number; distinguish purely by address.
        let port_matches = matches!(self.proto, PortProto::Icmp | PortProto::Raw) || self.port == other.port;
        if !port_matches {
            return Relation::NoMatch;
        }

        match (&self.address, &other.address) {
            (a, b) if a == b => Relation::Equal,
            (Address::Any, _) | (_, Address::Any) => Relation::Match,
            (Address::EachInterface, Address::EachInterface) => Relation::Equal,
            (Address::Device(_), Address::Specific(_)) | (Address::Specific(_), Address::Device(_)) => {
                Relation::Conflict
            }
            (Address::Device(a), Address::Device(b)) if a == b => Relation::Equal,
            _ => Relation::NoMatch,
        }
    }

    /// Expands a port config into one per known interface when it is
    /// wildcard/no-IP (`EachInterface`) and not device-bound; otherwise
    /// returns a single concrete duplicate.
    pub fn expand(&self, interfaces: &serveez_util::InterfaceList) -> Vec<PortConfig> {
        match &self.address {
            Address::EachInterface => interfaces
                .iter()
                .map(|iface| {
                    let mut cfg = self.clone();
                    cfg.address = Address::Specific(iface.addr);
                    cfg
                })
                .collect(),
            _ => vec![self.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn equal_reflexive_symmetric_transitive() {
        let a = PortConfig::tcp("a", Address::Specific(Ipv4Addr::new(127, 0, 0, 1)), 2000);
        let b = a.clone();
        let c = a.clone();
        assert_eq!(a.relation(&a), Relation::Equal);
        assert_eq!(a.relation(&b), Relation::Equal);
        assert_eq!(b.relation(&a), Relation::Equal);
        assert_eq!(a.relation(&c), Relation::Equal);
    }

    #[test]
    fn wildcard_matches_specific() {
        let wild = PortConfig::tcp("w", Address::Any, 2001);
        let specific = PortConfig::tcp("s", Address::Specific(Ipv4Addr::new(127, 0, 0, 1)), 2001);
        assert_eq!(wild.relation(&specific), Relation::Match);
        assert_eq!(specific.relation(&wild), Relation::Match);
    }

    #[test]
    fn device_vs_specific_is_conflict() {
        let dev = PortConfig::tcp("d", Address::Device("eth0".into()), 2002);
        let specific = PortConfig::tcp("s", Address::Specific(Ipv4Addr::new(10, 0, 0, 1)), 2002);
        assert_eq!(dev.relation(&specific), Relation::Conflict);
    }

    #[test]
    fn different_ports_never_match() {
        let a = PortConfig::tcp("a", Address::Any, 2000);
        let b = PortConfig::tcp("b", Address::Any, 2001);
        assert_eq!(a.relation(&b), Relation::NoMatch);
    }

    #[test]
    fn validate_clamps_backlog_and_detection() {
        let mut cfg = PortConfig::tcp("a", Address::Any, 2000);
        cfg.backlog = SOMAXCONN + 1000;
        cfg.detection_fill = MAX_DETECTION_FILL + 1;
        cfg.detection_wait_secs = MAX_DETECTION_WAIT_SECS + 1;
        cfg.validate().unwrap();
        assert_eq!(cfg.backlog, SOMAXCONN);
        assert_eq!(cfg.detection_fill, MAX_DETECTION_FILL);
        assert_eq!(cfg.detection_wait_secs, MAX_DETECTION_WAIT_SECS);
    }

    #[test]
    fn validate_rejects_out_of_range_port() {
        let mut cfg = PortConfig::tcp("a", Address::Any, 0);
        assert!(cfg.validate().is_err());
    }
}
