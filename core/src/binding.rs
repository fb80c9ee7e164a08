//! Bindings: the `(server, port-config)` pairs attached to a listener,
//! and the filter that routes an accepted connection or received packet
//! to the right one.

use crate::portcfg::{Address, PortConfig};
use std::net::{IpAddr, SocketAddr};

#[derive(Debug, Clone)]
pub struct Binding {
    pub server: String,
    pub port: PortConfig,
}

impl PartialEq for Binding {
    fn eq(&self, other: &Binding) -> bool {
        self.server == other.server && self.port.relation(&other.port) == crate::portcfg::Relation::Equal
    }
}

/// Routes an accepted/received packet on listener `bindings`, with local
/// destination `local`, to the subset of bindings whose port config
/// matches.
///
/// For pipes every binding on the listener applies; for network
/// protocols a binding applies when its address is wildcard,
/// device-bound, or equal to `local`'s address, and (skipped for
/// RAW/ICMP, which carry no port number) its port equals `local`'s port.
pub fn filter<'a>(bindings: &'a [Binding], local: SocketAddr, is_pipe: bool) -> Vec<&'a Binding> {
    if is_pipe {
        return bindings.iter().collect();
    }

    bindings
        .iter()
        .filter(|binding| {
            let addr_ok = match &binding.port.address {
                Address::Any | Address::Device(_) | Address::EachInterface => true,
                Address::Specific(addr) => IpAddr::V4(*addr) == local.ip(),
            };
            if !addr_ok {
                return false;
            }

            use crate::portcfg::PortProto;
            match binding.port.proto {
                PortProto::Icmp | PortProto::Raw => true,
                _ => binding.port.port == local.port(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portcfg::PortConfig;
    use std::net::Ipv4Addr;

    fn local(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), port)
    }

    #[test]
    fn wildcard_and_specific_both_match_udp_multiplex() {
        let bindings = vec![
            Binding { server: "a".into(), port: PortConfig::udp("a", Address::Any, 3000) },
            Binding { server: "b".into(), port: PortConfig::udp("b", Address::Any, 3000) },
        ];
        let matched = filter(&bindings, local(3000), false);
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn specific_address_excludes_non_matching_destination() {
        let bindings = vec![Binding {
            server: "a".into(),
            port: PortConfig::tcp("a", Address::Specific(Ipv4Addr::new(10, 0, 0, 1)), 2001),
        }];
        let local_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 2001);
        assert!(filter(&bindings, local_addr, false).is_empty());
    }

    #[test]
    fn pipe_bindings_are_never_filtered_by_address() {
        let bindings = vec![Binding { server: "a".into(), port: PortConfig::tcp("a", Address::Any, 1) }];
        assert_eq!(filter(&bindings, local(0), true).len(), 1);
    }
}
